//! Command-line profile for the external encoder.
//!
//! Input is always raw `s16le` PCM on stdin at the target's rate and channel
//! count; output is MP3 at the target's bitrate pushed with the Icecast source
//! protocol. Station metadata travels as `-ice_*` options.

use crate::config::TargetConfig;
use crate::error::{BridgeError, Result};
use reqwest::Url;

/// Source user name expected by Icecast and Shoutcast v2 servers.
pub const SOURCE_USER: &str = "source";

/// Arguments and destination derived from one [`TargetConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderProfile {
    args: Vec<String>,
    redacted_url: String,
}

impl EncoderProfile {
    /// Build the profile. Fails when host or mountpoint do not form a valid URL.
    pub fn from_target(target: &TargetConfig) -> Result<Self> {
        let url = stream_url(target)?;
        let redacted_url = redact(&url);

        let args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "info".to_string(),
            // input
            "-f".to_string(),
            "s16le".to_string(),
            "-ar".to_string(),
            target.sample_rate.to_string(),
            "-ac".to_string(),
            target.channels.to_string(),
            "-i".to_string(),
            "pipe:0".to_string(),
            // output
            "-acodec".to_string(),
            "libmp3lame".to_string(),
            "-b:a".to_string(),
            format!("{}k", target.bitrate_kbps),
            "-content_type".to_string(),
            "audio/mpeg".to_string(),
            "-ice_name".to_string(),
            target.name.clone(),
            "-ice_genre".to_string(),
            target.genre.clone(),
            "-ice_public".to_string(),
            if target.public { "1" } else { "0" }.to_string(),
            "-f".to_string(),
            "mp3".to_string(),
            url.to_string(),
        ];

        Ok(Self { args, redacted_url })
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Destination URL with the credential masked, for logs.
    pub fn redacted_url(&self) -> &str {
        &self.redacted_url
    }
}

/// Assemble `icecast://source:<password>@host:port/mount`.
pub fn stream_url(target: &TargetConfig) -> Result<Url> {
    let host = if target.host.contains(':') && !target.host.starts_with('[') {
        format!("[{}]", target.host)
    } else {
        target.host.clone()
    };

    let mut url = Url::parse(&format!(
        "icecast://{}:{}{}",
        host, target.port, target.mountpoint
    ))
    .map_err(|e| BridgeError::ConfigInvalidValue {
        key: "target.host".to_string(),
        message: format!("cannot build stream URL: {}", e),
    })?;

    let credential_err = |_| BridgeError::ConfigInvalidValue {
        key: "target.password".to_string(),
        message: "stream URL cannot carry credentials".to_string(),
    };
    url.set_username(SOURCE_USER).map_err(credential_err)?;
    url.set_password(Some(&target.password))
        .map_err(credential_err)?;

    Ok(url)
}

fn redact(url: &Url) -> String {
    let mut masked = url.clone();
    if masked.password().is_some() && masked.set_password(Some("***")).is_ok() {
        masked.to_string()
    } else {
        url.to_string()
    }
}
