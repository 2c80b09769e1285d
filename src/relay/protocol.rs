//! JSON message protocol on the relay WebSocket.

use crate::config::TargetOverrides;
use serde::{Deserialize, Deserializer, Serialize};

/// Messages sent by the broadcaster to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Begin routing audio to the ingest server
    Connect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config: Option<TargetOverrides>,
    },
    /// One block of interleaved float samples
    Audio {
        #[serde(deserialize_with = "samples_with_gaps")]
        buffer: Vec<f32>,
        #[serde(
            default,
            rename = "sampleRate",
            skip_serializing_if = "Option::is_none"
        )]
        sample_rate: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channels: Option<u16>,
    },
    /// Stop routing audio
    Disconnect,
}

/// Browsers serialize non-finite samples as `null`; those become NaN, which
/// the converter writes as silence.
fn samples_with_gaps<'de, D>(deserializer: D) -> Result<Vec<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    let samples = Vec::<Option<f32>>::deserialize(deserializer)?;
    Ok(samples
        .into_iter()
        .map(|sample| sample.unwrap_or(f32::NAN))
        .collect())
}

impl ClientMessage {
    /// Serialize message to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize message from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Stream state as reported to the broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Messages sent by the bridge to the broadcaster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Stream state changed
    Status {
        status: StreamStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Something went wrong; the session is still usable
    Error { message: String },
}

impl ServerMessage {
    pub fn connecting() -> Self {
        Self::Status {
            status: StreamStatus::Connecting,
            code: None,
            message: Some("Starting encoder".to_string()),
        }
    }

    pub fn connected() -> Self {
        Self::Status {
            status: StreamStatus::Connected,
            code: None,
            message: Some("Connected to ingest server".to_string()),
        }
    }

    /// `code` is the encoder's exit code; `None` for a requested stop or a
    /// signal-terminated encoder.
    pub fn disconnected(code: Option<i32>) -> Self {
        let message = match code {
            Some(code) => format!("Encoder exited with code {}", code),
            None => "Disconnected from ingest server".to_string(),
        };
        Self::Status {
            status: StreamStatus::Disconnected,
            code,
            message: Some(message),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize message to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize message from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_without_config() {
        let msg = ClientMessage::from_json(r#"{"type":"connect"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Connect { config: None });
        assert_eq!(msg.to_json().unwrap(), r#"{"type":"connect"}"#);
    }

    #[test]
    fn test_connect_with_partial_config() {
        let msg = ClientMessage::from_json(
            r#"{"type":"connect","config":{"host":"radio.example.org","port":8010,"password":"pw","mountpoint":"/live"}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Connect {
                config: Some(config),
            } => {
                assert_eq!(config.host.as_deref(), Some("radio.example.org"));
                assert_eq!(config.port, Some(8010));
                assert_eq!(config.password.as_deref(), Some("pw"));
                assert_eq!(config.mountpoint.as_deref(), Some("/live"));
                assert_eq!(config.bitrate, None);
            }
            other => panic!("Expected Connect with config, got {:?}", other),
        }
    }

    #[test]
    fn test_audio_message_fields() {
        let msg = ClientMessage::from_json(
            r#"{"type":"audio","buffer":[0.0,0.5,-1.0],"sampleRate":48000}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Audio {
                buffer: vec![0.0, 0.5, -1.0],
                sample_rate: Some(48000),
                channels: None,
            }
        );
    }

    #[test]
    fn test_audio_null_samples_become_nan() {
        let msg =
            ClientMessage::from_json(r#"{"type":"audio","buffer":[0.5,null,-0.5]}"#).unwrap();
        let ClientMessage::Audio { buffer, .. } = msg else {
            panic!("Expected Audio");
        };
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer[0], 0.5);
        assert!(buffer[1].is_nan());
        assert_eq!(buffer[2], -0.5);
    }

    #[test]
    fn test_audio_message_without_rate() {
        let msg = ClientMessage::from_json(r#"{"type":"audio","buffer":[]}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Audio {
                sample_rate: None,
                ..
            }
        ));
    }

    #[test]
    fn test_audio_serializes_camel_case_rate() {
        let json = ClientMessage::Audio {
            buffer: vec![0.25],
            sample_rate: Some(44100),
            channels: Some(1),
        }
        .to_json()
        .unwrap();
        assert_eq!(
            json,
            r#"{"type":"audio","buffer":[0.25],"sampleRate":44100,"channels":1}"#
        );
    }

    #[test]
    fn test_disconnect_format() {
        assert_eq!(
            ClientMessage::Disconnect.to_json().unwrap(),
            r#"{"type":"disconnect"}"#
        );
    }

    #[test]
    fn test_invalid_client_messages_are_errors() {
        assert!(ClientMessage::from_json(r#"{"type":"play"}"#).is_err());
        assert!(ClientMessage::from_json(r#"{"buffer":[1.0]}"#).is_err());
        assert!(ClientMessage::from_json(r#"{"type":"audio","buffer":"loud"}"#).is_err());
        assert!(ClientMessage::from_json("not json at all").is_err());
    }

    #[test]
    fn test_status_json_format() {
        assert_eq!(
            ServerMessage::connected().to_json().unwrap(),
            r#"{"type":"status","status":"connected","message":"Connected to ingest server"}"#
        );

        let json = ServerMessage::disconnected(Some(1)).to_json().unwrap();
        assert!(json.contains(r#""status":"disconnected""#));
        assert!(json.contains(r#""code":1"#));

        let json = ServerMessage::disconnected(None).to_json().unwrap();
        assert!(!json.contains("code"));
    }

    #[test]
    fn test_error_json_format() {
        let json = ServerMessage::error("Failed to process message")
            .to_json()
            .unwrap();
        assert_eq!(
            json,
            r#"{"type":"error","message":"Failed to process message"}"#
        );
    }

    #[test]
    fn test_server_message_parses_minimal_status() {
        let msg = ServerMessage::from_json(r#"{"type":"status","status":"connected"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Status {
                status: StreamStatus::Connected,
                code: None,
                message: None,
            }
        );
    }
}
