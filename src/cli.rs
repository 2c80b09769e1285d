//! Command-line interface for castbridge
//!
//! Provides argument parsing using clap derive macros.

use crate::config::TargetOverrides;
use crate::defaults;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Relay browser audio to an Icecast/Shoutcast server
#[derive(Parser, Debug)]
#[command(
    name = "castbridge",
    version,
    about = "Relay browser audio to an Icecast/Shoutcast server"
)]
pub struct Cli {
    /// Subcommand to execute (default: serve)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a duration such as `500ms`, `2s` or `1m30s`.
///
/// Bare numbers are seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay server (WebSocket, API proxy, static page)
    Serve(ServeArgs),

    /// Stream a WAV file to a relay server
    Send(SendArgs),

    /// Check that the encoder is installed
    Check,

    /// Show configuration
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Args, Debug, Default, Clone)]
pub struct ServeArgs {
    /// Address to listen on (default: 0.0.0.0:$PORT or 0.0.0.0:3000)
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<SocketAddr>,

    /// Directory with the broadcaster page
    #[arg(long, value_name = "DIR")]
    pub static_dir: Option<PathBuf>,

    /// Encoder binary (default: ffmpeg)
    #[arg(long, value_name = "PROGRAM")]
    pub encoder: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// WAV file to stream
    #[arg(long, short = 'f', value_name = "PATH")]
    pub file: PathBuf,

    /// Relay WebSocket URL
    #[arg(long, value_name = "URL", default_value = "ws://localhost:3000/ws")]
    pub url: String,

    /// Start over at the end of the file
    #[arg(long = "loop")]
    pub repeat: bool,

    /// Frames per audio message
    #[arg(long, value_name = "FRAMES", default_value_t = defaults::BLOCK_FRAMES)]
    pub block_frames: usize,

    /// Ingest server host
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Ingest server port
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Source password
    #[arg(long, value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Mountpoint (e.g. /live)
    #[arg(long, value_name = "PATH")]
    pub mountpoint: Option<String>,

    /// MP3 bitrate in kbit/s
    #[arg(long, value_name = "KBPS")]
    pub bitrate: Option<u32>,

    /// Station name
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// Station genre
    #[arg(long, value_name = "GENRE")]
    pub genre: Option<String>,

    /// List the stream in public directories
    #[arg(long)]
    pub public: bool,

    /// Retries after consecutive failures before giving up
    #[arg(long, value_name = "N")]
    pub max_attempts: Option<u32>,

    /// Wait between retries (e.g. 2s, 500ms)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub retry_delay: Option<Duration>,

    /// How long to wait for the stream to connect (e.g. 10s)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub connect_timeout: Option<Duration>,
}

impl SendArgs {
    /// Target fields given on the command line. Sample rate and channel
    /// count come from the file.
    pub fn overrides(&self, sample_rate: u32, channels: u16) -> TargetOverrides {
        TargetOverrides {
            host: self.host.clone(),
            port: self.port,
            password: self.password.clone(),
            mountpoint: self.mountpoint.clone(),
            sample_rate: Some(sample_rate),
            channels: Some(channels),
            bitrate: self.bitrate,
            name: self.name.clone(),
            genre: self.genre.clone(),
            public: self.public.then_some(true),
        }
    }
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (file, environment, defaults)
    Show,
    /// Print the configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_command() {
        let cli = Cli::try_parse_from(["castbridge"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_verbose_double() {
        let cli = Cli::try_parse_from(["castbridge", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_serve_overrides() {
        let cli = Cli::try_parse_from([
            "castbridge",
            "serve",
            "--listen",
            "127.0.0.1:8080",
            "--static-dir",
            "/srv/page",
            "--encoder",
            "/opt/ffmpeg/bin/ffmpeg",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Serve(args)) => {
                assert_eq!(args.listen, Some("127.0.0.1:8080".parse().unwrap()));
                assert_eq!(args.static_dir, Some(PathBuf::from("/srv/page")));
                assert_eq!(args.encoder.as_deref(), Some("/opt/ffmpeg/bin/ffmpeg"));
            }
            other => panic!("Expected Serve, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_send_defaults() {
        let cli = Cli::try_parse_from(["castbridge", "send", "--file", "mix.wav"]).unwrap();
        match cli.command {
            Some(Commands::Send(args)) => {
                assert_eq!(args.file, PathBuf::from("mix.wav"));
                assert_eq!(args.url, "ws://localhost:3000/ws");
                assert!(!args.repeat);
                assert_eq!(args.block_frames, defaults::BLOCK_FRAMES);
                assert!(args.retry_delay.is_none());
            }
            other => panic!("Expected Send, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_send_requires_file() {
        assert!(Cli::try_parse_from(["castbridge", "send"]).is_err());
    }

    #[test]
    fn test_parse_send_retry_durations() {
        let cli = Cli::try_parse_from([
            "castbridge",
            "send",
            "-f",
            "mix.wav",
            "--loop",
            "--retry-delay",
            "500ms",
            "--connect-timeout",
            "15",
            "--max-attempts",
            "3",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Send(args)) => {
                assert!(args.repeat);
                assert_eq!(args.retry_delay, Some(Duration::from_millis(500)));
                assert_eq!(args.connect_timeout, Some(Duration::from_secs(15)));
                assert_eq!(args.max_attempts, Some(3));
            }
            other => panic!("Expected Send, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("soon").is_err());
        assert_eq!(parse_duration(" 2m ").unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn test_send_overrides_carry_file_format() {
        let cli = Cli::try_parse_from([
            "castbridge",
            "send",
            "-f",
            "mix.wav",
            "--mountpoint",
            "/live",
            "--public",
        ])
        .unwrap();
        let Some(Commands::Send(args)) = cli.command else {
            panic!("Expected Send");
        };
        let overrides = args.overrides(48000, 1);
        assert_eq!(overrides.mountpoint.as_deref(), Some("/live"));
        assert_eq!(overrides.sample_rate, Some(48000));
        assert_eq!(overrides.channels, Some(1));
        assert_eq!(overrides.public, Some(true));
        assert!(overrides.host.is_none());
    }

    #[test]
    fn test_parse_config_show() {
        let cli = Cli::try_parse_from(["castbridge", "config", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Show
            })
        ));
    }

    #[test]
    fn test_parse_completions() {
        let cli = Cli::try_parse_from(["castbridge", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Completions { shell: Shell::Bash })
        ));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["castbridge", "check", "-q", "--config", "/tmp/c.toml"])
            .unwrap();
        assert!(cli.quiet);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
    }
}
