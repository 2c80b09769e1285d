//! Default configuration constants for castbridge.
//!
//! Shared by the config layer, the encoder profile and the sender so that a
//! missing value means the same thing everywhere.

/// Default ingest server host.
pub const INGEST_HOST: &str = "localhost";

/// Default ingest server port (Icecast/Shoutcast convention).
pub const INGEST_PORT: u16 = 8000;

/// Default source password.
///
/// Matches the stock Icecast `hackme` so a fresh local server works out of the box.
pub const INGEST_PASSWORD: &str = "hackme";

/// Default mountpoint on the ingest server.
pub const MOUNTPOINT: &str = "/stream";

/// Default sample rate in Hz of the PCM fed to the encoder.
pub const SAMPLE_RATE: u32 = 44100;

/// Default channel count of the PCM fed to the encoder.
pub const CHANNELS: u16 = 2;

/// Default MP3 output bitrate in kbit/s.
pub const BITRATE_KBPS: u32 = 128;

/// Default station name announced to the ingest server.
pub const STATION_NAME: &str = "castbridge";

/// Default station genre announced to the ingest server.
pub const STATION_GENRE: &str = "Various";

/// Default port the relay server listens on (all interfaces).
pub const LISTEN_PORT: u16 = 3000;

/// Default directory with the built web application.
pub const STATIC_DIR: &str = "dist";

/// Default encoder binary.
pub const ENCODER_PROGRAM: &str = "ffmpeg";

/// Number of converted blocks queued for the encoder's stdin before new
/// blocks are dropped.
///
/// At 4096-frame blocks and 44.1kHz this is roughly three seconds of audio.
pub const ENCODER_INPUT_QUEUE: usize = 32;

/// Grace period in milliseconds between each teardown step
/// (stdin close, SIGTERM, SIGKILL).
pub const ENCODER_STOP_GRACE_MS: u64 = 2000;

/// Maximum number of reconnect attempts before the sender gives up.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Delay in milliseconds between reconnect attempts.
pub const RECONNECT_DELAY_MS: u64 = 2000;

/// Upper bound for the reconnect delay when a multiplier is configured.
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// Time in milliseconds the sender waits for the bridge to report `connected`.
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Frames per block produced by the file sender.
///
/// Matches the 4096-frame ScriptProcessor size browsers commonly use.
pub const BLOCK_FRAMES: usize = 4096;

/// Relay WebSocket path on the server.
pub const RELAY_PATH: &str = "/ws";
