//! External encoder supervision.
//!
//! - [`profile`]: command line derived from a [`crate::config::TargetConfig`]
//! - [`markers`]: stderr line classification
//! - [`supervisor`]: the session-facing handle and launcher trait
//! - [`process`]: real subprocesses behind that handle

pub mod markers;
pub mod process;
pub mod profile;
pub mod supervisor;

pub use process::{ProcessLauncher, SpawnSettings, spawn_encoder};
pub use supervisor::{
    EncoderEndpoint, EncoderEvent, EncoderHandle, EncoderLauncher, EncoderState, FeedOutcome,
};
