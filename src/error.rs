//! Error types for castbridge.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    // Encoder process errors
    #[error("Failed to launch encoder '{program}': {message}")]
    EncoderSpawn { program: String, message: String },

    #[error("Encoder pipe unavailable: {message}")]
    EncoderPipe { message: String },

    // Relay channel errors
    #[error("Relay protocol error: {message}")]
    Protocol { message: String },

    #[error("Relay connection failed: {message}")]
    ChannelConnection { message: String },

    #[error("Relay channel closed: {reason}")]
    ChannelLost { reason: String },

    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    // Server errors
    #[error("Server error: {message}")]
    Server { message: String },

    // Audio input errors
    #[error("Audio input failed: {message}")]
    AudioInput { message: String },

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_invalid_value_display() {
        let error = BridgeError::ConfigInvalidValue {
            key: "target.channels".to_string(),
            message: "must be 1 or 2".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for target.channels: must be 1 or 2"
        );
    }

    #[test]
    fn test_encoder_spawn_display() {
        let error = BridgeError::EncoderSpawn {
            program: "ffmpeg".to_string(),
            message: "No such file or directory".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to launch encoder 'ffmpeg': No such file or directory"
        );
    }

    #[test]
    fn test_protocol_display() {
        let error = BridgeError::Protocol {
            message: "unknown variant `play`".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Relay protocol error: unknown variant `play`"
        );
    }

    #[test]
    fn test_channel_errors_display() {
        let error = BridgeError::ChannelConnection {
            message: "connection refused".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Relay connection failed: connection refused"
        );

        let error = BridgeError::ChannelLost {
            reason: "server closed the socket".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Relay channel closed: server closed the socket"
        );
    }

    #[test]
    fn test_reconnect_exhausted_display() {
        let error = BridgeError::ReconnectExhausted { attempts: 5 };
        assert_eq!(error.to_string(), "Gave up reconnecting after 5 attempts");
    }

    #[test]
    fn test_other_display() {
        let error = BridgeError::Other("unexpected error".to_string());
        assert_eq!(error.to_string(), "unexpected error");
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<BridgeError>();
        assert_sync::<BridgeError>();
    }
}
