//! Error types for the SINLI relay.

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),
}

/// Configuration-related errors. Fatal: these abort the run before any
/// message is touched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Message-model errors.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Malformed SINLI document: {reason}")]
    MalformedDocument { reason: String },
}

/// Channel-related errors. All variants except `Configuration` are
/// per-message and recoverable: the orchestrator logs them and moves on.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Message {id} not found on this channel")]
    NotFound { id: String },

    #[error("Delivery failed on channel {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("No routing table entry for destination code {code}")]
    UnknownDestination { code: String },

    #[error("No destination directory matching {needle}")]
    NoDestinationDirectory { needle: String },

    #[error("Channel configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_convert_into_the_top_level_error() {
        let config: Error = ConfigError::ParseError("bad json".into()).into();
        assert!(matches!(config, Error::Config(_)));

        let channel: Error = ChannelError::NotFound { id: "m1".into() }.into();
        assert!(matches!(channel, Error::Channel(_)));
        assert_eq!(
            channel.to_string(),
            "Channel error: Message m1 not found on this channel"
        );
    }
}
