use thiserror::Error;

/// Top-level error type for the forwarder binary.
#[derive(Error, Debug)]
pub enum ForwarderError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::app::ConfigError),

    #[error("Client setup error: {0}")]
    Client(#[from] crate::sender::ConfigError),

    #[error("Logging error: {0}")]
    Logging(String),
}
