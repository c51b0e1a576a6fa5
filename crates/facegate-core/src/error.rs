use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Frame errors
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // Validation errors
    #[error("Invalid serial number: {0}")]
    InvalidSerial(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    #[error("Invalid image payload: {0}")]
    InvalidImage(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    // Authentication errors
    #[error("Authentication required")]
    AuthRequired,

    // Resource governance errors
    #[error("Connection limit reached for {addr}")]
    ConnectionLimit { addr: String },

    #[error("Rate limit exceeded for {addr}")]
    RateLimited { addr: String },

    // Bridge errors
    #[error("Device offline: {0}")]
    DeviceOffline(String),

    #[error("Command timed out: {0}")]
    CommandTimeout(String),

    // Persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
