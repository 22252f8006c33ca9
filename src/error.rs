use thiserror::Error;

/// Unified error type for the huginn sensor
#[derive(Debug, Error)]
pub enum SensorError {
    // IO and capture errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("capture error: {0}")]
    Capture(#[from] pcap::Error),

    // API errors
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("API error: {status} {message}")]
    Api { status: u16, message: String },
    #[error("API key rejected")]
    Auth,
    #[error("API rate limit exceeded")]
    RateLimited,
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Configuration errors
    #[error("configuration parse error: {0}")]
    ConfigParse(String),
    #[error("invalid capture interface: {0}")]
    InvalidInterface(String),
    #[error("invalid capture protocol: {0}")]
    InvalidProtocol(String),
    #[error("invalid buffer size: {0}")]
    InvalidBufferSize(String),
    #[error("invalid interval: {0}")]
    InvalidInterval(String),
    #[error("API key not set")]
    MissingApiKey,
    #[error("API host not set")]
    MissingApiHost,

    // Whitelist errors
    #[error("invalid whitelist network: {0}")]
    InvalidNetwork(String),
    #[error("duplicate whitelist group: {0}")]
    DuplicateGroup(String),
}

// Result type alias
pub type Result<T> = std::result::Result<T, SensorError>;
