use thiserror::Error;

/// routestat error types
#[derive(Error, Debug)]
pub enum RoutestatError {
    /// Failed to parse JSON/JSONL
    #[error("parse error: {0}")]
    Parse(String),

    /// File I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot or in-memory cache operation failed
    #[error("cache error: {0}")]
    Cache(String),

    /// Exchange rate fetch or lookup failed
    #[error("exchange rate error: {0}")]
    ExchangeRate(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

/// Result type alias for routestat
pub type Result<T> = std::result::Result<T, RoutestatError>;
