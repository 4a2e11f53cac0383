use thiserror::Error;

/// Unified error type for the proxy core: framer, record codec, config
/// loading, and the replay matcher all funnel into this.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed HTTP message: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("missing environment variable: {0}")]
    MissingConfig(String),

    #[error("replayserver: could not find a match.")]
    NoMatch,

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
