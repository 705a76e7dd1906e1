/// Shared error type for every component in the proxy, so call sites propagate
/// with `?` instead of ad hoc strings. HTTP handlers map variants onto the
/// `{error: ...}` JSON shapes documented for the admin surface.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("config: {0}")]
    Config(String),

    #[error("upstream {upstream} unavailable: {message}")]
    UpstreamUnavailable { upstream: String, message: String },

    #[error("upstream {upstream} call failed: {message}")]
    UpstreamCallFailed { upstream: String, message: String },

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("masking LLM fallback failed: {0}")]
    MaskingLlmFailed(String),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
