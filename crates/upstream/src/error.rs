#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("request timed out")]
    Timeout,
    #[error("transport closed")]
    Closed,
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("session not connected")]
    NotConnected,
    #[error("unknown transport discriminator: {0}")]
    UnknownTransport(String),
    #[error("missing required field '{0}' for this transport")]
    MissingField(&'static str),
    #[error("upstream call failed: {0}")]
    CallFailed(String),
}

impl From<SessionError> for mcpx_domain::Error {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Transport(t) => mcpx_domain::Error::UpstreamCallFailed {
                upstream: String::new(),
                message: t.to_string(),
            },
            other => mcpx_domain::Error::UpstreamCallFailed { upstream: String::new(), message: other.to_string() },
        }
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
