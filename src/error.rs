use thiserror::Error;

/// Error type shared across the czar and worker binaries.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("partitioning error: {0}")]
    Partition(String),

    #[error("csv error: {0}")]
    Csv(String),

    #[error("wire framing error: {0}")]
    Framing(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("transmit error: {0}")]
    Transmit(String),

    #[error("channel is dead: {0}")]
    ChannelDead(String),

    #[error("admission denied: {0}")]
    AdmissionDenied(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("merge error: {0}")]
    Merge(String),

    /// A worker reported a query-level failure inline in a result frame
    /// (`ResultMsg.errorcode`/`errormsg`), as opposed to a framing/transport
    /// fault. Kept distinct from [`CoreError::Merge`] so callers can surface
    /// the worker's own error code in `MessageStore`.
    #[error("worker reported error {code}: {msg}")]
    RemoteError { code: i32, msg: String },

    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error("query cancelled: {0}")]
    Cancelled(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("precondition failed (bug): {0}")]
    Bug(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Io(e.to_string())
    }
}

impl From<bincode::error::EncodeError> for CoreError {
    fn from(e: bincode::error::EncodeError) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for CoreError {
    fn from(e: bincode::error::DecodeError) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
