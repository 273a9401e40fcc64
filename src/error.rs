//! Typed error kinds shared by the control plane and the process controller.
//!
//! Library code returns [`PraasError`] so callers can match on a specific
//! failure (an HTTP handler needs to know the difference between "not
//! found" and "internal failure" to pick a status code); binaries and glue
//! code work in `anyhow::Result` and rely on the `From` impl below.

use thiserror::Error;

/// The error kinds enumerated in the error handling design: object
/// existence conflicts, bad arguments, malformed wire messages, invalid
/// state transitions, allocation failures, mailbox GET failures, and
/// unimplemented trigger kinds.
#[derive(Debug, Error)]
pub enum PraasError {
    #[error("object already exists: {0}")]
    ObjectExists(String),

    #[error("object does not exist: {0}")]
    ObjectDoesNotExist(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid process state: attempted {attempted} from {current}")]
    InvalidProcessState {
        current: String,
        attempted: String,
    },

    #[error("allocation failed: {0}")]
    FailedAllocation(String),

    #[error("function get failure: {0}")]
    FunctionGetFailure(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("backpressure: {0}")]
    Backpressure(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PraasError {
    /// Maps an error kind to the HTTP status code the §7 table assigns it.
    /// 4xx for caller mistakes and missing objects, 5xx for everything an
    /// operator, not a client, needs to act on.
    pub fn status_code(&self) -> u16 {
        match self {
            PraasError::ObjectExists(_) => 409,
            PraasError::ObjectDoesNotExist(_) => 404,
            PraasError::InvalidConfiguration(_)
            | PraasError::InvalidArgument(_)
            | PraasError::InvalidMessage(_)
            | PraasError::InvalidProcessState { .. } => 400,
            PraasError::FailedAllocation(_) => 500,
            PraasError::FunctionGetFailure(_) => 422,
            PraasError::NotImplemented(_) => 501,
            PraasError::Backpressure(_) => 503,
            PraasError::Io(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, PraasError>;
