use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Peer answered with a non-success status
    #[error("{status}:{body}")]
    Rejected { status: u16, body: String },

    /// No answer: connect failure, timeout, reset
    #[error("0:{0}")]
    Unreachable(String),

    #[error("Invalid peer URL: {0}")]
    InvalidUrl(String),
}

pub type TransportResult<T> = Result<T, TransportError>;
