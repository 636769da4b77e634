use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Envelope must be a JSON object")]
    NotAnObject,

    #[error("Missing or empty field: {0}")]
    MissingField(&'static str),

    #[error("Presence message from {0} carries no reachable address")]
    NoAddress(String),
}

impl From<serde_json::Error> for MessageError {
    fn from(err: serde_json::Error) -> Self {
        MessageError::InvalidJson(err.to_string())
    }
}

pub type MessageResult<T> = Result<T, MessageError>;
