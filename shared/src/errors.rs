//! Shared error types for the tiered resolution system

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Coordination store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Serialization failed: {message}")]
    SerializationError { message: String },

    #[error("Deserialization failed: {message}")]
    DeserializationError { message: String },

    #[error("Invalid configuration: {field} = {value}")]
    InvalidConfig { field: String, value: String },

    #[error("Store protocol error: {message}")]
    ProtocolError { message: String },

    #[error("Wrong value type at key {key}: expected {expected}")]
    WrongType { key: String, expected: &'static str },
}

impl SharedError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable { message: message.into() }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolError { message: message.into() }
    }

    /// Whether this error means the store itself could not be reached
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}

impl From<serde_json::Error> for SharedError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::DeserializationError { message: err.to_string() }
        } else {
            Self::SerializationError { message: err.to_string() }
        }
    }
}

impl From<bincode::Error> for SharedError {
    fn from(err: bincode::Error) -> Self {
        Self::ProtocolError { message: err.to_string() }
    }
}

pub type SharedResult<T> = Result<T, SharedError>;
