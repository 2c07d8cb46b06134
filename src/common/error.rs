//! Error types for memgrid

use crate::membership::id::ServerId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Membership Errors ===
    #[error("unknown server {0}")]
    UnknownServer(ServerId),

    #[error("server list index {0} out of range")]
    IndexOutOfRange(usize),

    #[error("server {0} is not up")]
    ServerNotUp(ServerId),

    // === Collaborator Errors ===
    #[error("journal error: {0}")]
    Journal(String),

    #[error("transport error: {0}")]
    Transport(String),

    // === Config Errors ===
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert to an HTTP status code for admin API responses
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::UnknownServer(_) | Error::IndexOutOfRange(_) => StatusCode::NOT_FOUND,
            Error::ServerNotUp(_) => StatusCode::GONE,
            Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
