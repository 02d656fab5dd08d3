//!
//! src/errors.rs
//!
//! Defines enums and methods of error conversion
//! for errors the scout uses
//!

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScoutError {
    #[error("config error: {0}")]
    Config(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("batch already active: {0}")]
    BatchActive(String),
    #[error("store error: {0}")]
    Db(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

impl From<reqwest::Error> for ScoutError {
    fn from(e: reqwest::Error) -> Self {
        // connection-level failures are fatal to a batch, everything else is per-item
        if e.is_connect() {
            ScoutError::Transport(e.to_string())
        } else {
            ScoutError::Http(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ScoutError {
    fn from(e: serde_json::Error) -> Self { ScoutError::Parse(e.to_string()) }
}

impl From<sqlx::Error> for ScoutError {
    fn from(e: sqlx::Error) -> Self { ScoutError::Db(e.to_string()) }
}
