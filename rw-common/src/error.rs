//! Shared error type for the rw-* crates

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Reading the config file or creating the data folder failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unreadable config file or unparseable station setting
    #[error("Configuration error: {0}")]
    Config(String),

    /// A station or other named resource is not known
    #[error("Not found: {0}")]
    NotFound(String),
}
