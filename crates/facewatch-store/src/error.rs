//! Error type for `facewatch-store`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("date/time parse error: {0}")]
    DateParse(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
