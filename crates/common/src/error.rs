use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid camera '{id}': {reason}")]
    InvalidCamera { id: String, reason: String },

    #[error("config error: {0}")]
    Config(String),
}
