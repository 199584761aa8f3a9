use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Opening, reading, writing or replacing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A key or value could not be encoded, or stored bytes don't match
    /// their tag.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The on-disk table is structurally malformed.
    #[error("corrupt substrate: {0}")]
    CorruptSubstrate(String),

    #[error("store is not open")]
    NotOpen,

    /// Another save already holds the temporary file for this path.
    #[error("save already in progress: {0}")]
    ConcurrentSave(String),
}

impl Error {
    pub fn encoding(msg: impl std::fmt::Display) -> Self {
        Error::Encoding(msg.to_string())
    }

    pub fn corrupt(msg: impl std::fmt::Display) -> Self {
        Error::CorruptSubstrate(msg.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}
