use std::io;
use thiserror::Error;

/// Result type for receiver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the receiver pipeline and its collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error (files, sockets, stdout)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// WAV container error
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Sample acquisition failed; the pipeline cannot continue
    #[error("Source error: {0}")]
    Source(String),

    /// Audio sink could not be opened or written
    #[error("Sink error: {0}")]
    Sink(String),

    /// Operation not allowed in the current state (e.g. push after end)
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// Bad option combination or value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Interrupt handler installation failed
    #[error("Signal handler error: {0}")]
    Signal(String),
}

impl Error {
    pub fn source_failure<S: Into<String>>(msg: S) -> Self {
        Error::Source(msg.into())
    }

    pub fn sink<S: Into<String>>(msg: S) -> Self {
        Error::Sink(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }
}

impl From<ctrlc::Error> for Error {
    fn from(err: ctrlc::Error) -> Self {
        Error::Signal(err.to_string())
    }
}
