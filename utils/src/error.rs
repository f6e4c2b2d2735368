use std::sync::PoisonError;

pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error source carried by [`Error::WithSource`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("{message}: {source}")]
    WithSource {
        message: String,
        #[source]
        source: BoxError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Logger error: {0}")]
    Logger(#[from] log::SetLoggerError),

    #[error("Poisoned lock: {0}")]
    Poison(String),
}

impl Error {
    pub fn new(message: impl Into<String>) -> Self {
        Error::Message(message.into())
    }

    /// Wrap a lower level error with a short description of what failed.
    pub fn with_source(message: impl Into<String>, source: BoxError) -> Self {
        Error::WithSource {
            message: message.into(),
            source,
        }
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(err: PoisonError<T>) -> Self {
        Error::Poison(err.to_string())
    }
}
