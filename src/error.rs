use std::io;
use thiserror::Error;

/// Error type returned by user handlers, middlewares and background tasks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("handler already exists")]
    HandlerAlreadyExists,

    #[error("[{method}] {path} is already used")]
    RouteInUse {
        method: String,
        path: String,
        #[source]
        source: Box<Error>,
    },

    #[error("not supported method: {0:?}")]
    NotSupportedMethod(String),

    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    #[error("request timeout")]
    RequestTimeout,

    #[error("invalid listen address: {0:?}")]
    InvalidAddress(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("server is not listening")]
    NotListening,

    #[error("server has already been stopped")]
    Stopped,

    #[error("shutdown deadline exceeded before connections drained")]
    ShutdownTimeout,

    #[error("invalid cron expression {expression:?}: {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True for a duplicate handler, whether or not it carries route context.
    pub fn is_handler_already_exists(&self) -> bool {
        match self {
            Error::HandlerAlreadyExists => true,
            Error::RouteInUse { source, .. } => source.is_handler_already_exists(),
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
