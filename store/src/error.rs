//! Error taxonomy shared by every backend

use crate::context::ContextError;
use aperture_shared::CodecError;

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Malformed or missing parameters, rejected before touching a backend
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("nothing found")]
    NotFound,

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("could not decode {what}: {source}")]
    Codec {
        what: String,
        #[source]
        source: CodecError,
    },

    #[error("{op} failed: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn codec(what: impl Into<String>, source: CodecError) -> Self {
        Self::Codec {
            what: what.into(),
            source,
        }
    }

    pub fn backend<E>(op: &'static str, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Backend {
            op,
            source: source.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// True for both explicit cancellation and an expired deadline.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Context(_))
    }

    /// HTTP status a boundary layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Codec { .. } => 400,
            Self::NotFound => 404,
            Self::Context(ContextError::Canceled) => 499,
            Self::Context(ContextError::DeadlineExceeded) => 504,
            Self::Backend { .. } => 503,
            Self::Io(_) => 500,
        }
    }
}
