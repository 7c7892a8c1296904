use thiserror::Error;

/// I/O errors that can occur when reading from a tile source
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Local filesystem error
    #[error("Read error: {0}")]
    Read(String),

    /// Error from an HTTP(S) source
    #[error("HTTP error: {0}")]
    Http(String),

    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Archive could not be opened or a member could not be extracted
    #[error("Archive error: {0}")]
    Archive(String),
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            IoError::NotFound(err.to_string())
        } else {
            IoError::Read(err.to_string())
        }
    }
}

/// Errors raised by tree primitives and the binary tile codec
#[derive(Debug, Clone, Error)]
pub enum TilesetError {
    /// Input that a primitive cannot work with (empty region list, short header)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A tree would break bounding or error invariants
    #[error("Structural violation: {0}")]
    StructuralViolation(String),

    /// Document is not valid tileset JSON
    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for TilesetError {
    fn from(err: serde_json::Error) -> Self {
        TilesetError::Json(err.to_string())
    }
}

/// Errors that can occur while building or running a pipeline
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Source error (the only place `NotFound` originates)
    #[error(transparent)]
    Io(#[from] IoError),

    /// Tree or codec error
    #[error(transparent)]
    Tileset(#[from] TilesetError),

    /// A stage produced no resource for the identifier
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unknown filter name or unparsable argument (construction time)
    #[error("Invalid operation '{name}': {reason}")]
    InvalidOperation { name: String, reason: String },

    /// External tool or auxiliary service failed
    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    /// Target cannot be served in the requested representation
    #[error("Unexpected resource for {target}: {message}")]
    UnexpectedResource { target: String, message: String },
}

impl PipelineError {
    /// Build an `InvalidOperation` error.
    pub fn invalid_operation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::InvalidOperation {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error means the identifier does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PipelineError::NotFound(_) | PipelineError::Io(IoError::NotFound(_))
        )
    }

    /// Whether this error reports a broken tree invariant.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            PipelineError::Tileset(TilesetError::StructuralViolation(_))
        )
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Tileset(TilesetError::from(err))
    }
}
