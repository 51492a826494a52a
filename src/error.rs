//! Error types for loading, merging, dereferencing and embedding.

use thiserror::Error;

/// Errors while fetching or parsing a single document.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {id}")]
    NotFound { id: String },

    #[error("cannot read {id}: {source}")]
    ReadError {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON in {id}: {source}")]
    ParseError {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::NotFound { .. } | LoadError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            LoadError::ParseError { .. } => 2,
        }
    }
}

/// Errors during merging and dereferencing of a document.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("dangling reference: {reference}")]
    DanglingReference { reference: String },

    #[error("invalid document {id}: {message}")]
    InvalidDocument { id: String, message: String },
}

impl ResolveError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ResolveError::Load(e) => e.exit_code(),
            _ => 2,
        }
    }
}

/// Errors from the validation front door (version gate, meta-schema check).
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("document has no info.version")]
    MissingVersion,

    #[error("version mismatch: manifest says {expected}, document says {actual}")]
    VersionMismatch { expected: String, actual: String },

    #[error("invalid meta-schema: {message}")]
    InvalidMetaSchema { message: String },

    #[error("invalid manifest {path}: {message}")]
    InvalidManifest { path: String, message: String },

    #[error("validation failed with {} error(s)", errors.len())]
    Invalid { errors: Vec<SchemaError> },
}

impl ValidateError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ValidateError::Resolve(e) => e.exit_code(),
            ValidateError::Invalid { .. } | ValidateError::VersionMismatch { .. } => 1,
            _ => 2,
        }
    }
}

/// Single validation error with path context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchemaError {
    /// JSON Pointer (RFC 6901) to the invalid field.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A well-formed embedding directive that could not be resolved.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("cannot resolve {file}: {source}")]
    File {
        file: String,
        #[source]
        source: std::sync::Arc<ResolveError>,
    },

    #[error("pointer {pointer} not found in {file}")]
    PointerNotFound { file: String, pointer: String },
}

/// A non-reference component defined in more than one document.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DuplicateComponent {
    pub name: String,
    pub component_type: String,
    pub first_origin: String,
    pub this_origin: String,
}

impl std::fmt::Display for DuplicateComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Duplicate entry in {}: {} defined in {} and {}",
            self.component_type, self.name, self.first_origin, self.this_origin
        )
    }
}
