//! Error types for the character modification engine.

use thiserror::Error;
use troupe_types::SnapshotId;

/// Result type for modification service operations.
pub type CharacterResult<T> = Result<T, CharacterError>;

/// Errors raised synchronously by the modification service.
///
/// Parse and apply failures are not raised; they come back inside the
/// structured apply outcome so callers always learn how far a diff got.
#[derive(Debug, Error)]
pub enum CharacterError {
    /// The service is not accepting modifications.
    #[error("character modifications are locked")]
    Locked,

    /// Too many modifications inside the configured window.
    #[error("rate limit exceeded: {max} modifications per {window_secs}s")]
    RateLimited { max: usize, window_secs: u64 },

    /// Rollback target does not exist.
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(SnapshotId),

    /// Operation attempted before `start()`.
    #[error("modification service not started")]
    NotStarted,

    /// A store write failed after the in-memory state had advanced.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// A restored document failed structural validation.
    #[error(transparent)]
    Update(#[from] UpdateError),
}

/// Errors from parsing the diff language.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DiffError {
    /// Input does not start with the expected root element.
    #[error("expected <character-modification> root element")]
    MissingRoot,

    /// No `<operations>` block inside the root.
    #[error("missing <operations> block")]
    MissingOperations,

    /// An element inside `<operations>` that is not add/modify/delete.
    #[error("unknown operation element <{0}>")]
    UnknownOperation(String),

    /// A required attribute is absent.
    #[error("<{element}> is missing required attribute '{attribute}'")]
    MissingAttribute {
        element: String,
        attribute: String,
    },

    /// The `type` attribute carries an unrecognized value.
    #[error("invalid value type '{0}'")]
    InvalidValueType(String),

    /// An operation path matched the denylist.
    #[error("unsafe path rejected: '{0}'")]
    UnsafePath(String),

    /// `<timestamp>` text is not an RFC 3339 datetime.
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    /// Structurally broken markup.
    #[error("malformed diff: {0}")]
    Malformed(String),
}

/// Errors from applying a parsed diff to a document.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// One operation could not be applied. Nothing was changed.
    #[error("operation {index} at '{path}': {source}")]
    Operation {
        index: usize,
        path: String,
        #[source]
        source: OpError,
    },

    /// The updated document violated structural invariants.
    /// The whole application is rolled back.
    #[error("document validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// What went wrong with a single operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OpError {
    /// Top-level segment is not a declared schema field.
    #[error("unknown field '{0}'")]
    UnknownField(String),

    /// The path expression itself is ill-formed.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The path points at nothing to modify or delete.
    #[error("path not found")]
    PathNotFound,

    /// Array index beyond the current length.
    #[error("index {index} out of bounds (len: {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    /// The value or target has the wrong shape for this field.
    #[error("type mismatch: expected {expected}")]
    TypeMismatch { expected: &'static str },

    /// The operation needs a value and none was given, or the value
    /// does not parse under its declared type.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Raw JSON values are only accepted under `settings`.
    #[error("json values are only accepted under settings")]
    JsonOutsideSettings,

    /// This field cannot be removed.
    #[error("field '{0}' cannot be deleted")]
    CannotDelete(&'static str),

    /// `[]` append used where the target is not an appendable array.
    #[error("append is not supported at '{0}'")]
    AppendUnsupported(String),
}
