//! Error types for schema inference, form handling and sheet writes

use indexmap::IndexMap;
use std::fmt;
use thiserror::Error;

use crate::submission::SubmissionRecord;

/// Errors raised while turning the INPUT sheet into a form schema
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    /// Header row is missing or every header cell is blank
    #[error("no input columns defined")]
    NoColumns,

    /// Two columns share the same (trimmed) header
    #[error("duplicate field name: {0}")]
    DuplicateField(String),

    /// `choice:` hint with nothing after it
    #[error("field {0}: choice list is empty")]
    EmptyChoices(String),

    /// Hint token the parser does not know
    #[error("field {field}: unknown hint '{hint}'")]
    UnknownHint { field: String, hint: String },

    /// More than one kind token in a single hint cell
    #[error("field {field}: conflicting kinds '{first}' and '{second}'")]
    ConflictingKinds {
        field: String,
        first: String,
        second: String,
    },

    /// Bounds of a `number:min..max` hint that do not parse or are reversed
    #[error("field {field}: invalid number bounds '{bounds}'")]
    InvalidBounds { field: String, bounds: String },

    /// `default=` value that does not fit the field's kind
    #[error("field {field}: invalid default '{value}': {reason}")]
    InvalidDefault {
        field: String,
        value: String,
        reason: String,
    },

    /// Only one column may carry the `key` hint
    #[error("more than one key field: {0} and {1}")]
    MultipleKeys(String, String),

    /// A `computed` column combined with an input hint
    #[error("field {field}: computed column cannot take '{hint}'")]
    ComputedWithHint { field: String, hint: String },
}

/// Per-field validation failures, keyed by field name in schema order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: IndexMap<String, String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.insert(field.into(), message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.errors.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed: ")?;
        for (i, (field, message)) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", field, message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl serde::Serialize for ValidationErrors {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.errors.serialize(serializer)
    }
}

/// Failures reported by a [`SheetsApi`](crate::sheets::SheetsApi) implementation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SheetsError {
    /// Transport failure (connect, timeout, TLS)
    #[error("network error: {0}")]
    Network(String),

    /// 401 from the API
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// 403 from the API
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// 404 from the API, or an unknown spreadsheet/tab in memory
    #[error("not found: {0}")]
    NotFound(String),

    /// 429 from the API
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Any other non-success status
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Response body did not have the expected shape
    #[error("parse error: {0}")]
    Parse(String),

    /// Range string that cannot be interpreted
    #[error("invalid range: {0}")]
    InvalidRange(String),
}

/// Downstream write failure; keeps the record so the caller can retry
#[derive(Debug, Clone, Error)]
#[error("failed to write submission: {source}")]
pub struct WriteError {
    pub record: SubmissionRecord,
    #[source]
    pub source: SheetsError,
}

/// Misuse of a form instance
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("form {0} not found")]
    UnknownForm(String),

    #[error("form has no field named {0}")]
    UnknownField(String),

    #[error("form has already been submitted")]
    AlreadySubmitted,
}

/// Outcome of a failed submit, one variant per error class
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Form(#[from] FormError),
}

/// Result type alias for schema inference
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Result type alias for client operations
pub type SheetsResult<T> = Result<T, SheetsError>;
