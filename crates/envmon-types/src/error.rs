//! Error types for data parsing in envmon-types.

use thiserror::Error;

/// Errors that can occur when parsing sensor data or configuration values.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A value did not match any accepted spelling.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// A record field could not be converted.
    #[error("Invalid {field}: '{value}'")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Raw text that failed to parse.
        value: String,
    },

    /// A record had the wrong number of fields.
    #[error("Expected {expected} fields, got {actual}")]
    FieldCount {
        /// Number of fields in the schema.
        expected: usize,
        /// Number of fields found.
        actual: usize,
    },
}

impl ParseError {
    /// Create an invalid field error.
    pub fn invalid_field(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            value: value.into(),
        }
    }
}

/// Result type alias using envmon-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
