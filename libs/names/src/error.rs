//! Error types for name parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    /// The name string is empty.
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    /// The name exceeds the maximum length for its kind.
    #[error("{kind} longer than {max} characters: '{actual}'")]
    TooLong {
        kind: &'static str,
        max: usize,
        actual: String,
    },

    /// The name contains a character not allowed for its kind.
    #[error("invalid character {character:?} in {kind} '{actual}'")]
    InvalidCharacter {
        kind: &'static str,
        character: char,
        actual: String,
    },

    /// A unit name is missing the `/` separator.
    #[error("unit name missing '/' separator: '{0}'")]
    MissingSeparator(String),

    /// The numeric suffix of a unit name is invalid.
    #[error("invalid unit number in '{0}'")]
    InvalidUnitNumber(String),
}

impl NameError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, NameError::Empty { .. })
    }
}
