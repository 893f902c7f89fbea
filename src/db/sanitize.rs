//! Identifier validation for SQL that cannot be parameterized.
//!
//! Table names are interpolated into statements, so they must be plain
//! identifiers. Keys and values always travel as bound parameters.

use std::fmt;

const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlSanitizeError {
  Empty,
  TooLong { len: usize, max: usize },
  InvalidCharacter { ch: char, position: usize },
  LeadingDigit,
}

impl fmt::Display for SqlSanitizeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Empty => write!(f, "identifier is empty"),
      Self::TooLong { len, max } => {
        write!(f, "identifier is {} bytes, maximum is {}", len, max)
      }
      Self::InvalidCharacter { ch, position } => {
        write!(f, "invalid character {:?} at position {}", ch, position)
      }
      Self::LeadingDigit => write!(f, "identifier must not start with a digit"),
    }
  }
}

impl std::error::Error for SqlSanitizeError {}

/// Accept `[A-Za-z_][A-Za-z0-9_]*`, at most 63 bytes (PostgreSQL's limit).
pub fn validate_identifier(name: &str) -> Result<(), SqlSanitizeError> {
  if name.is_empty() {
    return Err(SqlSanitizeError::Empty);
  }
  if name.len() > MAX_IDENTIFIER_LEN {
    return Err(SqlSanitizeError::TooLong {
      len: name.len(),
      max: MAX_IDENTIFIER_LEN,
    });
  }
  if name.starts_with(|c: char| c.is_ascii_digit()) {
    return Err(SqlSanitizeError::LeadingDigit);
  }
  for (position, ch) in name.chars().enumerate() {
    if !(ch.is_ascii_alphanumeric() || ch == '_') {
      return Err(SqlSanitizeError::InvalidCharacter { ch, position });
    }
  }
  Ok(())
}
