//! Specification error types
//!
//! Carries the YAML location for syntax errors and the key path (e.g.
//! `vconcat[0].plot[1]`) for structural errors.

use std::fmt;

/// Detailed parse error with location information
#[derive(Debug, Clone)]
pub struct ParseError {
    /// Error message
    pub message: String,
    /// Line number where error occurred (0-based)
    pub line: usize,
    /// Column number where error occurred (0-based)
    pub column: usize,
    /// Key path inside the specification where the error occurred
    pub context: String,
}

impl ParseError {
    /// Create a new parse error
    pub fn new(message: String, line: usize, column: usize, context: String) -> Self {
        Self {
            message,
            line,
            column,
            context,
        }
    }

    /// Create a structural error at a key path, without a text location
    pub fn at(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: 0,
            column: 0,
            context: context.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 || self.column > 0 {
            write!(
                f,
                "{} at line {}, column {}",
                self.message,
                self.line + 1,   // Display as 1-based
                self.column + 1, // Display as 1-based
            )
        } else if !self.context.is_empty() {
            write!(f, "{} (in {})", self.message, self.context)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ParseError {}

impl From<serde_yaml::Error> for ParseError {
    fn from(err: serde_yaml::Error) -> Self {
        let message = err.to_string();
        match err.location() {
            Some(loc) => ParseError::new(
                // serde_yaml appends its own location suffix
                message
                    .split(" at line ")
                    .next()
                    .unwrap_or(&message)
                    .to_string(),
                loc.line().saturating_sub(1),
                loc.column().saturating_sub(1),
                String::new(),
            ),
            None => ParseError::at(message, ""),
        }
    }
}

impl From<ParseError> for crate::PublishError {
    fn from(err: ParseError) -> Self {
        crate::PublishError::ParseError(err.to_string())
    }
}
