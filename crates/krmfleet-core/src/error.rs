//! Core error types

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Failed to parse Fleet: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid Fleet specification:\n{}", format_violations(.violations))]
    Validation { violations: Vec<SpecViolation> },

    #[error("Invalid Kptfile {path}: {message}")]
    InvalidKptfile { path: String, message: String },

    #[error("Invalid resource: {message}")]
    InvalidResource { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Violations carried by a validation error (empty for other kinds)
    pub fn violations(&self) -> &[SpecViolation] {
        match self {
            CoreError::Validation { violations } => violations,
            _ => &[],
        }
    }
}

/// A single problem found while validating a Fleet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecViolation {
    /// Where the problem is: `upstreams[1]`, `defaults`, or a package path like `bar/bar1`
    pub location: String,
    pub message: String,
}

impl SpecViolation {
    pub fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SpecViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

fn format_violations(violations: &[SpecViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("  - {}", v))
        .collect::<Vec<_>>()
        .join("\n")
}

pub type Result<T> = std::result::Result<T, CoreError>;
