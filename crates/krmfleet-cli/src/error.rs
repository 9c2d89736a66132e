//! CLI error types with exit code handling
//!
//! Library errors are folded into [`CliError`] so each failure category maps
//! to its own exit code.

use miette::Diagnostic;
use thiserror::Error;

use krmfleet_core::CoreError;
use krmfleet_engine::EngineError;
use krmfleet_source::SourceError;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Fleet parsing or validation failed
    #[error("Validation failed: {message}")]
    #[diagnostic(code(krmfleet::cli::validation))]
    Validation {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// An upstream could not be cloned, fetched or checked out
    #[error("Source error: {message}")]
    #[diagnostic(code(krmfleet::cli::source))]
    Source {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Templated metadata failed to render
    #[error("Template error: {message}")]
    #[diagnostic(code(krmfleet::cli::template))]
    Template {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(krmfleet::cli::io))]
    Io { message: String },

    /// Internal error (unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(krmfleet::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Validation { .. } => exit_codes::VALIDATION_ERROR,
            CliError::Source { .. } => exit_codes::SOURCE_ERROR,
            CliError::Template { .. } => exit_codes::TEMPLATE_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: None,
        }
    }

    pub fn validation_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Io(e) => e.into(),
            other => CliError::validation(other.to_string()),
        }
    }
}

impl From<SourceError> for CliError {
    fn from(err: SourceError) -> Self {
        let help = match &err {
            SourceError::SecretNotFound { .. } | SourceError::SecretKeyMissing { .. } => Some(
                "include the Secret in the resource list with 'ssh-username' and 'ssh-privatekey' data"
                    .to_string(),
            ),
            SourceError::GitUnavailable { .. } => {
                Some("install git or make it available on PATH".to_string())
            }
            _ => None,
        };
        match err {
            SourceError::Core(e) => e.into(),
            SourceError::Io(e) => e.into(),
            other => CliError::Source {
                message: other.to_string(),
                help,
            },
        }
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::Core(e) => e.into(),
            EngineError::Registry(e) => e.into(),
            EngineError::Source { .. } => CliError::Source {
                message,
                help: None,
            },
            EngineError::Template { .. } => CliError::Template {
                message,
                help: Some("available variables: name, commit, rev, srcPath, dstPath, spec".to_string()),
            },
            EngineError::MissingSourcePath { .. }
            | EngineError::Copy { .. }
            | EngineError::Provenance { .. }
            | EngineError::MalformedResource { .. }
            | EngineError::Io(_) => CliError::Io { message },
            EngineError::InvalidPattern { .. } => CliError::validation(message),
            EngineError::Internal { .. } | EngineError::DeadlineExceeded { .. } => {
                CliError::Internal { message }
            }
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use krmfleet_core::SpecViolation;

    #[test]
    fn test_exit_codes_by_category() {
        let validation: CliError = CoreError::Validation {
            violations: vec![SpecViolation::new("foo", "package has no ref")],
        }
        .into();
        assert_eq!(validation.exit_code(), exit_codes::VALIDATION_ERROR);

        let source: CliError = EngineError::Registry(SourceError::SecretNotFound {
            namespace: "default".to_string(),
            name: "key".to_string(),
        })
        .into();
        assert_eq!(source.exit_code(), exit_codes::SOURCE_ERROR);
        assert!(matches!(source, CliError::Source { help: Some(_), .. }));

        let io: CliError = EngineError::MissingSourcePath {
            package: "foo".to_string(),
            upstream: "repoA".to_string(),
            git_ref: "main".to_string(),
            path: "/tmp/x".into(),
        }
        .into();
        assert_eq!(io.exit_code(), exit_codes::IO_ERROR);

        let internal: CliError = EngineError::DeadlineExceeded {
            package: "foo".to_string(),
        }
        .into();
        assert_eq!(internal.exit_code(), exit_codes::ERROR);
    }
}
