//! Error types for upstream source operations

use std::path::PathBuf;

use krmfleet_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    // ============ Git Errors ============
    #[error("Failed to clone {uri} (auth method {auth_method}): {message}")]
    CloneFailed {
        uri: String,
        auth_method: String,
        message: String,
    },

    #[error("Unknown ref '{git_ref}' in {uri}: {message}")]
    UnknownRef {
        uri: String,
        git_ref: String,
        message: String,
    },

    #[error("Failed to check out {git_ref} ({commit}) of {uri}: {message}")]
    CheckoutFailed {
        uri: String,
        git_ref: String,
        commit: String,
        message: String,
    },

    #[error("git {command} failed: {message}")]
    GitCommand { command: String, message: String },

    #[error("git executable not available: {message}")]
    GitUnavailable { message: String },

    // ============ Authentication Errors ============
    #[error("SSH auth setup failed: {message}")]
    AuthSetup { message: String },

    #[error("Auth Secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },

    #[error("Key '{key}' not found in Secret {namespace}/{name}")]
    SecretKeyMissing {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("Decoding '{key}' in Secret {namespace}/{name}: {message}")]
    SecretDecode {
        namespace: String,
        name: String,
        key: String,
        message: String,
    },

    // ============ Registry Errors ============
    #[error("No working copy registered for upstream {upstream} ({uri})")]
    UnknownSource { upstream: String, uri: String },

    #[error("Working copy {path} has no HEAD commit")]
    NoHead { path: PathBuf },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Underlying tool output, without the context added by the variant
    pub fn detail(&self) -> String {
        match self {
            SourceError::GitCommand { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;
