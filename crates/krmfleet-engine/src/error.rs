//! Engine error types

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use krmfleet_core::CoreError;
use krmfleet_source::SourceError;

/// Main engine error type
///
/// Materialization is fail-fast: the first error aborts the run and carries
/// enough context (package, upstream, ref, paths) to diagnose it.
#[derive(Error, Debug, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(code(krmfleet::engine::spec))]
    Core(#[from] CoreError),

    #[error(transparent)]
    #[diagnostic(code(krmfleet::engine::source))]
    Registry(#[from] SourceError),

    #[error("package '{package}': {source}")]
    #[diagnostic(code(krmfleet::engine::source))]
    Source {
        package: String,
        #[source]
        source: SourceError,
    },

    #[error("package '{package}': source path '{path}' not found in {upstream}@{git_ref}")]
    #[diagnostic(
        code(krmfleet::engine::missing_source_path),
        help("check 'sourcePath' against the layout of the upstream repository at that ref")
    )]
    MissingSourcePath {
        package: String,
        upstream: String,
        git_ref: String,
        path: PathBuf,
    },

    #[error("package '{package}': copying {} --> {}: {message}", from.display(), to.display())]
    #[diagnostic(code(krmfleet::engine::copy))]
    Copy {
        package: String,
        from: PathBuf,
        to: PathBuf,
        message: String,
    },

    #[error("package '{package}': rendering templated metadata '{key}' ({kind}): {message}")]
    #[diagnostic(
        code(krmfleet::engine::template),
        help("available variables: name, commit, rev, srcPath, dstPath, spec")
    )]
    Template {
        package: String,
        key: String,
        kind: TemplateErrorKind,
        message: String,
    },

    #[error("package '{package}': writing metadata in {}: {message}", path.display())]
    #[diagnostic(code(krmfleet::engine::provenance))]
    Provenance {
        package: String,
        path: PathBuf,
        message: String,
    },

    #[error("malformed resource in {}: {message}", path.display())]
    #[diagnostic(code(krmfleet::engine::malformed_resource))]
    MalformedResource { path: PathBuf, message: String },

    #[error("invalid file pattern '{pattern}': {message}")]
    #[diagnostic(code(krmfleet::engine::glob))]
    InvalidPattern { pattern: String, message: String },

    #[error("internal error: {message}")]
    #[diagnostic(code(krmfleet::engine::internal))]
    Internal { message: String },

    #[error("deadline exceeded before package '{package}'")]
    #[diagnostic(code(krmfleet::engine::deadline))]
    DeadlineExceeded { package: String },

    #[error("IO error: {0}")]
    #[diagnostic(code(krmfleet::engine::io))]
    Io(#[from] std::io::Error),
}

/// Category of a template failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateErrorKind {
    UndefinedVariable,
    UnknownFilter,
    SyntaxError,
    InvalidOperation,
    Other,
}

impl TemplateErrorKind {
    pub fn from_minijinja(kind: minijinja::ErrorKind) -> Self {
        match kind {
            minijinja::ErrorKind::UndefinedError => Self::UndefinedVariable,
            minijinja::ErrorKind::UnknownFilter => Self::UnknownFilter,
            minijinja::ErrorKind::SyntaxError => Self::SyntaxError,
            minijinja::ErrorKind::InvalidOperation => Self::InvalidOperation,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UndefinedVariable => "undefined variable",
            Self::UnknownFilter => "unknown filter",
            Self::SyntaxError => "syntax error",
            Self::InvalidOperation => "invalid operation",
            Self::Other => "render error",
        }
    }
}

impl std::fmt::Display for TemplateErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
