//! Standard exit codes for CLI operations

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Validation error - the Fleet or resource list is invalid
pub const VALIDATION_ERROR: i32 = 2;

/// Source error - clone, fetch, checkout or credentials failed
pub const SOURCE_ERROR: i32 = 3;

/// Template error - templated metadata failed to render
pub const TEMPLATE_ERROR: i32 = 4;

/// IO error - file not found, copy failure, malformed package file, etc.
pub const IO_ERROR: i32 = 5;
