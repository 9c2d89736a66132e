//! Template filters for templated package metadata
//!
//! Helm-style string helpers so metadata templates written for Helm/sprig
//! carry over with little change.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use minijinja::{Error, ErrorKind, Value};
use sha2::{Digest, Sha256};

/// Hex SHA-256 of a string
///
/// Usage: {{ name | sha256sum | trunc(8) }}
#[must_use]
pub fn sha256sum(value: String) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Keep the first `length` characters; a negative length keeps the last ones
///
/// Usage: {{ name | trunc(63) }}
#[must_use]
pub fn trunc(value: String, length: i64) -> String {
    let count = value.chars().count();
    let keep = length.unsigned_abs() as usize;
    if keep >= count {
        return value;
    }
    if length >= 0 {
        value.chars().take(keep).collect()
    } else {
        value.chars().skip(count - keep).collect()
    }
}

/// Usage: {{ name | b64encode }}
#[must_use]
pub fn b64encode(value: String) -> String {
    STANDARD.encode(value.as_bytes())
}

/// Usage: {{ encoded | b64decode }}
pub fn b64decode(value: String) -> Result<String, Error> {
    let decoded = STANDARD.decode(value.trim().as_bytes()).map_err(|e| {
        Error::new(ErrorKind::InvalidOperation, format!("base64 decode error: {}", e))
    })?;
    String::from_utf8(decoded)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("UTF-8 decode error: {}", e)))
}

/// Wrap in double quotes, escaping quotes and backslashes
///
/// Usage: {{ rev | quote }}
#[must_use]
pub fn quote(value: Value) -> String {
    let s = match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    };
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Usage: {{ srcPath | trimprefix("pkg/") }}
#[must_use]
pub fn trimprefix(value: String, prefix: String) -> String {
    match value.strip_prefix(prefix.as_str()) {
        Some(rest) => rest.to_string(),
        None => value,
    }
}

/// Usage: {{ name | trimsuffix("-dev") }}
#[must_use]
pub fn trimsuffix(value: String, suffix: String) -> String {
    match value.strip_suffix(suffix.as_str()) {
        Some(rest) => rest.to_string(),
        None => value,
    }
}

/// Split on case changes and separators (`-`, `_`, `/`, `.`, space)
fn words(value: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in value.chars() {
        if matches!(c, '-' | '_' | '/' | '.' | ' ') {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Usage: {{ "myPackageName" | snakecase }} -> my_package_name
#[must_use]
pub fn snakecase(value: String) -> String {
    words(&value).join("_")
}

/// Usage: {{ "myPackageName" | kebabcase }} -> my-package-name
#[must_use]
pub fn kebabcase(value: String) -> String {
    words(&value).join("-")
}

/// Render a value as YAML without the trailing newline
///
/// Usage: {{ spec | toyaml }}
pub fn toyaml(value: Value) -> Result<String, Error> {
    let json: serde_json::Value = serde_json::to_value(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    let yaml = serde_yaml::to_string(&json)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    Ok(yaml.trim_end().to_string())
}

/// Register every filter on an environment
pub fn register(env: &mut minijinja::Environment<'_>) {
    env.add_filter("sha256sum", sha256sum);
    env.add_filter("sha256", sha256sum);
    env.add_filter("trunc", trunc);
    env.add_filter("b64encode", b64encode);
    env.add_filter("b64decode", b64decode);
    env.add_filter("quote", quote);
    env.add_filter("trimprefix", trimprefix);
    env.add_filter("trimsuffix", trimsuffix);
    env.add_filter("snakecase", snakecase);
    env.add_filter("kebabcase", kebabcase);
    env.add_filter("toyaml", toyaml);
}
