//! CLI commands

pub mod run;
pub mod tree;
pub mod validate;

use std::io::Read;
use std::path::Path;

use crate::error::Result;

/// Read a file, or stdin when no file (or `-`) is given
pub fn read_input(file: Option<&Path>) -> Result<Vec<u8>> {
    match file {
        Some(path) if path != Path::new("-") => Ok(std::fs::read(path).map_err(|e| {
            std::io::Error::new(e.kind(), format!("{}: {}", path.display(), e))
        })?),
        _ => {
            let mut data = Vec::new();
            std::io::stdin().read_to_end(&mut data)?;
            Ok(data)
        }
    }
}
