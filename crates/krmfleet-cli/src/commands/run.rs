//! Run command - KRM function mode
//!
//! Reads a ResourceList, composes every Fleet in it and writes the resulting
//! ResourceList to stdout. On failure the list is still written, with the
//! error appended to its results.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::debug;

use krmfleet_core::{FnResult, ResourceList};
use krmfleet_engine::{ComposeOptions, FleetComposer};

use crate::commands::read_input;
use crate::display;
use crate::error::{CliError, Result};

pub struct RunArgs {
    pub file: Option<PathBuf>,
    pub packages_dir: Option<PathBuf>,
    pub match_globs: Vec<String>,
    pub timeout: Option<u64>,
    pub debug: bool,
}

pub fn run(args: RunArgs) -> Result<()> {
    let data = read_input(args.file.as_deref())?;
    let mut list = ResourceList::from_yaml(&data)?;

    let mut options = ComposeOptions {
        packages_dir: non_empty_dir(args.packages_dir),
        deadline: args.timeout.map(|secs| Instant::now() + Duration::from_secs(secs)),
        ..Default::default()
    };
    if !args.match_globs.is_empty() {
        options.match_globs = args.match_globs;
    }
    debug!(?options, "composing resource list");

    let outcome = FleetComposer::with_git(options).run(&mut list);
    let outcome: Result<()> = outcome.map_err(CliError::from);
    if let Err(err) = &outcome {
        list.results.push(FnResult::error(err.to_string()));
    }

    if args.debug {
        display::print_results(&mut std::io::stderr(), &list.results)?;
    }
    write_list(&list, &mut std::io::stdout().lock())?;
    outcome
}

fn write_list<W: Write>(list: &ResourceList, out: &mut W) -> Result<()> {
    let yaml = list.to_yaml()?;
    out.write_all(yaml.as_bytes())?;
    out.flush()?;
    Ok(())
}

/// An empty `LOCAL_PACKAGES_DIR` means no retained directory
fn non_empty_dir(dir: Option<PathBuf>) -> Option<PathBuf> {
    dir.filter(|d| d != Path::new(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty_dir() {
        assert_eq!(non_empty_dir(None), None);
        assert_eq!(non_empty_dir(Some(PathBuf::new())), None);
        assert_eq!(non_empty_dir(Some(PathBuf::from("/tmp/stage"))), Some(PathBuf::from("/tmp/stage")));
    }

    #[test]
    fn test_write_list_is_yaml_resource_list() {
        let mut list = ResourceList::default();
        list.results.push(FnResult::info("cloned repo"));
        let mut buf = Vec::new();
        write_list(&list, &mut buf).unwrap();

        let parsed = ResourceList::from_yaml(&buf).unwrap();
        assert_eq!(parsed, list);
    }
}
