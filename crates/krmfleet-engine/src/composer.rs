//! Resource-list composition
//!
//! Runs every `Fleet` found in a KRM resource list: resolves its upstreams,
//! materializes its packages into a staging directory and appends the
//! resulting files to the list as new items.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tempfile::TempDir;
use tracing::{debug, info};

use krmfleet_core::fleet::{FLEET_API_VERSION, FLEET_KIND};
use krmfleet_core::resource::annotations;
use krmfleet_core::{
    CoreError, Fleet, KubeObject, ResolvedFleet, ResourceList, Results, SpecViolation,
    collect_output_packages, compute_references, is_relative_clean,
};
use krmfleet_source::{GitBackend, GitCli, SecretCredentials, SourceRegistry};

use crate::bridge::{BridgeOptions, filesystem_to_objects};
use crate::error::{EngineError, Result};
use crate::materialize::Materializer;

/// Subdirectory of the workspace holding upstream working copies
const SOURCES_DIR: &str = "in";

/// Subdirectory of the workspace holding materialized packages
const OUTPUT_DIR: &str = "out";

/// Options for a composition run
#[derive(Debug, Clone)]
pub struct ComposeOptions {
    /// Staging directory kept after the run; a temporary one is used otherwise
    pub packages_dir: Option<PathBuf>,
    /// File name globs for reading materialized files back
    pub match_globs: Vec<String>,
    /// No package is started after this instant
    pub deadline: Option<Instant>,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            packages_dir: None,
            match_globs: BridgeOptions::default().match_globs,
            deadline: None,
        }
    }
}

/// Where sources and output are staged during a run
enum Workspace {
    Retained(PathBuf),
    Temporary(TempDir),
}

impl Workspace {
    fn create(packages_dir: Option<&Path>) -> Result<Self> {
        match packages_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Ok(Workspace::Retained(dir.to_path_buf()))
            }
            None => Ok(Workspace::Temporary(
                tempfile::Builder::new().prefix("krmfleet").tempdir()?,
            )),
        }
    }

    fn path(&self) -> &Path {
        match self {
            Workspace::Retained(dir) => dir,
            Workspace::Temporary(dir) => dir.path(),
        }
    }
}

/// Composes the fleets of a resource list
pub struct FleetComposer<B: GitBackend = GitCli> {
    backend: B,
    options: ComposeOptions,
}

impl FleetComposer<GitCli> {
    /// Composer using the `git` binary on `PATH`
    pub fn with_git(options: ComposeOptions) -> Self {
        Self::new(GitCli::new(), options)
    }
}

impl<B: GitBackend + Clone> FleetComposer<B> {
    pub fn new(backend: B, options: ComposeOptions) -> Self {
        Self { backend, options }
    }

    pub fn options(&self) -> &ComposeOptions {
        &self.options
    }

    /// Compose every Fleet in `list`
    ///
    /// Materialized objects are appended to `items` without de-duplication and
    /// progress messages to `results`. Messages gathered before a failure are
    /// kept in the list.
    pub fn run(&self, list: &mut ResourceList) -> Result<()> {
        let workspace = Workspace::create(self.options.packages_dir.as_deref())?;
        let out_dir = workspace.path().join(OUTPUT_DIR);
        debug!(workspace = %workspace.path().display(), "staging packages");

        let mut registry = SourceRegistry::new(self.backend.clone(), workspace.path().join(SOURCES_DIR));
        let mut results = Results::new();
        let outcome = self.compose(&list.items, &mut registry, &out_dir, &mut results);
        list.results.extend(results);
        let fleets = outcome?;

        let options = BridgeOptions {
            match_globs: self.options.match_globs.clone(),
        };
        let objects = filesystem_to_objects(&out_dir, &options)?;
        info!(
            fleets = fleets,
            sources = registry.len(),
            objects = objects.len(),
            "composed resource list"
        );
        list.items.extend(objects);
        Ok(())
    }

    fn compose(
        &self,
        items: &[KubeObject],
        registry: &mut SourceRegistry<B>,
        out_dir: &Path,
        results: &mut Results,
    ) -> Result<usize> {
        // Every fleet is validated before anything is cloned or written
        let fleets = items
            .iter()
            .filter(|i| i.is_gvk(FLEET_API_VERSION, FLEET_KIND))
            .map(|item| {
                let declared: Fleet = item.to_typed()?;
                let fleet = ResolvedFleet::from_fleet(&declared)?;
                let base = fleet_base_dir(item, fleet.name())?;
                Ok((fleet, base))
            })
            .collect::<Result<Vec<_>>>()?;

        let credentials = SecretCredentials::new(items);
        for (fleet, base) in &fleets {
            debug!(fleet = %fleet.name(), base = %out_dir.join(base).display(), "composing fleet");

            for (id, refs) in compute_references(&fleet.packages) {
                let upstream = fleet.upstream(&id).ok_or_else(|| EngineError::Internal {
                    message: format!("fleet '{}' references undeclared upstream '{}'", fleet.name(), id),
                })?;
                registry.resolve(upstream, &credentials)?;
                registry.record_refs(upstream, &refs)?;
            }
            results.extend(registry.take_results());

            let packages = collect_output_packages(&fleet.packages, base);
            let tossed = Materializer::new(registry)
                .with_output_root(out_dir)
                .with_deadline(self.options.deadline)
                .toss_files(fleet, &packages);
            results.extend(registry.take_results());
            results.extend(tossed?);
        }
        Ok(fleets.len())
    }
}

/// Output directory of a fleet, relative to the staging output directory:
/// its file's directory joined with its name
fn fleet_base_dir(item: &KubeObject, name: &str) -> Result<PathBuf> {
    let path = item.annotation(annotations::PATH).unwrap_or_default();
    if !is_relative_clean(path) {
        return Err(CoreError::Validation {
            violations: vec![SpecViolation::new(
                format!("fleet {}", name),
                format!("{} '{}' must be a relative path without '..'", annotations::PATH, path),
            )],
        }
        .into());
    }
    let dir = Path::new(path).parent().unwrap_or(Path::new(""));
    Ok(dir.join(name))
}
