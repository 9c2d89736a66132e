//! Package materialization
//!
//! Copies each output package out of its upstream's working copy, renders its
//! templated metadata and records where it came from. Packages are processed
//! one at a time in tree order and the first failure aborts the run.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info};
use walkdir::WalkDir;

use krmfleet_core::{FnResult, MetadataMode, OutputPackage, ResolvedFleet, Results, UpstreamOrigin};
use krmfleet_source::{GitBackend, GitCli, SourceRegistry};

use crate::error::{EngineError, Result};
use crate::provenance::update_kpt_metadata;
use crate::template::{MetadataRenderer, TemplateContext};

/// Writes output packages to disk from a [`SourceRegistry`]
pub struct Materializer<'r, B: GitBackend = GitCli> {
    registry: &'r mut SourceRegistry<B>,
    renderer: MetadataRenderer,
    output_root: PathBuf,
    deadline: Option<Instant>,
}

impl<'r, B: GitBackend> Materializer<'r, B> {
    pub fn new(registry: &'r mut SourceRegistry<B>) -> Self {
        Self {
            registry,
            renderer: MetadataRenderer::new(),
            output_root: PathBuf::new(),
            deadline: None,
        }
    }

    /// Directory that relative package destinations are written under
    ///
    /// Templates see `dstPath` relative to this root, so their output does
    /// not depend on where the run is staged.
    pub fn with_output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    /// Refuse to start packages once `deadline` has passed
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Materialize `packages` in order
    ///
    /// Every upstream the packages use must already be resolved in the
    /// registry. Returns the progress messages of the run.
    pub fn toss_files(
        &mut self,
        fleet: &ResolvedFleet,
        packages: &[OutputPackage<'_>],
    ) -> Result<Results> {
        let mut results = Results::new();
        for output in packages {
            let outcome = self.materialize(fleet, output);
            results.extend(self.registry.take_results());
            results.push(outcome?);
        }
        Ok(results)
    }

    fn materialize(&mut self, fleet: &ResolvedFleet, output: &OutputPackage<'_>) -> Result<FnResult> {
        let package = output.package;
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(EngineError::DeadlineExceeded {
                package: package.name.clone(),
            });
        }

        let upstream = fleet
            .upstream(&package.upstream)
            .ok_or_else(|| EngineError::Internal {
                message: format!(
                    "package '{}' references unknown upstream '{}'",
                    package.name, package.upstream
                ),
            })?;
        if self.registry.get(upstream).is_none() {
            return Err(EngineError::Internal {
                message: format!(
                    "no working copy for upstream '{}' needed by package '{}'",
                    upstream.name, package.name
                ),
            });
        }

        let commit = self
            .registry
            .ensure_version(upstream, &package.source_ref)
            .map_err(|source| EngineError::Source {
                package: package.name.clone(),
                source,
            })?;
        let source = self.registry.get(upstream).ok_or_else(|| EngineError::Internal {
            message: format!("working copy for upstream '{}' disappeared", upstream.name),
        })?;

        let src_path = package.source_path();
        let src_dir = source.path().join(src_path);
        if !src_dir.is_dir() {
            return Err(EngineError::MissingSourcePath {
                package: package.name.clone(),
                upstream: upstream.name.to_string(),
                git_ref: package.source_ref.to_string(),
                path: src_dir,
            });
        }

        let dst_dir = self.output_root.join(&output.dst_path);
        copy_dir(&src_dir, &dst_dir).map_err(|message| EngineError::Copy {
            package: package.name.clone(),
            from: src_dir.clone(),
            to: dst_dir.clone(),
            message,
        })?;
        info!(
            package = %package.name,
            src = %src_dir.display(),
            dst = %dst_dir.display(),
            "copied package"
        );

        let ctx = TemplateContext {
            name: package.name.clone(),
            commit: commit.clone(),
            rev: package.source_ref.to_string(),
            src_path: src_path.to_string(),
            dst_path: output.dst_path.display().to_string(),
        };
        let data = self.renderer.package_metadata(package, &ctx)?;

        match package.mode {
            MetadataMode::KptForDeployment => {
                let origin = UpstreamOrigin {
                    repo: source.repo().to_string(),
                    directory: src_path.to_string(),
                    git_ref: package.source_ref.to_string(),
                    commit,
                };
                update_kpt_metadata(&dst_dir, &package.name, &data, &origin)?;
            }
            MetadataMode::None => {
                debug!(package = %package.name, "metadata mode none, skipping Kptfile");
            }
        }

        Ok(FnResult::info(format!(
            "package {}; {} --> {}",
            package.name, src_path, package.dst_path
        )))
    }
}

/// Recursively copy `from` into `to`, overwriting files and skipping `.git`
fn copy_dir(from: &Path, to: &Path) -> std::result::Result<(), String> {
    let walker = WalkDir::new(from)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|e| e.to_string())?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| e.to_string())?;
        let target = to.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| format!("{}: {}", target.display(), e))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| format!("{}: {}", parent.display(), e))?;
            }
            fs::copy(entry.path(), &target)
                .map_err(|e| format!("{}: {}", entry.path().display(), e))?;
        }
    }
    Ok(())
}
