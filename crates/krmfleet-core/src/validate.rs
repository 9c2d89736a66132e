//! Fleet validation
//!
//! All checks run against the resolved tree and every violation is collected,
//! so a single run reports everything wrong with a document.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use crate::error::{CoreError, Result, SpecViolation};
use crate::fleet::{GitAuthMethod, PackageDefaults, Upstream, UpstreamType};
use crate::resolve::{NAME_KEY, ResolvedFleet, ResolvedPackage};

/// The only credential kind understood by `sshPrivateKey`
const SECRET_KIND: &str = "Secret";

pub(crate) fn validate(fleet: &ResolvedFleet) -> Result<()> {
    let mut violations = Vec::new();

    if !is_relative_clean(fleet.name()) {
        violations.push(SpecViolation::new(
            "metadata",
            format!("fleet name '{}' must be a relative path without '..'", fleet.name()),
        ));
    }
    validate_upstreams(&fleet.upstreams, &mut violations);
    validate_defaults(&fleet.defaults, &mut violations);

    let declared: HashSet<&str> = fleet.upstreams.iter().map(|u| u.name.as_str()).collect();
    let mut walker = PackageWalker {
        declared,
        destinations: HashMap::new(),
        violations: &mut violations,
    };
    walker.walk(&fleet.packages, "", true);

    if violations.is_empty() {
        Ok(())
    } else {
        Err(CoreError::Validation { violations })
    }
}

fn validate_upstreams(upstreams: &[Upstream], violations: &mut Vec<SpecViolation>) {
    let mut seen = HashSet::new();

    for (idx, upstream) in upstreams.iter().enumerate() {
        let location = if upstream.name.is_empty() {
            format!("upstreams[{}]", idx)
        } else {
            format!("upstream {}", upstream.name)
        };

        if upstream.name.is_empty() {
            violations.push(SpecViolation::new(&location, "upstream must have 'name'"));
        } else if !seen.insert(upstream.name.as_str()) {
            violations.push(SpecViolation::new(&location, "upstream names must be unique"));
        }

        match upstream.kind {
            UpstreamType::Git => {
                let git = &upstream.git;
                if git.repo.trim().is_empty() {
                    violations.push(SpecViolation::new(&location, "git upstream needs 'repo'"));
                }
                match (git.auth_method, &git.auth) {
                    (GitAuthMethod::None, _) => {}
                    (GitAuthMethod::SshAgent, Some(_)) => violations.push(SpecViolation::new(
                        &location,
                        "cannot use auth specification with method 'sshAgent'",
                    )),
                    (GitAuthMethod::SshAgent, None) => {}
                    (GitAuthMethod::SshPrivateKey, None) => violations.push(SpecViolation::new(
                        &location,
                        "auth method 'sshPrivateKey' requires auth specification",
                    )),
                    (GitAuthMethod::SshPrivateKey, Some(auth)) => {
                        if auth.kind != SECRET_KIND {
                            violations.push(SpecViolation::new(
                                &location,
                                format!("only auth kind '{}' supported, found '{}'", SECRET_KIND, auth.kind),
                            ));
                        }
                        if auth.name.is_empty() {
                            violations.push(SpecViolation::new(&location, "auth must have 'name'"));
                        }
                    }
                }
            }
        }
    }
}

fn validate_defaults(defaults: &PackageDefaults, violations: &mut Vec<SpecViolation>) {
    if defaults.metadata.spec.contains_key(NAME_KEY) {
        violations.push(SpecViolation::new(
            "defaults",
            "defaults.metadata.spec cannot have 'name' field",
        ));
    }
    if defaults.metadata.templated.contains_key(NAME_KEY) {
        violations.push(SpecViolation::new(
            "defaults",
            "defaults.metadata.templated cannot have 'name' field",
        ));
    }
}

struct PackageWalker<'a, 'v> {
    declared: HashSet<&'a str>,
    /// Normalized destination of every output package seen so far, with its location
    destinations: HashMap<PathBuf, String>,
    violations: &'v mut Vec<SpecViolation>,
}

impl<'a> PackageWalker<'a, '_> {
    fn walk(&mut self, packages: &'a [ResolvedPackage], parent: &str, parent_enabled: bool) {
        for (idx, pkg) in packages.iter().enumerate() {
            let location = if pkg.name.is_empty() {
                join_location(parent, &format!("packages[{}]", idx))
            } else {
                pkg.dst_path.clone()
            };
            let enabled = parent_enabled && pkg.enabled;

            self.check_package(pkg, &location, enabled);
            self.walk(&pkg.packages, &location, enabled);
        }
    }

    fn check_package(&mut self, pkg: &'a ResolvedPackage, location: &str, enabled: bool) {
        if pkg.name.is_empty() {
            self.push(location, "packages must have 'name'");
        } else if !is_relative_clean(&pkg.name) {
            self.push(
                location,
                format!("name '{}' must be a relative path without '..'", pkg.name),
            );
        }

        match (&pkg.source_path, pkg.stub) {
            (Some(_), true) => self.push(location, "package cannot be a stub and have 'sourcePath'"),
            (Some(path), false) if path.is_empty() => self.push(location, "package needs 'sourcePath'"),
            (None, false) => self.push(location, "package needs 'sourcePath'"),
            (Some(path), false) if !is_relative_clean(path) => self.push(
                location,
                format!("sourcePath '{}' must be a relative path without '..'", path),
            ),
            _ => {}
        }

        if !enabled {
            return;
        }

        if pkg.upstream.is_empty() {
            self.push(location, "package has no upstream");
        } else if !self.declared.contains(pkg.upstream.as_str()) {
            self.push(
                location,
                format!("upstream '{}' is not declared", pkg.upstream),
            );
        }
        if pkg.source_ref.is_empty() {
            self.push(location, "package has no ref");
        }

        if pkg.is_output() && !pkg.name.is_empty() {
            let destination = normalize(&pkg.dst_path);
            if let Some(first) = self.destinations.get(&destination) {
                let message = format!(
                    "destination path '{}' already used by package at {}",
                    pkg.dst_path, first
                );
                self.push(location, message);
            } else {
                self.destinations.insert(destination, location.to_string());
            }
        }
    }

    fn push(&mut self, location: &str, message: impl Into<String>) {
        self.violations.push(SpecViolation::new(location, message));
    }
}

fn join_location(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}/{}", parent, child)
    }
}

/// True when `path` stays below the directory it is joined onto
pub fn is_relative_clean(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// `a/`, `./a` and `a` all name the same destination
fn normalize(path: &str) -> PathBuf {
    Path::new(path)
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}
