//! krmfleet Source - upstream working copies
//!
//! This crate owns the local git working copies a fleet is composed from:
//!
//! - **Registry**: one working copy per distinct upstream identity, cloned once
//!   and checked out on demand as packages need different refs
//! - **Git backends**: the `git` CLI for real runs, an in-memory mock for tests
//! - **Authentication**: anonymous, SSH agent (with per-key retry) and SSH
//!   private keys taken from `Secret` objects in the resource list
//!
//! ## Example
//!
//! ```rust,no_run
//! use krmfleet_core::{ResourceList, SourceRef, parse_fleet_spec};
//! use krmfleet_source::{GitCli, SecretCredentials, SourceRegistry};
//!
//! # fn example(data: &[u8], list: &ResourceList) -> Result<(), Box<dyn std::error::Error>> {
//! let fleet = parse_fleet_spec(data)?;
//! let mut registry = SourceRegistry::new(GitCli::new(), "/tmp/sources");
//! let credentials = SecretCredentials::new(&list.items);
//!
//! let upstream = &fleet.upstreams[0];
//! registry.resolve(upstream, &credentials)?;
//! let commit = registry.ensure_version(upstream, &SourceRef::from("main"))?;
//! println!("checked out {}", commit);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod credentials;
pub mod error;
pub mod git;
pub mod mock;
pub mod registry;

pub use auth::GitAuth;
pub use credentials::{CredentialProvider, NoCredentials, SecretCredentials, SshCredentials, git_auth};
pub use error::{Result, SourceError};
pub use git::{GitBackend, GitCli};
pub use mock::{MockGitBackend, MockRepo, OperationCounts};
pub use registry::{PackageSource, SourceRegistry, UpstreamIdentity, canonical_repo};
