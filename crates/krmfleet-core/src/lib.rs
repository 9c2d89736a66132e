//! krmfleet Core - Fleet specification model and package tree resolution
//!
//! This crate provides the pure, I/O free part of fleet composition:
//! - `Fleet`: The declarative document (upstreams, defaults, package tree)
//! - `ResolvedFleet`: The defaulted and validated package tree
//! - `OutputPackage`: The flattened list of packages to materialize
//! - `KubeObject` / `ResourceList`: Minimal KRM resource model
//! - `Kptfile` / `PackageContext`: Package provenance records

pub mod error;
pub mod fleet;
pub mod kptfile;
pub mod resolve;
pub mod resource;
pub mod tree;
mod validate;

pub use error::{CoreError, Result, SpecViolation};
pub use fleet::{
    AuthRef, Fleet, FleetSpec, GitAuthMethod, Metadata, MetadataMode, Package, PackageDefaults,
    SourceRef, Upstream, UpstreamGit, UpstreamId, UpstreamType,
};
pub use kptfile::{Kptfile, PackageContext, UpstreamOrigin};
pub use resolve::{ResolvedFleet, ResolvedPackage, parse_fleet_spec};
pub use resource::{FnResult, KubeObject, ObjectMeta, ResourceList, Results, Severity};
pub use validate::is_relative_clean;
pub use tree::{OutputPackage, collect_output_packages, compute_references, write_tree};
