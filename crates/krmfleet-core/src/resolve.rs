//! Fleet defaulting and resolution
//!
//! [`parse_fleet_spec`] turns raw bytes into a [`ResolvedFleet`]: every package
//! carries its effective upstream, ref, enabled flag, metadata and destination
//! path. The declared [`Fleet`] is never mutated; resolution is a top-down fold
//! that produces a new tree.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::fleet::{
    Fleet, Metadata, MetadataMode, Package, PackageDefaults, SourceRef, Upstream, UpstreamId,
};
use crate::resource::ObjectMeta;
use crate::validate;

/// Metadata key filled with the package name unless declared
pub const NAME_KEY: &str = "name";

/// A defaulted and validated Fleet
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFleet {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub upstreams: Vec<Upstream>,
    /// Root defaults after fix-ups (`enabled` set, sole upstream filled in)
    pub defaults: PackageDefaults,
    pub packages: Vec<ResolvedPackage>,
}

/// A package node with every inherited value made explicit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedPackage {
    pub name: String,
    pub upstream: UpstreamId,
    pub source_ref: SourceRef,
    pub enabled: bool,
    pub stub: bool,
    /// Path inside the upstream; defaults to the name for non-stub packages
    pub source_path: Option<String>,
    pub mode: MetadataMode,
    pub inherit_from_parent: bool,

    /// Declared spec with `name` filled in
    pub spec: BTreeMap<String, String>,
    /// Declared templated values
    pub templated: BTreeMap<String, String>,

    /// Effective spec after inheritance
    pub merged_spec: BTreeMap<String, String>,
    /// Effective templated values after inheritance, not yet rendered
    pub merged_templated: BTreeMap<String, String>,

    /// Destination relative to the fleet output root, `/` separated
    pub dst_path: String,

    pub packages: Vec<ResolvedPackage>,
}

impl ResolvedPackage {
    /// Whether this node produces file content of its own
    pub fn is_output(&self) -> bool {
        self.enabled && !self.stub
    }

    /// Source path, empty for stubs
    pub fn source_path(&self) -> &str {
        self.source_path.as_deref().unwrap_or("")
    }

    fn to_spec(&self) -> Package {
        Package {
            name: self.name.clone(),
            upstream: (!self.upstream.is_empty()).then(|| self.upstream.clone()),
            source_ref: (!self.source_ref.is_empty()).then(|| self.source_ref.clone()),
            enabled: Some(self.enabled),
            source_path: self.source_path.clone(),
            stub: Some(self.stub),
            metadata: Metadata {
                mode: Some(self.mode),
                spec: self.spec.clone(),
                templated: self.templated.clone(),
                inherit_from_parent: Some(self.inherit_from_parent),
            },
            packages: self.packages.iter().map(ResolvedPackage::to_spec).collect(),
        }
    }
}

impl ResolvedFleet {
    /// Default and validate a declared fleet
    pub fn from_fleet(fleet: &Fleet) -> Result<Self> {
        let defaults = root_defaults(fleet);
        let root = Inherited::root(&defaults);

        let packages = fleet
            .spec
            .packages
            .iter()
            .map(|p| resolve_package(p, &root))
            .collect();

        let resolved = Self {
            api_version: fleet.api_version.clone(),
            kind: fleet.kind.clone(),
            metadata: fleet.metadata.clone(),
            upstreams: fleet.spec.upstreams.clone(),
            defaults,
            packages,
        };

        validate::validate(&resolved)?;
        Ok(resolved)
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Look up a declared upstream by name
    pub fn upstream(&self, id: &UpstreamId) -> Option<&Upstream> {
        self.upstreams.iter().find(|u| &u.name == id)
    }

    /// Express the resolved tree as a fully explicit declared Fleet
    pub fn to_spec(&self) -> Fleet {
        let mut fleet = Fleet {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            metadata: self.metadata.clone(),
            ..Default::default()
        };
        fleet.spec.upstreams = self.upstreams.clone();
        fleet.spec.defaults = self.defaults.clone();
        fleet.spec.packages = self.packages.iter().map(ResolvedPackage::to_spec).collect();
        fleet
    }
}

/// Parse, default and validate a Fleet document
pub fn parse_fleet_spec(data: &[u8]) -> Result<ResolvedFleet> {
    let fleet = Fleet::from_yaml(data)?;
    ResolvedFleet::from_fleet(&fleet)
}

fn root_defaults(fleet: &Fleet) -> PackageDefaults {
    let mut defaults = fleet.spec.defaults.clone();
    if defaults.enabled.is_none() {
        defaults.enabled = Some(true);
    }
    if non_empty(&defaults.upstream).is_none() && fleet.spec.upstreams.len() == 1 {
        defaults.upstream = Some(fleet.spec.upstreams[0].name.clone());
    }
    defaults
}

/// Values a node falls back to when it leaves a field unset
struct Inherited<'a> {
    upstream: UpstreamId,
    source_ref: SourceRef,
    enabled: bool,
    mode: MetadataMode,
    merged_spec: &'a BTreeMap<String, String>,
    merged_templated: &'a BTreeMap<String, String>,
    dst_path: &'a str,
}

impl<'a> Inherited<'a> {
    fn root(defaults: &'a PackageDefaults) -> Self {
        Self {
            upstream: non_empty(&defaults.upstream).cloned().unwrap_or_default(),
            source_ref: non_empty(&defaults.source_ref).cloned().unwrap_or_default(),
            enabled: defaults.enabled.unwrap_or(true),
            mode: defaults.metadata.mode.unwrap_or_default(),
            merged_spec: &defaults.metadata.spec,
            merged_templated: &defaults.metadata.templated,
            dst_path: "",
        }
    }

    fn from_parent(parent: &'a ResolvedPackage) -> Self {
        Self {
            upstream: parent.upstream.clone(),
            source_ref: parent.source_ref.clone(),
            enabled: parent.enabled,
            mode: parent.mode,
            merged_spec: &parent.merged_spec,
            merged_templated: &parent.merged_templated,
            dst_path: &parent.dst_path,
        }
    }
}

fn resolve_package(pkg: &Package, inherited: &Inherited<'_>) -> ResolvedPackage {
    let stub = pkg.stub.unwrap_or(false);
    let inherit_from_parent = pkg.metadata.inherit_from_parent.unwrap_or(true);

    let source_path = match non_empty_str(&pkg.source_path) {
        Some(path) => Some(path.to_string()),
        None if !stub => Some(pkg.name.clone()),
        None => None,
    };

    let mut spec = pkg.metadata.spec.clone();
    spec.entry(NAME_KEY.to_string())
        .or_insert_with(|| pkg.name.clone());
    let templated = pkg.metadata.templated.clone();

    let (merged_spec, merged_templated) = if inherit_from_parent {
        (
            merge(inherited.merged_spec, &spec),
            merge(inherited.merged_templated, &templated),
        )
    } else {
        (spec.clone(), templated.clone())
    };

    let dst_path = if inherited.dst_path.is_empty() {
        pkg.name.clone()
    } else {
        format!("{}/{}", inherited.dst_path, pkg.name)
    };

    let mut resolved = ResolvedPackage {
        name: pkg.name.clone(),
        upstream: non_empty(&pkg.upstream)
            .cloned()
            .unwrap_or_else(|| inherited.upstream.clone()),
        source_ref: non_empty(&pkg.source_ref)
            .cloned()
            .unwrap_or_else(|| inherited.source_ref.clone()),
        enabled: pkg.enabled.unwrap_or(inherited.enabled),
        stub,
        source_path,
        mode: pkg.metadata.mode.unwrap_or(inherited.mode),
        inherit_from_parent,
        spec,
        templated,
        merged_spec,
        merged_templated,
        dst_path,
        packages: Vec::new(),
    };

    let children = {
        let from_parent = Inherited::from_parent(&resolved);
        pkg.packages
            .iter()
            .map(|child| resolve_package(child, &from_parent))
            .collect()
    };
    resolved.packages = children;
    resolved
}

fn merge(
    parent: &BTreeMap<String, String>,
    own: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = parent.clone();
    merged.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

fn non_empty<T: AsRef<str>>(value: &Option<T>) -> Option<&T> {
    value.as_ref().filter(|v| !v.as_ref().is_empty())
}

fn non_empty_str(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
