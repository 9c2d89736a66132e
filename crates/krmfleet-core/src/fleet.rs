//! Fleet document definition
//!
//! This is the declared view of a Fleet exactly as written by the user.
//! Nothing here is defaulted; see [`crate::resolve`] for the resolved tree.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;
use crate::resource::ObjectMeta;

/// API version of the Fleet resource
pub const FLEET_API_VERSION: &str = "fn.kpt.dev/v1alpha1";

/// Kind of the Fleet resource
pub const FLEET_KIND: &str = "Fleet";

/// Name of an upstream declaration
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpstreamId(pub String);

/// Revision indicator (branch, tag or commit) resolved against an upstream
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRef(pub String);

macro_rules! string_newtype {
    ($ty:ident) => {
        impl $ty {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $ty {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $ty {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_newtype!(UpstreamId);
string_newtype!(SourceRef);

/// A Fleet - upstream sources plus a tree of packages to compose
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fleet {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: FleetSpec,
}

impl Fleet {
    /// Deserialize a Fleet document without defaulting or validation
    pub fn from_yaml(data: &[u8]) -> Result<Self> {
        Ok(serde_yaml::from_slice(data)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstreams: Vec<Upstream>,

    #[serde(default)]
    pub defaults: PackageDefaults,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<Package>,
}

/// Upstream source type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamType {
    #[default]
    Git,
}

/// A named source declaration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    #[serde(default)]
    pub name: UpstreamId,

    #[serde(rename = "type", default)]
    pub kind: UpstreamType,

    #[serde(default)]
    pub git: UpstreamGit,
}

/// How to authenticate against a git upstream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GitAuthMethod {
    #[default]
    #[serde(alias = "")]
    None,
    SshAgent,
    SshPrivateKey,
}

impl GitAuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SshAgent => "sshAgent",
            Self::SshPrivateKey => "sshPrivateKey",
        }
    }
}

impl fmt::Display for GitAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamGit {
    #[serde(default)]
    pub repo: String,

    #[serde(default)]
    pub auth_method: GitAuthMethod,

    /// Credential object holding the key, required for `sshPrivateKey`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthRef>,
}

/// Reference to a credential object in the resource list
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthRef {
    #[serde(default)]
    pub kind: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl AuthRef {
    /// Namespace, falling back to `default`
    pub fn namespace_or_default(&self) -> &str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => "default",
        }
    }
}

/// Defaults applied to packages that leave fields unset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamId>,

    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<SourceRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default)]
    pub metadata: Metadata,
}

/// A node in the package tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamId>,

    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<SourceRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Path of the package inside the upstream repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,

    /// Stub packages have no content and only anchor their children
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stub: Option<bool>,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<Package>,
}

/// What to write next to a materialized package
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetadataMode {
    /// Kptfile with upstream lock plus a package context ConfigMap
    #[default]
    KptForDeployment,
    /// Copy files only
    None,
}

/// Package metadata, inherited down the tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<MetadataMode>,

    /// Literal key/values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub spec: BTreeMap<String, String>,

    /// Key/values rendered as templates when the package is materialized
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub templated: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherit_from_parent: Option<bool>,
}
