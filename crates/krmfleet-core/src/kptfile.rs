//! Package provenance records
//!
//! Every materialized package gets a `Kptfile` whose `upstream` and
//! `upstreamLock` point at the exact repository, directory, ref and commit it
//! came from, plus a `package-context.yaml` ConfigMap carrying its metadata.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};
use crate::resource::{ObjectMeta, annotations};

/// File name of the kpt package manifest
pub const KPTFILE_NAME: &str = "Kptfile";

pub const KPTFILE_API_VERSION: &str = "kpt.dev/v1";

pub const KPTFILE_KIND: &str = "Kptfile";

/// File name of the package context ConfigMap
pub const PACKAGE_CONTEXT_FILE: &str = "package-context.yaml";

/// Object name of the package context ConfigMap
pub const PACKAGE_CONTEXT_NAME: &str = "kptfile.kpt.dev";

const UPSTREAM_TYPE_GIT: &str = "git";

const UPDATE_STRATEGY: &str = "resource-merge";

/// Where a package was fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamOrigin {
    pub repo: String,
    /// Path inside the repository, without leading `/`
    pub directory: String,
    pub git_ref: String,
    pub commit: String,
}

impl UpstreamOrigin {
    fn kpt_directory(&self) -> String {
        format!("/{}", self.directory.trim_start_matches('/'))
    }
}

/// A kpt package manifest
///
/// Only the fields written by the materializer are modelled; anything else in
/// an existing Kptfile (pipeline, info, inventory, ...) is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Kptfile {
    pub api_version: String,
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<KptUpstream>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_lock: Option<KptUpstreamLock>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KptUpstream {
    #[serde(rename = "type")]
    pub kind: String,
    pub git: KptGit,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub update_strategy: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KptUpstreamLock {
    #[serde(rename = "type")]
    pub kind: String,
    pub git: KptGitLock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KptGit {
    pub repo: String,
    pub directory: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KptGitLock {
    pub repo: String,
    pub directory: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub commit: String,
}

impl Kptfile {
    /// An empty Kptfile for a package
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            api_version: KPTFILE_API_VERSION.to_string(),
            kind: KPTFILE_KIND.to_string(),
            metadata: ObjectMeta {
                name: name.into(),
                ..Default::default()
            },
            upstream: None,
            upstream_lock: None,
            extra: BTreeMap::new(),
        }
    }

    /// Parse an existing Kptfile; `path` is only used for error messages
    pub fn parse(path: &str, data: &[u8]) -> Result<Self> {
        let kptfile: Self = serde_yaml::from_slice(data).map_err(|e| CoreError::InvalidKptfile {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        if kptfile.kind != KPTFILE_KIND {
            return Err(CoreError::InvalidKptfile {
                path: path.to_string(),
                message: format!("expected kind {}, found '{}'", KPTFILE_KIND, kptfile.kind),
            });
        }
        Ok(kptfile)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Point the Kptfile at its origin
    ///
    /// The package takes the given name and loses any namespace, matching what
    /// `kpt pkg get` produces.
    pub fn set_origin(&mut self, name: &str, origin: &UpstreamOrigin) {
        self.metadata.name = name.to_string();
        self.metadata.namespace = None;

        let directory = origin.kpt_directory();
        self.upstream = Some(KptUpstream {
            kind: UPSTREAM_TYPE_GIT.to_string(),
            git: KptGit {
                repo: origin.repo.clone(),
                directory: directory.clone(),
                git_ref: origin.git_ref.clone(),
            },
            update_strategy: UPDATE_STRATEGY.to_string(),
        });
        self.upstream_lock = Some(KptUpstreamLock {
            kind: UPSTREAM_TYPE_GIT.to_string(),
            git: KptGitLock {
                repo: origin.repo.clone(),
                directory,
                git_ref: origin.git_ref.clone(),
                commit: origin.commit.clone(),
            },
        });
    }
}

/// ConfigMap exposing package metadata to kpt functions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageContext {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl PackageContext {
    pub fn new(data: BTreeMap<String, String>) -> Self {
        let mut metadata = ObjectMeta {
            name: PACKAGE_CONTEXT_NAME.to_string(),
            ..Default::default()
        };
        metadata
            .annotations
            .insert(annotations::LOCAL_CONFIG.to_string(), "true".to_string());

        Self {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            metadata,
            data,
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
