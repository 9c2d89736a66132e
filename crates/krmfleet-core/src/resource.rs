//! Minimal Kubernetes Resource Model types
//!
//! Items are kept as untyped YAML mappings so that everything passing through
//! a function is preserved exactly; typed views are produced on demand.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CoreError, Result};

/// API version of a KRM function ResourceList
pub const RESOURCE_LIST_API_VERSION: &str = "config.kubernetes.io/v1";

/// Kind of a KRM function ResourceList
pub const RESOURCE_LIST_KIND: &str = "ResourceList";

/// Well-known annotations
pub mod annotations {
    /// File the object was read from, relative to the package root
    pub const PATH: &str = "config.kubernetes.io/path";
    /// Position of the object inside its file
    pub const INDEX: &str = "config.kubernetes.io/index";
    /// Internal mirror of [`PATH`]
    pub const INTERNAL_PATH: &str = "internal.config.kubernetes.io/path";
    /// Internal mirror of [`INDEX`]
    pub const INTERNAL_INDEX: &str = "internal.config.kubernetes.io/index";
    /// Marks an object as local configuration, never applied to a cluster
    pub const LOCAL_CONFIG: &str = "config.kubernetes.io/local-config";
}

/// Standard object metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Fields not modelled above, kept verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A single KRM object backed by a YAML mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct KubeObject(Mapping);

impl TryFrom<Value> for KubeObject {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Mapping(map) => Ok(Self(map)),
            other => Err(CoreError::InvalidResource {
                message: format!("expected a mapping, found {}", value_kind(&other)),
            }),
        }
    }
}

impl From<KubeObject> for Value {
    fn from(object: KubeObject) -> Self {
        Value::Mapping(object.0)
    }
}

impl KubeObject {
    /// Build an object from any serializable value
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self> {
        Self::try_from(serde_yaml::to_value(value)?)
    }

    /// Deserialize this object into a typed view
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_yaml::from_value(Value::Mapping(self.0.clone()))?)
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.0
    }

    pub fn api_version(&self) -> Option<&str> {
        self.get_str(&["apiVersion"])
    }

    pub fn kind(&self) -> Option<&str> {
        self.get_str(&["kind"])
    }

    pub fn name(&self) -> Option<&str> {
        self.get_str(&["metadata", "name"])
    }

    pub fn namespace(&self) -> Option<&str> {
        self.get_str(&["metadata", "namespace"])
    }

    /// Check the group/version and kind
    pub fn is_gvk(&self, api_version: &str, kind: &str) -> bool {
        self.api_version() == Some(api_version) && self.kind() == Some(kind)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.get_str(&["metadata", "annotations", key])
    }

    /// Set an annotation, creating `metadata.annotations` when missing
    pub fn set_annotation(&mut self, key: &str, value: &str) -> Result<()> {
        let metadata = child_mapping(&mut self.0, "metadata")?;
        let annotations = child_mapping(metadata, "annotations")?;
        annotations.insert(Value::from(key), Value::from(value));
        Ok(())
    }

    /// Look up a nested string field
    pub fn get_str(&self, path: &[&str]) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Look up a nested field
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.0.get(*first)?;
        for key in rest {
            current = current.as_mapping()?.get(*key)?;
        }
        Some(current)
    }
}

impl fmt::Display for KubeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.kind().unwrap_or("<unknown>"),
            self.name().unwrap_or("<unnamed>")
        )
    }
}

fn child_mapping<'a>(parent: &'a mut Mapping, key: &str) -> Result<&'a mut Mapping> {
    let entry = parent
        .entry(Value::from(key))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if entry.is_null() {
        *entry = Value::Mapping(Mapping::new());
    }
    entry
        .as_mapping_mut()
        .ok_or_else(|| CoreError::InvalidResource {
            message: format!("field '{}' is not a mapping", key),
        })
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Severity of a function result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    #[default]
    Info,
}

/// A human-readable message reported by a function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FnResult {
    pub message: String,

    #[serde(default)]
    pub severity: Severity,
}

impl FnResult {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Info,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Error,
        }
    }
}

pub type Results = Vec<FnResult>;

/// The envelope exchanged by KRM functions on stdin/stdout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceList {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_kind")]
    pub kind: String,

    #[serde(default)]
    pub items: Vec<KubeObject>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_config: Option<KubeObject>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Results,
}

fn default_api_version() -> String {
    RESOURCE_LIST_API_VERSION.to_string()
}

fn default_kind() -> String {
    RESOURCE_LIST_KIND.to_string()
}

impl Default for ResourceList {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            items: Vec::new(),
            function_config: None,
            results: Vec::new(),
        }
    }
}

impl ResourceList {
    pub fn from_yaml(data: &[u8]) -> Result<Self> {
        let list: Self = serde_yaml::from_slice(data)?;
        if list.kind != RESOURCE_LIST_KIND {
            return Err(CoreError::InvalidResource {
                message: format!("expected kind {}, found '{}'", RESOURCE_LIST_KIND, list.kind),
            });
        }
        Ok(list)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
