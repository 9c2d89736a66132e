//! Reading materialized files back as resource-list items

use std::fs;
use std::path::Path;

use glob::Pattern;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::debug;
use walkdir::WalkDir;

use krmfleet_core::KubeObject;
use krmfleet_core::resource::annotations;

use crate::error::{EngineError, Result};

/// File selection for [`filesystem_to_objects`]
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Glob patterns matched against file names
    pub match_globs: Vec<String>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            match_globs: vec!["*".to_string()],
        }
    }
}

/// Parse every matching file under `root` into KRM objects
///
/// Files are read in sorted order. Each object is annotated with its path
/// relative to `root` and its position among the objects of its file.
pub fn filesystem_to_objects(root: &Path, options: &BridgeOptions) -> Result<Vec<KubeObject>> {
    let patterns = options
        .match_globs
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| EngineError::InvalidPattern {
                pattern: p.clone(),
                message: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut objects = Vec::new();
    if !root.exists() {
        return Ok(objects);
    }

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if !patterns.iter().any(|p| p.matches(&file_name)) {
            continue;
        }

        let rel = relative_path(root, entry.path());
        let content = fs::read_to_string(entry.path())?;
        let parsed = parse_documents(&content, &rel).map_err(|message| {
            EngineError::MalformedResource {
                path: entry.path().to_path_buf(),
                message,
            }
        })?;
        debug!(path = %rel, objects = parsed.len(), "read resources");
        objects.extend(parsed);
    }
    Ok(objects)
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn parse_documents(content: &str, rel: &str) -> std::result::Result<Vec<KubeObject>, String> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(document).map_err(|e| e.to_string())?;
        if value.is_null() {
            continue;
        }
        let mut object = KubeObject::try_from(value).map_err(|e| e.to_string())?;

        let index = objects.len().to_string();
        for (key, val) in [
            (annotations::PATH, rel),
            (annotations::INDEX, index.as_str()),
            (annotations::INTERNAL_PATH, rel),
            (annotations::INTERNAL_INDEX, index.as_str()),
        ] {
            object.set_annotation(key, val).map_err(|e| e.to_string())?;
        }
        objects.push(object);
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_reads_multi_document_files() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "fleet/foo/resources.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n",
        );
        write(tmp.path(), "fleet/bar/cm.yaml", "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: c\n");
        write(tmp.path(), "fleet/foo/.git/config", "not: yaml: [");

        let objects = filesystem_to_objects(tmp.path(), &BridgeOptions::default()).unwrap();
        let names: Vec<_> = objects.iter().map(|o| o.name().unwrap()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);

        assert_eq!(objects[0].annotation(annotations::PATH), Some("fleet/bar/cm.yaml"));
        assert_eq!(objects[2].annotation(annotations::PATH), Some("fleet/foo/resources.yaml"));
        assert_eq!(objects[2].annotation(annotations::INDEX), Some("1"));
        assert_eq!(objects[2].annotation(annotations::INTERNAL_INDEX), Some("1"));
        assert_eq!(
            objects[2].annotation(annotations::INTERNAL_PATH),
            Some("fleet/foo/resources.yaml")
        );
    }

    #[test]
    fn test_match_globs() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.yaml", "kind: A\n");
        write(tmp.path(), "README.md", "# not a resource\n");

        let options = BridgeOptions {
            match_globs: vec!["*.yaml".to_string(), "Kptfile".to_string()],
        };
        let objects = filesystem_to_objects(tmp.path(), &options).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].kind(), Some("A"));
    }

    #[test]
    fn test_malformed_yaml_is_fatal() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "bad.yaml", "kind: [unclosed\n");
        let err = filesystem_to_objects(tmp.path(), &BridgeOptions::default()).unwrap_err();
        assert!(matches!(err, EngineError::MalformedResource { .. }));
    }

    #[test]
    fn test_non_mapping_document_is_fatal() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "list.yaml", "- a\n- b\n");
        let err = filesystem_to_objects(tmp.path(), &BridgeOptions::default()).unwrap_err();
        assert!(matches!(err, EngineError::MalformedResource { .. }));
    }

    #[test]
    fn test_invalid_pattern_and_missing_root() {
        let tmp = TempDir::new().unwrap();
        let options = BridgeOptions {
            match_globs: vec!["[".to_string()],
        };
        assert!(matches!(
            filesystem_to_objects(tmp.path(), &options),
            Err(EngineError::InvalidPattern { .. })
        ));
        assert!(
            filesystem_to_objects(&tmp.path().join("absent"), &BridgeOptions::default())
                .unwrap()
                .is_empty()
        );
    }
}
