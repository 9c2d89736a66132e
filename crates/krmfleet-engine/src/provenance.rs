//! Provenance records written into materialized packages

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use krmfleet_core::kptfile::{KPTFILE_NAME, PACKAGE_CONTEXT_FILE};
use krmfleet_core::{Kptfile, PackageContext, UpstreamOrigin};

use crate::error::{EngineError, Result};

/// Write `package-context.yaml` and create or update the `Kptfile` in `dir`
///
/// An existing Kptfile keeps every field except its name, namespace and
/// upstream records.
pub fn update_kpt_metadata(
    dir: &Path,
    package: &str,
    data: &BTreeMap<String, String>,
    origin: &UpstreamOrigin,
) -> Result<()> {
    let fail = |message: String| EngineError::Provenance {
        package: package.to_string(),
        path: dir.to_path_buf(),
        message,
    };

    let context = PackageContext::new(data.clone())
        .to_yaml()
        .map_err(|e| fail(e.to_string()))?;
    fs::write(dir.join(PACKAGE_CONTEXT_FILE), context)
        .map_err(|e| fail(format!("{}: {}", PACKAGE_CONTEXT_FILE, e)))?;

    let kptfile_path = dir.join(KPTFILE_NAME);
    let mut kptfile = if kptfile_path.is_file() {
        let existing = fs::read(&kptfile_path).map_err(|e| fail(format!("{}: {}", KPTFILE_NAME, e)))?;
        Kptfile::parse(&kptfile_path.display().to_string(), &existing)
            .map_err(|e| fail(e.to_string()))?
    } else {
        Kptfile::new(package)
    };
    kptfile.set_origin(package, origin);

    let yaml = kptfile.to_yaml().map_err(|e| fail(e.to_string()))?;
    fs::write(&kptfile_path, yaml).map_err(|e| fail(format!("{}: {}", KPTFILE_NAME, e)))?;

    debug!(package = %package, dir = %dir.display(), commit = %origin.commit, "wrote package metadata");
    Ok(())
}
