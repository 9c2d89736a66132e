//! Flattened views over the resolved package tree

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::fleet::{SourceRef, UpstreamId};
use crate::resolve::ResolvedPackage;

/// A package that is materialized to disk
#[derive(Debug, Clone)]
pub struct OutputPackage<'a> {
    pub package: &'a ResolvedPackage,
    /// Absolute destination (output base joined with the package's relative path)
    pub dst_path: PathBuf,
}

/// Collect enabled, non-stub packages in declaration order (pre-order)
///
/// A disabled node removes its whole subtree. Stub nodes are not output
/// themselves but their children are visited.
pub fn collect_output_packages<'a>(
    packages: &'a [ResolvedPackage],
    base: &Path,
) -> Vec<OutputPackage<'a>> {
    let mut out = Vec::new();
    collect_into(packages, base, &mut out);
    out
}

fn collect_into<'a>(packages: &'a [ResolvedPackage], base: &Path, out: &mut Vec<OutputPackage<'a>>) {
    for pkg in packages {
        if !pkg.enabled {
            continue;
        }
        if !pkg.stub {
            out.push(OutputPackage {
                package: pkg,
                dst_path: base.join(&pkg.dst_path),
            });
        }
        collect_into(&pkg.packages, base, out);
    }
}

/// Distinct refs each upstream must provide for the enabled, non-stub packages
pub fn compute_references(packages: &[ResolvedPackage]) -> BTreeMap<UpstreamId, BTreeSet<SourceRef>> {
    let mut refs: BTreeMap<UpstreamId, BTreeSet<SourceRef>> = BTreeMap::new();
    for output in collect_output_packages(packages, Path::new("")) {
        refs.entry(output.package.upstream.clone())
            .or_default()
            .insert(output.package.source_ref.clone());
    }
    refs
}

/// Print the tree, one line per node, indented by depth
pub fn write_tree<W: Write>(packages: &[ResolvedPackage], mut out: W) -> io::Result<()> {
    write_level(packages, 0, true, &mut out)
}

fn write_level<W: Write>(
    packages: &[ResolvedPackage],
    depth: usize,
    parent_enabled: bool,
    out: &mut W,
) -> io::Result<()> {
    for pkg in packages {
        let enabled = parent_enabled && pkg.enabled;
        let indent = "  ".repeat(depth);
        let mut markers = Vec::new();
        if pkg.stub {
            markers.push("stub");
        }
        if !enabled {
            markers.push("disabled");
        }

        write!(out, "{}{}: ", indent, pkg.name)?;
        if pkg.stub {
            write!(out, "-")?;
        } else {
            write!(
                out,
                "{}@{}:{}",
                pkg.upstream,
                pkg.source_ref,
                pkg.source_path()
            )?;
        }
        write!(out, " -> {}", pkg.dst_path)?;
        if !markers.is_empty() {
            write!(out, " ({})", markers.join(", "))?;
        }
        writeln!(out)?;

        write_level(&pkg.packages, depth + 1, enabled, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::parse_fleet_spec;

    const SCENARIO: &str = r#"
apiVersion: fn.kpt.dev/v1alpha1
kind: Fleet
metadata:
  name: scenario
spec:
  upstreams:
  - name: repoA
    git:
      repo: https://example.com/repoA.git
  defaults:
    ref: main
  packages:
  - name: foo
    sourcePath: p1
  - name: bar
    sourcePath: p2
    packages:
    - name: bar1
      sourcePath: p3
"#;

    const MIXED: &str = r#"
spec:
  upstreams:
  - name: catalog
    git:
      repo: https://example.com/catalog.git
  defaults:
    ref: main
  packages:
  - name: platform
    stub: true
    packages:
    - name: ingress
      sourcePath: pkg/ingress
      ref: v2
    - name: dns
      sourcePath: pkg/dns
  - name: legacy
    enabled: false
    sourcePath: pkg/legacy
    packages:
    - name: legacy-child
      enabled: true
      sourcePath: pkg/child
  - name: monitoring
    sourcePath: pkg/monitoring
    ref: v2
"#;

    #[test]
    fn test_scenario_output_packages() {
        let fleet = parse_fleet_spec(SCENARIO.as_bytes()).unwrap();
        let outputs = collect_output_packages(&fleet.packages, Path::new("/out/scenario"));

        let dsts: Vec<_> = outputs.iter().map(|o| o.dst_path.clone()).collect();
        assert_eq!(
            dsts,
            vec![
                PathBuf::from("/out/scenario/foo"),
                PathBuf::from("/out/scenario/bar"),
                PathBuf::from("/out/scenario/bar/bar1"),
            ]
        );
        let sources: Vec<_> = outputs.iter().map(|o| o.package.source_path()).collect();
        assert_eq!(sources, vec!["p1", "p2", "p3"]);

        let refs = compute_references(&fleet.packages);
        assert_eq!(refs.len(), 1);
        let repo_a = &refs[&UpstreamId::from("repoA")];
        assert_eq!(repo_a.iter().map(|r| r.as_str()).collect::<Vec<_>>(), vec!["main"]);
    }

    #[test]
    fn test_disabled_subtree_and_stubs() {
        let fleet = parse_fleet_spec(MIXED.as_bytes()).unwrap();
        let outputs = collect_output_packages(&fleet.packages, Path::new("base"));
        let names: Vec<_> = outputs.iter().map(|o| o.package.name.as_str()).collect();
        assert_eq!(names, vec!["ingress", "dns", "monitoring"]);
        assert_eq!(outputs[0].dst_path, PathBuf::from("base/platform/ingress"));

        let refs = compute_references(&fleet.packages);
        let catalog: Vec<_> = refs[&UpstreamId::from("catalog")]
            .iter()
            .map(|r| r.to_string())
            .collect();
        assert_eq!(catalog, vec!["main", "v2"]);
    }

    #[test]
    fn test_write_tree() {
        let fleet = parse_fleet_spec(MIXED.as_bytes()).unwrap();
        let mut buf = Vec::new();
        write_tree(&fleet.packages, &mut buf).unwrap();
        let printed = String::from_utf8(buf).unwrap();

        insta::assert_snapshot!(printed.trim_end(), @r"
        platform: - -> platform (stub)
          ingress: catalog@v2:pkg/ingress -> platform/ingress
          dns: catalog@main:pkg/dns -> platform/dns
        legacy: catalog@main:pkg/legacy -> legacy (disabled)
          legacy-child: catalog@main:pkg/child -> legacy/legacy-child (disabled)
        monitoring: catalog@v2:pkg/monitoring -> monitoring
        ");
    }
}
