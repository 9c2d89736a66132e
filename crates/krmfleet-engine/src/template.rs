//! Rendering of templated package metadata
//!
//! Each `metadata.templated` value is a MiniJinja template evaluated against
//! the package's resolved origin. Undefined variables are errors.

use std::collections::BTreeMap;

use minijinja::{Environment, UndefinedBehavior, context};

use krmfleet_core::ResolvedPackage;

use crate::error::{EngineError, Result, TemplateErrorKind};
use crate::filters;

/// Values a metadata template can reference
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub name: String,
    pub commit: String,
    pub rev: String,
    pub src_path: String,
    pub dst_path: String,
}

/// Renders `templated` metadata for materialized packages
pub struct MetadataRenderer {
    env: Environment<'static>,
}

impl Default for MetadataRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        // Only the package context is visible to templates; builtin
        // functions like `range` or `namespace` would shadow unknown names.
        let builtins: Vec<String> = env.globals().map(|(name, _)| name.to_string()).collect();
        for name in &builtins {
            env.remove_global(name);
        }
        filters::register(&mut env);
        Self { env }
    }

    /// Render each template of `templated`, keyed as declared
    pub fn render(
        &self,
        package: &str,
        templated: &BTreeMap<String, String>,
        ctx: &TemplateContext,
        spec: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        let values = context! {
            name => &ctx.name,
            commit => &ctx.commit,
            rev => &ctx.rev,
            srcPath => &ctx.src_path,
            dstPath => &ctx.dst_path,
            spec => spec,
        };

        templated
            .iter()
            .map(|(key, template)| {
                let rendered = self.env.render_str(template, &values).map_err(|e| {
                    EngineError::Template {
                        package: package.to_string(),
                        key: key.clone(),
                        kind: TemplateErrorKind::from_minijinja(e.kind()),
                        message: e.to_string(),
                    }
                })?;
                Ok((key.clone(), rendered))
            })
            .collect()
    }

    /// Merged spec of a package with its rendered templates laid over it
    pub fn package_metadata(
        &self,
        package: &ResolvedPackage,
        ctx: &TemplateContext,
    ) -> Result<BTreeMap<String, String>> {
        let rendered = self.render(
            &package.name,
            &package.merged_templated,
            ctx,
            &package.merged_spec,
        )?;
        let mut data = package.merged_spec.clone();
        data.extend(rendered);
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TemplateContext {
        TemplateContext {
            name: "bar1".to_string(),
            commit: "0123456789abcdef".to_string(),
            rev: "main".to_string(),
            src_path: "p3".to_string(),
            dst_path: "out/bar/bar1".to_string(),
        }
    }

    fn templates(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_context_variables() {
        let renderer = MetadataRenderer::new();
        let out = renderer
            .render(
                "bar1",
                &templates(&[
                    ("origin", "{{ rev }}@{{ commit | trunc(7) }}"),
                    ("paths", "{{ srcPath }} -> {{ dstPath }}"),
                    ("short", "{{ name | sha256sum | trunc(2) }}"),
                ]),
                &ctx(),
                &BTreeMap::new(),
            )
            .unwrap();

        assert_eq!(out["origin"], "main@0123456");
        assert_eq!(out["paths"], "p3 -> out/bar/bar1");
        assert_eq!(out["short"], filters::sha256sum("bar1".to_string())[..2]);
    }

    #[test]
    fn test_render_can_read_spec() {
        let renderer = MetadataRenderer::new();
        let spec = templates(&[("team", "platform")]);
        let out = renderer
            .render("bar1", &templates(&[("owner", "{{ spec.team }}-{{ name }}")]), &ctx(), &spec)
            .unwrap();
        assert_eq!(out["owner"], "platform-bar1");
    }

    #[test]
    fn test_undefined_variable_fails() {
        let renderer = MetadataRenderer::new();
        let err = renderer
            .render("bar1", &templates(&[("bad", "{{ namespace }}")]), &ctx(), &BTreeMap::new())
            .unwrap_err();
        match err {
            EngineError::Template { package, key, kind, .. } => {
                assert_eq!(package, "bar1");
                assert_eq!(key, "bad");
                assert_eq!(kind, TemplateErrorKind::UndefinedVariable);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_builtin_globals_are_not_variables() {
        let renderer = MetadataRenderer::new();
        for name in ["range", "dict", "debug", "namespace"] {
            let template = format!("{{{{ {} }}}}", name);
            let err = renderer
                .render("bar1", &templates(&[("bad", template.as_str())]), &ctx(), &BTreeMap::new())
                .unwrap_err();
            assert!(
                matches!(err, EngineError::Template { kind: TemplateErrorKind::UndefinedVariable, .. }),
                "{name} should be undefined"
            );
        }
    }

    #[test]
    fn test_builtin_filters_still_available() {
        let renderer = MetadataRenderer::new();
        let out = renderer
            .render("bar1", &templates(&[("upper", "{{ name | upper }}")]), &ctx(), &BTreeMap::new())
            .unwrap();
        assert_eq!(out["upper"], "BAR1");
    }

    #[test]
    fn test_syntax_error_fails() {
        let renderer = MetadataRenderer::new();
        let err = renderer
            .render("bar1", &templates(&[("bad", "{{ name ")]), &ctx(), &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Template { kind: TemplateErrorKind::SyntaxError, .. }
        ));
    }

    #[test]
    fn test_rendered_values_override_spec() {
        let renderer = MetadataRenderer::new();
        let package = ResolvedPackage {
            name: "bar1".to_string(),
            merged_spec: templates(&[("name", "bar1"), ("env", "static"), ("k1", "v1")]),
            merged_templated: templates(&[("env", "{{ rev }}")]),
            ..Default::default()
        };
        let data = renderer.package_metadata(&package, &ctx()).unwrap();
        assert_eq!(data, templates(&[("name", "bar1"), ("env", "main"), ("k1", "v1")]));
    }
}
