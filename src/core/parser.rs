//! SH-002: YAML parsing and validation.
//!
//! Parses builder.yaml, resource manifests and workflow templates, and
//! validates structural constraints:
//! - Version must be "1.0"
//! - At least one environment target
//! - Stage indices unique, stage applets declared or buildable
//! - Internal resource references exist in the manifest

use super::error::{BuildError, Result};
use super::types::*;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn parse_file<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        BuildError::Config(format!("cannot read {} {}: {}", what, path.display(), e))
    })?;
    serde_yaml_ng::from_str(&content).map_err(|e| {
        BuildError::Config(format!("{} {} is malformed: {}", what, path.display(), e))
    })
}

/// Parse builder.yaml from disk.
pub fn parse_config_file(path: &Path) -> Result<BuilderConfig> {
    parse_file(path, "builder config")
}

/// Parse builder.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<BuilderConfig> {
    serde_yaml_ng::from_str(yaml)
        .map_err(|e| BuildError::Config(format!("YAML parse error: {}", e)))
}

/// Parse a workflow template from disk.
pub fn parse_template_file(path: &Path) -> Result<WorkflowTemplate> {
    parse_file(path, "workflow template")
}

/// Parse a workflow template from a string.
pub fn parse_template(yaml: &str) -> Result<WorkflowTemplate> {
    serde_yaml_ng::from_str(yaml)
        .map_err(|e| BuildError::Config(format!("workflow template parse error: {}", e)))
}

pub fn parse_internal_manifest(path: &Path) -> Result<InternalManifest> {
    parse_file(path, "internal resource manifest")
}

pub fn parse_external_manifest(path: &Path) -> Result<ExternalManifest> {
    parse_file(path, "external resource manifest")
}

/// Validate a parsed builder config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &BuilderConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(ValidationError {
            message: format!("version must be \"1.0\", got \"{}\"", config.version),
        });
    }

    let envs = &config.environments;
    if envs.production.is_none() && envs.develop.is_none() && envs.hotfix.is_none() {
        errors.push(ValidationError {
            message: "no environments configured".to_string(),
        });
    }

    for key in [
        EnvironmentKey::Production,
        EnvironmentKey::Develop,
        EnvironmentKey::Hotfix,
    ] {
        if let Some(target) = envs.get(key) {
            if target.namespace.is_empty() {
                errors.push(ValidationError {
                    message: format!("environment '{}' has an empty namespace", key),
                });
            }
            if !target.path.starts_with('/') {
                errors.push(ValidationError {
                    message: format!(
                        "environment '{}' path '{}' must be absolute",
                        key, target.path
                    ),
                });
            }
        }
    }

    for (name, decl) in &config.applets {
        if name.is_empty() {
            errors.push(ValidationError {
                message: "applet declaration with empty name".to_string(),
            });
        }
        for ext in &decl.external {
            if ext.name.is_empty() {
                errors.push(ValidationError {
                    message: format!("applet '{}' has an external resource with no name", name),
                });
            }
        }
    }

    errors
}

/// Validate a workflow template's structure (link ordering is checked by
/// the resolver).
pub fn validate_template(
    template: &WorkflowTemplate,
    config: &BuilderConfig,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if template.name.is_empty() {
        errors.push(ValidationError {
            message: "workflow name must not be empty".to_string(),
        });
    }
    if template.stages.is_empty() {
        errors.push(ValidationError {
            message: format!("workflow '{}' has no stages", template.name),
        });
    }

    let mut seen = HashSet::new();
    for stage in &template.stages {
        if !seen.insert(stage.index) {
            errors.push(ValidationError {
                message: format!(
                    "workflow '{}' declares stage index {} more than once",
                    template.name, stage.index
                ),
            });
        }
        if !stage.folder.starts_with('/') {
            errors.push(ValidationError {
                message: format!(
                    "stage {} output folder '{}' must be absolute",
                    stage.index, stage.folder
                ),
            });
        }
        let context = stage.context_inputs();
        let duplicates = stage
            .input
            .keys()
            .filter(|key| stage.linked_input.contains_key(*key) || context.contains_key(*key))
            .chain(
                stage
                    .linked_input
                    .keys()
                    .filter(|key| context.contains_key(*key)),
            );
        for key in duplicates {
            errors.push(ValidationError {
                message: format!("stage {} input '{}' is declared twice", stage.index, key),
            });
        }
    }

    for applet in template.applet_names() {
        if !template.applets.contains_key(&applet) && !config.applets.contains_key(&applet) {
            errors.push(ValidationError {
                message: format!(
                    "workflow '{}' uses applet '{}' with no resource declaration",
                    template.name, applet
                ),
            });
        }
    }

    errors
}

/// Check that every internal resource an applet declares exists in the manifest.
pub fn validate_internal_refs(
    applet: &str,
    decl: &AppletDecl,
    manifest: &InternalManifest,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for (category, names) in &decl.internal {
        let Some(entries) = manifest.resources.get(category) else {
            errors.push(ValidationError {
                message: format!(
                    "applet '{}' references unknown resource category '{}'",
                    applet, category
                ),
            });
            continue;
        };
        for name in names {
            if !entries.contains_key(name) {
                errors.push(ValidationError {
                    message: format!(
                        "applet '{}' references unknown internal resource '{}/{}'",
                        applet, category, name
                    ),
                });
            }
        }
    }
    errors
}

/// Fold a list of validation errors into a single configuration error.
pub fn into_result(errors: Vec<ValidationError>) -> Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    let joined = errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    Err(BuildError::Config(format!(
        "{} validation error(s): {}",
        errors.len(),
        joined
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
version: "1.0"
environments:
  develop:
    namespace: project-dev
    path: "/{{release}}/{{branch}}"
applets:
  bcl2fastq:
    internal:
      python_packages: [pipeline_utils]
  qc: {}
"#;

    #[test]
    fn test_sh002_parse_valid() {
        let config = parse_config(CONFIG).unwrap();
        let errors = validate_config(&config);
        assert!(
            errors.is_empty(),
            "unexpected errors: {:?}",
            errors.iter().map(|e| &e.message).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_sh002_bad_version() {
        let config = parse_config(
            r#"
version: "2.0"
environments:
  develop: { namespace: p }
"#,
        )
        .unwrap();
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("version")));
    }

    #[test]
    fn test_sh002_no_environments() {
        let config = parse_config("version: \"1.0\"\nenvironments: {}\n").unwrap();
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("no environments")));
    }

    #[test]
    fn test_sh002_relative_path_template() {
        let config = parse_config(
            r#"
version: "1.0"
environments:
  hotfix: { namespace: p, path: "builds/{{release}}" }
"#,
        )
        .unwrap();
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("must be absolute")));
    }

    #[test]
    fn test_sh002_duplicate_stage_index() {
        let config = parse_config(CONFIG).unwrap();
        let template = parse_template(
            r#"
name: wf
stages:
  - { index: 0, applet: bcl2fastq }
  - { index: 0, applet: qc }
"#,
        )
        .unwrap();
        let errors = validate_template(&template, &config);
        assert!(errors.iter().any(|e| e.message.contains("more than once")));
    }

    #[test]
    fn test_sh002_undeclared_applet() {
        let config = parse_config(CONFIG).unwrap();
        let template = parse_template(
            r#"
name: wf
stages:
  - { index: 0, applet: mystery }
"#,
        )
        .unwrap();
        let errors = validate_template(&template, &config);
        assert!(errors.iter().any(|e| e.message.contains("'mystery'")));
    }

    #[test]
    fn test_sh002_template_local_applet_declaration() {
        let config = parse_config(CONFIG).unwrap();
        let template = parse_template(
            r#"
name: wf
applets:
  mystery: {}
stages:
  - { index: 0, applet: mystery, folder: /out }
"#,
        )
        .unwrap();
        assert!(validate_template(&template, &config).is_empty());
    }

    #[test]
    fn test_sh002_input_declared_twice() {
        let config = parse_config(CONFIG).unwrap();
        let template = parse_template(
            r#"
name: wf
stages:
  - index: 0
    applet: qc
    input: { worker_project: x }
    worker: bcl2fastq
"#,
        )
        .unwrap();
        let errors = validate_template(&template, &config);
        assert!(errors.iter().any(|e| e.message.contains("declared twice")));
    }

    #[test]
    fn test_sh002_linked_and_context_input_conflict() {
        let config = parse_config(CONFIG).unwrap();
        let template = parse_template(
            r#"
name: wf
stages:
  - { index: 0, applet: bcl2fastq, folder: /fastq }
  - index: 1
    applet: qc
    folder: /qc
    linked_input:
      build: { stage: 0, field: reads }
    context_input:
      build: version_label
"#,
        )
        .unwrap();
        let errors = validate_template(&template, &config);
        assert_eq!(
            errors
                .iter()
                .filter(|e| e.message.contains("input 'build' is declared twice"))
                .count(),
            1
        );
    }

    #[test]
    fn test_sh002_unknown_internal_ref() {
        let config = parse_config(CONFIG).unwrap();
        let manifest = InternalManifest::default();
        let errors = validate_internal_refs("bcl2fastq", &config.applets["bcl2fastq"], &manifest);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("python_packages"));
    }

    #[test]
    fn test_sh002_parse_file_missing() {
        let err = parse_config_file(Path::new("/nonexistent/builder.yaml")).unwrap_err();
        assert!(matches!(err, BuildError::Config(_)));
    }

    #[test]
    fn test_sh002_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("builder.yaml");
        std::fs::write(&path, CONFIG).unwrap();
        let config = parse_config_file(&path).unwrap();
        assert_eq!(config.applets.len(), 2);
    }

    #[test]
    fn test_sh002_into_result() {
        assert!(into_result(vec![]).is_ok());
        let err = into_result(vec![
            ValidationError {
                message: "a".into(),
            },
            ValidationError {
                message: "b".into(),
            },
        ])
        .unwrap_err();
        assert!(err.to_string().contains("2 validation error(s): a; b"));
    }
}
