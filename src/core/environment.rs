//! SH-004: Environment resolution from the branch name.
//!
//! The branch prefix (text before the first `_` or `/`) selects the
//! environment; the builder config supplies its namespace and path template.

use super::error::{BuildError, Result};
use super::resolver;
use super::types::*;
use chrono::NaiveDate;

/// Branch prefix -> environment. Anything else is an unknown target.
const BRANCH_PREFIXES: &[(&str, EnvironmentKey)] = &[
    ("master", EnvironmentKey::Production),
    ("develop", EnvironmentKey::Develop),
    ("feature", EnvironmentKey::Develop),
    ("release", EnvironmentKey::Develop),
    ("hotfix", EnvironmentKey::Hotfix),
];

/// Prefix of a branch name up to the first `_` or `/`.
pub fn branch_prefix(branch: &str) -> &str {
    match branch.find(['_', '/']) {
        Some(pos) => &branch[..pos],
        None => branch,
    }
}

/// Map a branch name to its environment key.
pub fn environment_key(branch: &str) -> Result<EnvironmentKey> {
    let prefix = branch_prefix(branch);
    BRANCH_PREFIXES
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, key)| *key)
        .ok_or_else(|| {
            BuildError::Config(format!(
                "cannot determine deployment target for branch '{}' (prefix '{}')",
                branch, prefix
            ))
        })
}

/// Resolve the environment for a branch against the config table.
pub fn resolve(branch: &str, table: &EnvironmentTable) -> Result<Environment> {
    let key = environment_key(branch)?;
    let target = table.get(key).ok_or_else(|| {
        BuildError::Config(format!(
            "branch '{}' maps to environment '{}', which has no entry in builder config",
            branch, key
        ))
    })?;
    Ok(Environment {
        key,
        remote_namespace: target.namespace.clone(),
        deploy_path_template: target.path.clone(),
    })
}

/// `<YYYY-MM-DD>_<revision>`: identical for builds of one commit on one day.
pub fn version_label(date: NaiveDate, revision: &str) -> String {
    format!("{}_{}", date.format("%Y-%m-%d"), revision)
}

/// Build the per-run context. Pure: date and VCS state are passed in.
pub fn build_context(table: &EnvironmentTable, vcs: VcsInfo, date: NaiveDate) -> Result<BuildContext> {
    let environment = resolve(&vcs.branch, table)?;
    let label = version_label(date, &vcs.revision);
    let vars = resolver::path_variables(&environment, &vcs, &label);
    let deploy_path = resolver::render_template(&environment.deploy_path_template, &vars)?;
    Ok(BuildContext {
        environment,
        vcs,
        version_label: label,
        deploy_path,
        date: date.format("%Y-%m-%d").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> EnvironmentTable {
        EnvironmentTable {
            production: Some(EnvironmentTarget {
                namespace: "project-prod".into(),
                path: "/{{release}}".into(),
            }),
            develop: Some(EnvironmentTarget {
                namespace: "project-dev".into(),
                path: "/{{release}}/{{branch}}".into(),
            }),
            hotfix: None,
        }
    }

    fn vcs(branch: &str) -> VcsInfo {
        VcsInfo {
            branch: branch.into(),
            revision: "9f8e7d6".into(),
            release: Some("2.1.0".into()),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    #[test]
    fn test_sh004_branch_prefix() {
        assert_eq!(branch_prefix("feature_bwa_mem"), "feature");
        assert_eq!(branch_prefix("feature/bwa_mem"), "feature");
        assert_eq!(branch_prefix("release/2.1_rc"), "release");
        assert_eq!(branch_prefix("master"), "master");
    }

    #[test]
    fn test_sh004_key_table() {
        assert_eq!(environment_key("master").unwrap(), EnvironmentKey::Production);
        assert_eq!(environment_key("develop").unwrap(), EnvironmentKey::Develop);
        assert_eq!(environment_key("feature_x").unwrap(), EnvironmentKey::Develop);
        assert_eq!(environment_key("release/1.0").unwrap(), EnvironmentKey::Develop);
        assert_eq!(environment_key("hotfix_12").unwrap(), EnvironmentKey::Hotfix);
    }

    #[test]
    fn test_sh004_unknown_prefix_fatal() {
        let err = environment_key("experiment_foo").unwrap_err();
        assert!(matches!(err, BuildError::Config(_)));
        assert!(err.to_string().contains("experiment_foo"));
        // Prefix must match exactly, not by substring.
        assert!(environment_key("masterful").is_err());
    }

    #[test]
    fn test_sh004_resolve_missing_table_entry() {
        let err = resolve("hotfix_1", &table()).unwrap_err();
        assert!(err.to_string().contains("hotfix"));
    }

    #[test]
    fn test_sh004_resolve_environment() {
        let env = resolve("feature_qc", &table()).unwrap();
        assert_eq!(env.key, EnvironmentKey::Develop);
        assert_eq!(env.remote_namespace, "project-dev");
        assert_eq!(env.deploy_path_template, "/{{release}}/{{branch}}");
    }

    #[test]
    fn test_sh004_version_label() {
        assert_eq!(version_label(date(), "9f8e7d6"), "2026-10-16_9f8e7d6");
    }

    #[test]
    fn test_sh004_version_label_idempotent() {
        let a = build_context(&table(), vcs("feature_qc"), date()).unwrap();
        let b = build_context(&table(), vcs("feature_qc"), date()).unwrap();
        assert_eq!(a.version_label, b.version_label);
        assert_eq!(a.deploy_path, b.deploy_path);
    }

    #[test]
    fn test_sh004_build_context_paths() {
        let ctx = build_context(&table(), vcs("feature_qc"), date()).unwrap();
        assert_eq!(ctx.deploy_path, "/2.1.0/feature_qc");
        assert_eq!(ctx.workflow_path("bcl2fastq_qc"), "/2.1.0/feature_qc/bcl2fastq_qc");
        assert_eq!(ctx.namespace(), "project-dev");
        assert_eq!(ctx.date, "2026-10-16");

        let prod = build_context(&table(), vcs("master"), date()).unwrap();
        assert_eq!(prod.deploy_path, "/2.1.0");
        assert!(prod.environment.key.is_protected());
    }
}
