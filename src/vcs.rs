//! SH-018: Version control queries via `git`.

use crate::core::error::{BuildError, Result};
use crate::core::types::VcsInfo;
use std::path::Path;
use std::process::Command;

fn git(repo: &Path, args: &[&str]) -> Result<Option<String>> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(args)
        .output()
        .map_err(|e| BuildError::Config(format!("cannot run git: {}", e)))?;
    if !output.status.success() {
        tracing::debug!(
            ?args,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "git query failed"
        );
        return Ok(None);
    }
    let out = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok((!out.is_empty()).then_some(out))
}

/// Release from a tag: leading `v` stripped.
pub fn release_from_tag(tag: &str) -> String {
    tag.strip_prefix('v').unwrap_or(tag).to_string()
}

/// Branch, short revision and latest release tag of the working tree.
///
/// `branch_override` replaces the checked-out branch (detached CI checkouts).
pub fn inspect(repo: &Path, branch_override: Option<&str>) -> Result<VcsInfo> {
    let branch = match branch_override {
        Some(b) => b.to_string(),
        None => git(repo, &["rev-parse", "--abbrev-ref", "HEAD"])?.ok_or_else(|| {
            BuildError::Config(format!("{} is not a git checkout", repo.display()))
        })?,
    };
    if branch == "HEAD" {
        return Err(BuildError::Config(
            "detached HEAD: pass --branch to choose a deployment target".into(),
        ));
    }
    let revision = git(repo, &["describe", "--always"])?.ok_or_else(|| {
        BuildError::Config(format!("cannot describe revision in {}", repo.display()))
    })?;
    let release = git(repo, &["describe", "--abbrev=0"])?.map(|t| release_from_tag(&t));

    Ok(VcsInfo {
        branch,
        revision,
        release,
    })
}
