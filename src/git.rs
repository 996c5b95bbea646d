//! Version-control enrichment: commits landed since the last recorded note.
//!
//! Everything here degrades to "no information". A project that isn't a
//! git repository, a machine without git, or an unknown revision must never
//! stall or fail an extraction cycle.

use std::path::Path;

use tokio::process::Command;

use crate::models::CommitInfo;

/// Current HEAD revision of the repository at `repo`, if there is one.
pub async fn head_revision(repo: &Path) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(["rev-parse", "HEAD"])
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let head = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if head.is_empty() {
        None
    } else {
        Some(head)
    }
}

/// Commits reachable from HEAD but not from `known_revision`, oldest first.
///
/// Returns an empty list when `known_revision` is `None` (nothing recorded
/// yet), equals HEAD, or when git is unavailable for any reason.
pub async fn commits_since(repo: &Path, known_revision: Option<&str>) -> Vec<CommitInfo> {
    let Some(known) = known_revision else {
        return Vec::new();
    };

    let output = match Command::new("git")
        .arg("-C")
        .arg(repo)
        .args([
            "log",
            "--reverse",
            "--pretty=format:%H%x09%s",
            &format!("{known}..HEAD"),
        ])
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!("git unavailable for {}: {}", repo.display(), e);
            return Vec::new();
        }
    };

    if !output.status.success() {
        // Unknown revision, not a repository, shallow clone: all non-fatal.
        tracing::debug!(
            "git log failed for {}: {}",
            repo.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return Vec::new();
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let (revision, message) = line.split_once('\t')?;
            Some(CommitInfo {
                revision: revision.to_string(),
                message: message.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tempfile::TempDir;

    async fn git(repo: &Path, args: &[&str]) -> bool {
        Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(args)
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn non_repository_yields_nothing() {
        let dir = TempDir::new().unwrap();
        assert!(head_revision(dir.path()).await.is_none());
        assert!(commits_since(dir.path(), Some("abc123")).await.is_empty());
    }

    #[tokio::test]
    async fn absent_known_revision_yields_nothing() {
        let dir = TempDir::new().unwrap();
        assert!(commits_since(dir.path(), None).await.is_empty());
    }

    #[tokio::test]
    async fn reports_commits_between_revisions() {
        let dir = TempDir::new().unwrap();
        if !git(dir.path(), &["init", "-q"]).await {
            // No git on this machine; the degradation paths above still hold.
            return;
        }

        std::fs::write(dir.path().join("a.txt"), "one").unwrap();
        git(dir.path(), &["add", "."]).await;
        git(dir.path(), &["commit", "-q", "-m", "first"]).await;
        let first = head_revision(dir.path()).await.unwrap();

        std::fs::write(dir.path().join("b.txt"), "two").unwrap();
        git(dir.path(), &["add", "."]).await;
        git(dir.path(), &["commit", "-q", "-m", "second"]).await;

        let commits = commits_since(dir.path(), Some(&first)).await;
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].message, "second");

        // Caught up: nothing since HEAD.
        let head = head_revision(dir.path()).await.unwrap();
        assert!(commits_since(dir.path(), Some(&head)).await.is_empty());
    }
}
