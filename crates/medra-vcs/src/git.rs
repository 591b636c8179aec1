//! Git CLI adapter.
//!
//! Clone, branch, stage, commit, push. The push token is injected into the
//! remote URL for the push command only and never stored in the repository
//! configuration or logged.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use medra_core::{CancelToken, MedraError, Result};

use crate::branch::RepoRef;

/// Version-control operations the engine needs.
#[async_trait]
pub trait GitOps: Send + Sync {
    /// Shallow-clone `repo_url` into `dest`.
    async fn clone_shallow(&self, repo_url: &str, dest: &Path, timeout: Duration) -> Result<()>;

    /// Create and check out a new branch.
    async fn create_branch(&self, repo: &Path, name: &str) -> Result<()>;

    /// Name of the currently checked-out default branch.
    async fn default_branch(&self, repo: &Path) -> Result<String>;

    /// Stage every change in the working tree.
    async fn stage_all(&self, repo: &Path) -> Result<()>;

    /// Commit staged changes; returns the commit SHA.
    async fn commit(&self, repo: &Path, message: &str) -> Result<String>;

    /// Push `branch` to origin, authenticating with `token` when given.
    /// Returns the web URL of the pushed branch.
    async fn push(&self, repo: &Path, branch: &str, token: Option<&str>) -> Result<String>;
}

/// `GitOps` backed by the `git` binary.
pub struct GitCli {
    cancel: CancelToken,
}

impl GitCli {
    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    async fn run_git(
        &self,
        cwd: Option<&Path>,
        args: &[&str],
        timeout: Option<Duration>,
        redact: Option<&str>,
    ) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let child = cmd.output();
        let output = if let Some(budget) = timeout {
            tokio::select! {
                out = tokio::time::timeout(budget, child) => match out {
                    Ok(res) => res?,
                    Err(_) => {
                        return Err(MedraError::Timeout {
                            what: format!("git {}", args.first().unwrap_or(&"")),
                            timeout_secs: budget.as_secs(),
                        })
                    }
                },
                _ = self.cancel.cancelled() => return Err(MedraError::Cancelled),
            }
        } else {
            tokio::select! {
                out = child => out?,
                _ = self.cancel.cancelled() => return Err(MedraError::Cancelled),
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if let Some(secret) = redact {
                stderr = stderr.replace(secret, "***");
            }
            debug!("git {:?} failed: {stderr}", args.first());
            Err(MedraError::fatal(format!(
                "git {} failed: {stderr}",
                args.first().unwrap_or(&"")
            )))
        }
    }
}

#[async_trait]
impl GitOps for GitCli {
    async fn clone_shallow(&self, repo_url: &str, dest: &Path, timeout: Duration) -> Result<()> {
        let dest_str = dest.to_string_lossy();
        info!("📥 Cloning {repo_url} (depth 1)");
        self.run_git(
            None,
            &["clone", "--depth", "1", repo_url, dest_str.as_ref()],
            Some(timeout),
            None,
        )
        .await
        .map_err(|e| match e {
            MedraError::Timeout { .. } | MedraError::Cancelled => e,
            other => MedraError::fatal(format!("clone failed: {other}")),
        })?;
        Ok(())
    }

    async fn create_branch(&self, repo: &Path, name: &str) -> Result<()> {
        self.run_git(Some(repo), &["checkout", "-b", name], None, None)
            .await?;
        info!("🌿 Created branch {name}");
        Ok(())
    }

    async fn default_branch(&self, repo: &Path) -> Result<String> {
        self.run_git(Some(repo), &["rev-parse", "--abbrev-ref", "HEAD"], None, None)
            .await
    }

    async fn stage_all(&self, repo: &Path) -> Result<()> {
        self.run_git(Some(repo), &["add", "-A"], None, None).await?;
        Ok(())
    }

    async fn commit(&self, repo: &Path, message: &str) -> Result<String> {
        self.run_git(
            Some(repo),
            &[
                "-c",
                "user.name=Medra",
                "-c",
                "user.email=medra@localhost",
                "commit",
                "-m",
                message,
            ],
            None,
            None,
        )
        .await?;
        self.run_git(Some(repo), &["rev-parse", "HEAD"], None, None)
            .await
    }

    async fn push(&self, repo: &Path, branch: &str, token: Option<&str>) -> Result<String> {
        let origin = self
            .run_git(Some(repo), &["remote", "get-url", "origin"], None, None)
            .await?;

        let repo_ref = RepoRef::parse(&origin)
            .ok_or_else(|| MedraError::fatal(format!("unsupported remote URL: {origin}")))?;

        let push_url = match token {
            Some(t) => repo_ref.authenticated_url(t),
            None => repo_ref.clone_url(),
        };
        let refspec = format!("HEAD:refs/heads/{branch}");

        self.run_git(
            Some(repo),
            &["push", push_url.as_str(), refspec.as_str()],
            None,
            token,
        )
        .await?;

        let branch_url = repo_ref.branch_url(branch);
        info!("🚀 Pushed to {branch_url}");
        Ok(branch_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn clone_failure_is_fatal() {
        if !git_available() {
            return;
        }
        let git = GitCli::new(CancelToken::new());
        let dest = tempfile::tempdir().unwrap();
        let err = git
            .clone_shallow(
                "file:///nonexistent/definitely-missing-repo",
                &dest.path().join("out"),
                Duration::from_secs(30),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MedraError::Fatal { .. }));
    }

    #[tokio::test]
    async fn branch_commit_roundtrip_on_local_repo() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path();
        for args in [
            vec!["init", "-q"],
            vec!["config", "user.email", "t@t"],
            vec!["config", "user.name", "t"],
        ] {
            std::process::Command::new("git")
                .args(&args)
                .current_dir(repo)
                .output()
                .unwrap();
        }
        std::fs::write(repo.join("a.txt"), "hello\n").unwrap();
        std::process::Command::new("git")
            .args(["add", "-A"])
            .current_dir(repo)
            .output()
            .unwrap();
        std::process::Command::new("git")
            .args(["commit", "-q", "-m", "init"])
            .current_dir(repo)
            .output()
            .unwrap();

        let git = GitCli::new(CancelToken::new());
        git.create_branch(repo, "ACME_JANE_AI_Fix").await.unwrap();
        assert_eq!(git.default_branch(repo).await.unwrap(), "ACME_JANE_AI_Fix");

        std::fs::write(repo.join("a.txt"), "patched\n").unwrap();
        git.stage_all(repo).await.unwrap();
        let sha = git.commit(repo, "fix: patch a.txt").await.unwrap();
        assert_eq!(sha.len(), 40);
    }
}
