//! Per-run repository workspace: clone once, remove on every exit path.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use medra_core::Result;
use medra_vcs::GitOps;

/// A leased workspace directory holding the cloned working tree.
///
/// Dropping the guard removes the directory; `cleanup` may also be called
/// explicitly and is idempotent. Removal failures are logged, never raised.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    cleaned: Arc<AtomicBool>,
}

impl Workspace {
    /// Clone `repo_url` into a fresh directory under `base`, named
    /// `<repo-basename>_<timestamp>_<run-id>`.
    pub async fn acquire(
        base: &Path,
        repo_url: &str,
        run_id: &str,
        git: &dyn GitOps,
        clone_timeout: Duration,
    ) -> Result<Self> {
        let basename = repo_basename(repo_url);
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let root = base.join(format!("{basename}_{timestamp}_{run_id}"));

        tokio::fs::create_dir_all(base).await?;
        if root.exists() {
            tokio::fs::remove_dir_all(&root).await?;
        }

        if let Err(e) = git.clone_shallow(repo_url, &root, clone_timeout).await {
            // Release the directory before surfacing the clone failure.
            let _ = tokio::fs::remove_dir_all(&root).await;
            return Err(e);
        }

        debug!("workspace acquired at {}", root.display());
        Ok(Self {
            root,
            cleaned: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove the workspace directory. Idempotent; never raises.
    pub fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("workspace cleanup failed for {}: {e}", self.root.display());
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Final path segment of the repository URL, without a `.git` suffix.
fn repo_basename(repo_url: &str) -> String {
    let trimmed = repo_url.trim_end_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or("repo");
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() {
        "repo".to_string()
    } else {
        name.to_string()
    }
}
