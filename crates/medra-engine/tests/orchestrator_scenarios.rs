//! End-to-end orchestrator scenarios against mock adapters.
//!
//! The fixture repository is JavaScript so the built-in pattern checks
//! drive defect detection without any external toolchain.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use medra_core::{CancelToken, MedraError, Result, Settings};
use medra_engine::llm::{ChatModel, ChatRequest};
use medra_engine::report::ResolutionStatus;
use medra_engine::{FixStatus, Orchestrator, ResultStore, RunRequest, RunStatus};
use medra_vcs::branch::RepoRef;
use medra_vcs::forge::{CiStatus, Forge, PullRequest, WorkflowRun};
use medra_vcs::git::GitOps;

/// Git adapter that materializes a fixture tree instead of cloning.
struct FakeGit {
    files: Vec<(String, String)>,
    fail_clone: bool,
    pushed: Mutex<Option<String>>,
}

impl FakeGit {
    fn with_files(files: Vec<(&str, &str)>) -> Self {
        Self {
            files: files
                .into_iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
            fail_clone: false,
            pushed: Mutex::new(None),
        }
    }
}

#[async_trait]
impl GitOps for FakeGit {
    async fn clone_shallow(&self, _url: &str, dest: &Path, _t: Duration) -> Result<()> {
        if self.fail_clone {
            return Err(MedraError::fatal("clone failed"));
        }
        tokio::fs::create_dir_all(dest).await?;
        for (rel, content) in &self.files {
            let path = dest.join(rel);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, content).await?;
        }
        Ok(())
    }

    async fn create_branch(&self, _repo: &Path, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn default_branch(&self, _repo: &Path) -> Result<String> {
        Ok("main".to_string())
    }

    async fn stage_all(&self, _repo: &Path) -> Result<()> {
        Ok(())
    }

    async fn commit(&self, _repo: &Path, _message: &str) -> Result<String> {
        Ok("a3f1c9d2e8b7a6f5c4d3e2b1a0f9e8d7c6b5a4f3".to_string())
    }

    async fn push(&self, _repo: &Path, branch: &str, token: Option<&str>) -> Result<String> {
        assert!(token.is_some(), "push must carry the token");
        *self.pushed.lock().unwrap() = Some(branch.to_string());
        Ok(format!("https://github.com/acme/widget/tree/{branch}"))
    }
}

/// Forge whose CI immediately succeeds.
struct FakeForge {
    merged: Mutex<bool>,
}

impl FakeForge {
    fn new() -> Self {
        Self { merged: Mutex::new(false) }
    }
}

#[async_trait]
impl Forge for FakeForge {
    async fn create_pull_request(
        &self,
        _repo: &RepoRef,
        head: &str,
        _base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest> {
        assert!(title.starts_with("[AI Fix] Auto-fix"));
        assert!(body.contains(head));
        Ok(PullRequest {
            number: 7,
            url: "https://github.com/acme/widget/pull/7".to_string(),
        })
    }

    async fn latest_workflow_run(&self, _repo: &RepoRef, _branch: &str) -> Result<Option<WorkflowRun>> {
        Ok(Some(WorkflowRun {
            id: 1,
            status: CiStatus::Success,
            url: "https://github.com/acme/widget/actions/runs/1".to_string(),
        }))
    }

    async fn merge_pull_request(&self, _repo: &RepoRef, number: u64) -> Result<bool> {
        assert_eq!(number, 7);
        *self.merged.lock().unwrap() = true;
        Ok(true)
    }
}

/// Model returning the same scripted response for every request.
struct FixedModel {
    response: String,
}

#[async_trait]
impl ChatModel for FixedModel {
    async fn complete(&self, _request: &ChatRequest) -> Result<String> {
        Ok(self.response.clone())
    }
}

fn settings_with(results_dir: &Path, workspace_root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.results_dir = Some(results_dir.to_path_buf());
    settings.workspace_root = Some(workspace_root.to_path_buf());
    settings
}

fn request() -> RunRequest {
    RunRequest {
        repo_url: "https://github.com/acme/widget".to_string(),
        team_name: "Acme".to_string(),
        leader_name: "Jane".to_string(),
        push_token: None,
        create_pr: false,
        auto_merge_on_ci: false,
        generate_tests: false,
    }
}

fn orchestrator(
    settings: &Settings,
    git: Arc<dyn GitOps>,
    forge: Option<Arc<dyn Forge>>,
    model: Arc<dyn ChatModel>,
) -> Orchestrator {
    Orchestrator::new(
        settings.clone(),
        git,
        forge,
        model,
        ResultStore::new(settings.results_dir()),
        CancelToken::new(),
    )
}

/// A repo with one removable defect; the model's patch applies cleanly.
#[tokio::test]
async fn single_defect_run_resolves_with_full_score() {
    let dirs = tempfile::tempdir().unwrap();
    let settings = settings_with(&dirs.path().join("results"), &dirs.path().join("ws"));

    let git = Arc::new(FakeGit::with_files(vec![
        ("package.json", "{}"),
        ("widget.js", "function ship() {\n  debugger;\n  return true;\n}\n"),
    ]));
    let model = Arc::new(FixedModel {
        response: r#"{"original_code":"  debugger;","fixed_code":"","description":"Remove debugger statement","commit_message":"fix: drop debugger statement"}"#.to_string(),
    });

    let orch = orchestrator(&settings, git, None, model);
    let result = orch.run(request()).await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.summary.resolution_status, ResolutionStatus::AllResolved);
    assert_eq!(result.total_fixes_applied, 1);
    assert_eq!(result.summary.initial_errors, 1);
    assert_eq!(result.summary.final_errors, 0);
    assert_eq!(result.score, 100);
    assert_eq!(result.branch_name, "ACME_JANE_AI_Fix");
    // No token: nothing pushed.
    assert!(result.commit_sha.is_none());
    assert!(!result.merged);
    assert_eq!(result.fixes[0].status, FixStatus::Fixed);
}

/// Push, PR and CI-gated merge on a successful run.
#[tokio::test]
async fn push_pr_and_merge_on_ci_success() {
    let dirs = tempfile::tempdir().unwrap();
    let settings = settings_with(&dirs.path().join("results"), &dirs.path().join("ws"));

    let git = Arc::new(FakeGit::with_files(vec![
        ("package.json", "{}"),
        ("widget.js", "function ship() {\n  debugger;\n  return true;\n}\n"),
    ]));
    let forge = Arc::new(FakeForge::new());
    let model = Arc::new(FixedModel {
        response: r#"{"original_code":"  debugger;","fixed_code":"","description":"Remove debugger","commit_message":"fix: drop debugger"}"#.to_string(),
    });

    let mut req = request();
    req.push_token = Some("tok-123".to_string());
    req.create_pr = true;
    req.auto_merge_on_ci = true;

    let orch = orchestrator(
        &settings,
        git.clone(),
        Some(forge.clone() as Arc<dyn Forge>),
        model,
    );
    let result = orch.run(req).await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(git.pushed.lock().unwrap().as_deref(), Some("ACME_JANE_AI_Fix"));
    assert!(result.commit_sha.is_some());
    assert_eq!(
        result.branch_url.as_deref(),
        Some("https://github.com/acme/widget/tree/ACME_JANE_AI_Fix")
    );
    assert_eq!(result.pr_number, Some(7));
    assert_eq!(result.ci_status, Some(CiStatus::Success));
    assert!(result.merged);
    assert!(*forge.merged.lock().unwrap());
}

/// The model never produces an applicable patch: three stalled iterations,
/// then early termination as UNRESOLVED with score zero and no push.
#[tokio::test]
async fn convergence_failure_terminates_early() {
    let dirs = tempfile::tempdir().unwrap();
    let settings = settings_with(&dirs.path().join("results"), &dirs.path().join("ws"));

    let git = Arc::new(FakeGit::with_files(vec![
        ("package.json", "{}"),
        ("widget.js", "function ship() {\n  debugger;\n  return true;\n}\n"),
    ]));
    let model = Arc::new(FixedModel {
        response: r#"{"original_code":"this text is nowhere in the file","fixed_code":"x","description":"d","commit_message":"m"}"#.to_string(),
    });

    let mut req = request();
    req.push_token = Some("tok-123".to_string());

    let orch = orchestrator(&settings, git.clone(), None, model);
    let result = orch.run(req).await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.summary.resolution_status, ResolutionStatus::Unresolved);
    assert_eq!(result.summary.total_iterations, 3);
    assert_eq!(result.total_fixes_applied, 0);
    assert_eq!(result.score, 0);
    // Nothing landed, nothing pushed.
    assert!(git.pushed.lock().unwrap().is_none());
    assert!(result.commit_sha.is_none());
}

/// Empty repository: completed, nothing to fix, full score, no push.
#[tokio::test]
async fn empty_repository_scores_clean() {
    let dirs = tempfile::tempdir().unwrap();
    let settings = settings_with(&dirs.path().join("results"), &dirs.path().join("ws"));

    let git = Arc::new(FakeGit::with_files(vec![("README.md", "# widget\n")]));
    let model = Arc::new(FixedModel { response: String::new() });

    let orch = orchestrator(&settings, git, None, model);
    let result = orch.run(request()).await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.summary.resolution_status, ResolutionStatus::AllResolved);
    assert_eq!(result.total_failures_detected, 0);
    assert_eq!(result.total_fixes_applied, 0);
    assert_eq!(result.score, 100);
    assert!(result.commit_sha.is_none());
    assert!(result.pr_url.is_none());
}

/// Malformed repository URL fails fast with an input error.
#[tokio::test]
async fn invalid_repo_url_fails_fast() {
    let dirs = tempfile::tempdir().unwrap();
    let settings = settings_with(&dirs.path().join("results"), &dirs.path().join("ws"));

    let git = Arc::new(FakeGit::with_files(vec![]));
    let model = Arc::new(FixedModel { response: String::new() });
    let orch = orchestrator(&settings, git, None, model);

    let mut req = request();
    req.repo_url = "not a url at all".to_string();
    let result = orch.run(req).await;

    assert_eq!(result.status, RunStatus::error("invalid_input"));
    assert_eq!(result.score, 0);
    assert_eq!(result.summary.total_iterations, 0);
}

/// Clone failure aborts the run but still produces a persisted result.
#[tokio::test]
async fn clone_failure_aborts_with_error_status() {
    let dirs = tempfile::tempdir().unwrap();
    let settings = settings_with(&dirs.path().join("results"), &dirs.path().join("ws"));

    let git = Arc::new(FakeGit {
        files: vec![],
        fail_clone: true,
        pushed: Mutex::new(None),
    });
    let model = Arc::new(FixedModel { response: String::new() });
    let orch = orchestrator(&settings, git, None, model);

    let result = orch.run(request()).await;
    assert_eq!(result.status, RunStatus::error("fatal"));
    assert_eq!(result.summary.resolution_status, ResolutionStatus::Unresolved);
}

/// Every run writes exactly one result document to the store.
#[tokio::test]
async fn run_result_is_persisted() {
    let dirs = tempfile::tempdir().unwrap();
    let results_dir = dirs.path().join("results");
    let settings = settings_with(&results_dir, &dirs.path().join("ws"));

    let git = Arc::new(FakeGit::with_files(vec![("README.md", "# ok\n")]));
    let model = Arc::new(FixedModel { response: String::new() });
    let orch = orchestrator(&settings, git, None, model);

    orch.run(request()).await;

    let documents: Vec<_> = std::fs::read_dir(&results_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".json"))
        .collect();
    assert_eq!(documents.len(), 1);
}

/// Cancellation before the run leaves a cancelled result.
#[tokio::test]
async fn cancelled_run_reports_cancelled_status() {
    let dirs = tempfile::tempdir().unwrap();
    let settings = settings_with(&dirs.path().join("results"), &dirs.path().join("ws"));

    let git = Arc::new(FakeGit::with_files(vec![
        ("package.json", "{}"),
        ("widget.js", "debugger;\n"),
    ]));
    let model = Arc::new(FixedModel { response: String::new() });

    let cancel = CancelToken::new();
    cancel.cancel();
    let orch = Orchestrator::new(
        settings.clone(),
        git,
        None,
        model,
        ResultStore::new(settings.results_dir()),
        cancel,
    );

    let result = orch.run(request()).await;
    assert_eq!(result.status, RunStatus::Cancelled);
}
