//! GitHub forge adapter: pull requests, workflow-run status, merge.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use medra_core::retry::{retry_with_backoff, BackoffPolicy};
use medra_core::{CancelToken, MedraError, Result};

use crate::branch::RepoRef;

/// CI pipeline status for the remediation branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiStatus {
    Pending,
    Running,
    Success,
    Failure,
    Unknown,
}

impl CiStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CiStatus::Success | CiStatus::Failure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CiStatus::Pending => "pending",
            CiStatus::Running => "running",
            CiStatus::Success => "success",
            CiStatus::Failure => "failure",
            CiStatus::Unknown => "unknown",
        }
    }
}

/// A created pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
}

/// A workflow run on the forge CI.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub id: u64,
    pub status: CiStatus,
    pub url: String,
}

/// Forge REST operations the orchestrator needs.
#[async_trait]
pub trait Forge: Send + Sync {
    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest>;

    /// Latest workflow run for `branch`, if any exist yet.
    async fn latest_workflow_run(&self, repo: &RepoRef, branch: &str) -> Result<Option<WorkflowRun>>;

    /// Merge the pull request; returns whether the forge reported success.
    async fn merge_pull_request(&self, repo: &RepoRef, number: u64) -> Result<bool>;
}

/// GitHub REST v3 implementation.
pub struct GitHubForge {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl GitHubForge {
    pub fn new(token: String) -> Result<Self> {
        Self::with_base_url(token, "https://api.github.com".to_string())
    }

    /// Alternate API base, used against mock servers in tests.
    pub fn with_base_url(token: String, api_base: String) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("medra"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()?;

        Ok(Self { client, api_base, token })
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn is_transient(err: &MedraError) -> bool {
        match err {
            MedraError::Transient { .. } => true,
            MedraError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Map GitHub's status/conclusion pair onto the CI status enum.
    fn parse_run_state(status: &str, conclusion: Option<&str>) -> CiStatus {
        match status {
            "queued" | "waiting" | "requested" | "pending" => CiStatus::Pending,
            "in_progress" => CiStatus::Running,
            "completed" => match conclusion {
                Some("success") => CiStatus::Success,
                Some("failure") | Some("timed_out") | Some("startup_failure") => CiStatus::Failure,
                Some("cancelled") | Some("skipped") | Some("neutral") => CiStatus::Unknown,
                _ => CiStatus::Unknown,
            },
            _ => CiStatus::Unknown,
        }
    }
}

#[derive(Serialize)]
struct CreatePrBody<'a> {
    title: &'a str,
    head: &'a str,
    base: &'a str,
    body: &'a str,
}

#[derive(Deserialize)]
struct PrResponse {
    number: u64,
    html_url: String,
}

#[derive(Deserialize)]
struct WorkflowRunsResponse {
    workflow_runs: Vec<WorkflowRunBody>,
}

#[derive(Deserialize)]
struct WorkflowRunBody {
    id: u64,
    status: String,
    conclusion: Option<String>,
    html_url: String,
}

#[derive(Deserialize)]
struct MergeResponse {
    merged: bool,
}

#[async_trait]
impl Forge for GitHubForge {
    async fn create_pull_request(
        &self,
        repo: &RepoRef,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest> {
        let url = format!("{}/repos/{}/{}/pulls", self.api_base, repo.owner, repo.repo);
        let payload = CreatePrBody { title, head, base, body };

        let response = retry_with_backoff(
            BackoffPolicy::default(),
            "create pull request",
            Self::is_transient,
            || async {
                let resp = self
                    .client
                    .post(&url)
                    .header(AUTHORIZATION, self.auth_header())
                    .json(&payload)
                    .send()
                    .await?;

                let status = resp.status();
                if status.as_u16() == 429 || status.is_server_error() {
                    return Err(MedraError::Transient {
                        attempts: 0,
                        reason: format!("forge returned {status}"),
                    });
                }
                if !status.is_success() {
                    let text = resp.text().await.unwrap_or_default();
                    return Err(MedraError::fatal(format!("PR creation failed ({status}): {text}")));
                }
                let pr: PrResponse = resp.json().await?;
                Ok(pr)
            },
        )
        .await?;

        info!("🔀 Opened PR #{}: {}", response.number, response.html_url);
        Ok(PullRequest { number: response.number, url: response.html_url })
    }

    async fn latest_workflow_run(&self, repo: &RepoRef, branch: &str) -> Result<Option<WorkflowRun>> {
        let url = format!(
            "{}/repos/{}/{}/actions/runs?branch={}&per_page=1",
            self.api_base, repo.owner, repo.repo, branch
        );

        let resp = self
            .client
            .get(&url)
            .header(AUTHORIZATION, self.auth_header())
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(MedraError::Transient {
                attempts: 0,
                reason: format!("forge returned {status}"),
            });
        }
        if !status.is_success() {
            return Err(MedraError::fatal(format!("workflow run query failed: {status}")));
        }

        let runs: WorkflowRunsResponse = resp.json().await?;
        Ok(runs.workflow_runs.into_iter().next().map(|run| WorkflowRun {
            id: run.id,
            status: Self::parse_run_state(&run.status, run.conclusion.as_deref()),
            url: run.html_url,
        }))
    }

    async fn merge_pull_request(&self, repo: &RepoRef, number: u64) -> Result<bool> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}/merge",
            self.api_base, repo.owner, repo.repo, number
        );

        let resp = self
            .client
            .put(&url)
            .header(AUTHORIZATION, self.auth_header())
            .json(&serde_json::json!({ "merge_method": "merge" }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            warn!("PR merge failed ({status}): {text}");
            return Ok(false);
        }

        let merged: MergeResponse = resp.json().await?;
        Ok(merged.merged)
    }
}

/// Poll the forge CI for `branch` until it reaches a terminal state, the
/// budget runs out, or the run is cancelled. On SUCCESS, merge the PR.
///
/// Returns the final CI status and whether the PR was merged.
pub async fn poll_ci_and_merge(
    forge: &dyn Forge,
    repo: &RepoRef,
    branch: &str,
    pr_number: u64,
    interval: Duration,
    total_budget: Duration,
    cancel: &CancelToken,
) -> (CiStatus, bool) {
    let deadline = tokio::time::Instant::now() + total_budget;
    let mut last_status = CiStatus::Pending;

    loop {
        if tokio::time::Instant::now() >= deadline {
            debug!("CI poll budget exhausted, last status {:?}", last_status);
            return (last_status, false);
        }
        if cancel.is_cancelled() {
            return (last_status, false);
        }

        match forge.latest_workflow_run(repo, branch).await {
            Ok(Some(run)) => {
                last_status = run.status;
                if run.status == CiStatus::Success {
                    info!("✅ CI succeeded for {branch}, merging PR #{pr_number}");
                    let merged = forge
                        .merge_pull_request(repo, pr_number)
                        .await
                        .unwrap_or(false);
                    return (CiStatus::Success, merged);
                }
                if run.status == CiStatus::Failure {
                    info!("❌ CI failed for {branch}; leaving PR #{pr_number} open");
                    return (CiStatus::Failure, false);
                }
            }
            Ok(None) => debug!("no workflow run for {branch} yet"),
            Err(e) => warn!("CI status query failed: {e}"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => return (last_status, false),
        }
    }
}
