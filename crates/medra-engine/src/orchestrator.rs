//! Run orchestration: the bounded detect → parse → fix → verify loop.
//!
//! The orchestrator is the only stateful coordinator. It owns the current
//! defect set, the iteration log and the result under construction; every
//! other component hands back immutable records.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use medra_core::{CancelToken, MedraError, Result, Settings};
use medra_vcs::branch::{generate_branch_name, validate_repo_url, RepoRef};
use medra_vcs::forge::poll_ci_and_merge;
use medra_vcs::{CiStatus, Forge, GitOps};

use crate::defect::{dedup_defects, BugType, Defect};
use crate::detector::{detect_project, detect_test_framework, ProjectType, TestFramework};
use crate::fix::{Fix, FixStatus};
use crate::fixer::CodeFixer;
use crate::llm::ChatModel;
use crate::parser;
use crate::report::{
    GeneratedTest, IterationRecord, ResolutionStatus, RunResult, RunStatus, RunSummary, TestOutcome,
};
use crate::result_store::ResultStore;
use crate::sandbox::SandboxExecutor;
use crate::score::{compute_score, ScoreInputs};
use crate::test_runner::{TestReport, TestRunner};
use crate::workspace::Workspace;

/// Structural bug types outrank this threshold; while any are present,
/// LINTING and LOGIC fixes wait for the next iteration.
const DEFERRAL_PRIORITY: u8 = 6; // BugType::Import

/// Consecutive zero-progress iterations tolerated before giving up.
const MAX_STALLED_ITERATIONS: u32 = 3;

/// Command input from the enclosing service.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub repo_url: String,
    pub team_name: String,
    pub leader_name: String,
    pub push_token: Option<String>,
    pub create_pr: bool,
    pub auto_merge_on_ci: bool,
    pub generate_tests: bool,
}

/// Progress callback: `(phase, percent, message)`.
pub type ProgressFn = Arc<dyn Fn(&str, u8, &str) + Send + Sync>;

/// Drives a full healing run.
pub struct Orchestrator {
    settings: Settings,
    git: Arc<dyn GitOps>,
    forge: Option<Arc<dyn Forge>>,
    llm: Arc<dyn ChatModel>,
    store: ResultStore,
    cancel: CancelToken,
    progress: Option<ProgressFn>,
}

/// Mutable state for one run.
struct RunState {
    branch_name: String,
    fixed_signatures: HashSet<String>,
    all_fixes: Vec<Fix>,
    iterations: Vec<IterationRecord>,
    test_results: Vec<TestOutcome>,
    generated_tests: Vec<GeneratedTest>,
    carried_test_defects: Vec<Defect>,
    initial_errors: Option<usize>,
    final_errors: usize,
    tests_passing: bool,
    no_tests: bool,
    stalled: u32,
    commit_count: usize,
}

impl RunState {
    fn new(branch_name: String) -> Self {
        Self {
            branch_name,
            fixed_signatures: HashSet::new(),
            all_fixes: Vec::new(),
            iterations: Vec::new(),
            test_results: Vec::new(),
            generated_tests: Vec::new(),
            carried_test_defects: Vec::new(),
            initial_errors: None,
            final_errors: 0,
            tests_passing: false,
            no_tests: true,
            stalled: 0,
            commit_count: 0,
        }
    }

    fn successful_fixes(&self) -> usize {
        self.all_fixes.iter().filter(|f| f.status == FixStatus::Fixed).count()
    }

    fn fixed_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self
            .all_fixes
            .iter()
            .filter(|f| f.status == FixStatus::Fixed)
            .map(|f| f.file_path.clone())
            .collect();
        files.sort();
        files.dedup();
        files
    }
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        git: Arc<dyn GitOps>,
        forge: Option<Arc<dyn Forge>>,
        llm: Arc<dyn ChatModel>,
        store: ResultStore,
        cancel: CancelToken,
    ) -> Self {
        Self { settings, git, forge, llm, store, cancel, progress: None }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    fn report(&self, phase: &str, percent: u8, message: &str) {
        if let Some(cb) = &self.progress {
            cb(phase, percent, message);
        }
    }

    /// Run to completion. Every run terminates with a RunResult; operational
    /// failures are folded into `status`.
    pub async fn run(&self, request: RunRequest) -> RunResult {
        let run_id = Uuid::new_v4().to_string();
        let start_time = Utc::now();
        let started = std::time::Instant::now();
        let branch_name = generate_branch_name(&request.team_name, &request.leader_name);

        if !validate_repo_url(&request.repo_url) {
            let result = self.error_result(
                &request,
                &branch_name,
                start_time,
                RunStatus::error("invalid_input"),
            );
            let _ = self.store.persist(&run_id, &result);
            return result;
        }

        let mut state = RunState::new(branch_name);
        let outcome = self.run_inner(&request, &mut state).await;

        let end_time = Utc::now();
        let total_time = started.elapsed().as_secs_f64();

        let (status, push_artifacts) = match outcome {
            Ok(artifacts) => (RunStatus::Completed, artifacts),
            Err(MedraError::Cancelled) => (RunStatus::Cancelled, PushArtifacts::default()),
            Err(e) => {
                warn!("run aborted: {e}");
                (RunStatus::error(e.status_reason()), PushArtifacts::default())
            }
        };

        let resolution = self.resolution_status(&state);
        let score = compute_score(ScoreInputs {
            tests_passing: state.tests_passing,
            failures_remaining: state.final_errors > 0 || !state.tests_passing,
            successful_fixes: state.successful_fixes(),
            total_time_secs: total_time,
            total_commits: state.commit_count,
        });

        let result = RunResult {
            repo_url: request.repo_url.clone(),
            team_name: request.team_name.clone(),
            leader_name: request.leader_name.clone(),
            branch_name: state.branch_name.clone(),
            total_failures_detected: state.initial_errors.unwrap_or(0),
            total_fixes_applied: state.successful_fixes(),
            total_time_taken: total_time,
            fixes: state.all_fixes.clone(),
            test_results: state.test_results.clone(),
            generated_tests: if state.generated_tests.is_empty() {
                None
            } else {
                Some(state.generated_tests.clone())
            },
            start_time,
            end_time,
            status,
            summary: RunSummary {
                total_iterations: state.iterations.len() as u32,
                initial_errors: state.initial_errors.unwrap_or(0),
                final_errors: state.final_errors,
                resolution_status: resolution,
                iterations: state.iterations.clone(),
            },
            commit_sha: push_artifacts.commit_sha,
            branch_url: push_artifacts.branch_url,
            pr_url: push_artifacts.pr_url,
            pr_number: push_artifacts.pr_number,
            ci_status: push_artifacts.ci_status,
            merged: push_artifacts.merged,
            score,
        };

        if let Err(e) = self.store.persist(&run_id, &result) {
            warn!("failed to persist run result: {e}");
        }
        result
    }

    async fn run_inner(&self, request: &RunRequest, state: &mut RunState) -> Result<PushArtifacts> {
        self.report("cloning", 5, "Cloning repository");
        let run_id_short = Uuid::new_v4().simple().to_string();
        let workspace = Workspace::acquire(
            &self.settings.workspace_root(),
            &request.repo_url,
            &run_id_short[..8],
            self.git.as_ref(),
            Duration::from_secs(self.settings.timeouts.clone_secs),
        )
        .await?;
        let root = workspace.root().to_path_buf();

        let default_branch = self.git.default_branch(&root).await.unwrap_or_default();
        self.git.create_branch(&root, &state.branch_name).await?;

        let project = detect_project(&root);
        let framework = detect_test_framework(&root, project);
        info!("📦 Project: {} / tests: {:?}", project.as_str(), framework);

        let sandbox = SandboxExecutor::new(self.settings.clone(), self.cancel.clone());
        let tester = TestRunner::new(self.settings.clone(), self.cancel.clone());
        let fixer = CodeFixer::new(self.llm.clone(), self.settings.clone());

        self.main_loop(state, &root, project, framework, &sandbox, &tester, &fixer)
            .await?;
        self.test_tail(state, &root, project, framework, &sandbox, &tester, &fixer)
            .await?;

        if request.generate_tests && state.no_tests {
            self.generate_tests(state, &root, &fixer).await;
        }

        let artifacts = self
            .publish(request, state, &root, &default_branch)
            .await;

        workspace.cleanup();
        Ok(artifacts)
    }

    #[allow(clippy::too_many_arguments)]
    async fn main_loop(
        &self,
        state: &mut RunState,
        root: &Path,
        project: ProjectType,
        framework: TestFramework,
        sandbox: &SandboxExecutor,
        tester: &TestRunner,
        fixer: &CodeFixer,
    ) -> Result<()> {
        for iteration in 1..=self.settings.limits.max_iterations {
            if self.cancel.is_cancelled() {
                return Err(MedraError::Cancelled);
            }
            let iter_started = std::time::Instant::now();
            self.report("analyzing", 10 + (iteration as u8) * 10, "Scanning for defects");
            info!("🔄 Iteration {iteration}/{}", self.settings.limits.max_iterations);

            // Analyze: sandbox findings plus the classifier's supplemental
            // pass over raw tool output, plus carried test failures.
            let scan = sandbox.scan(root, project).await?;
            let mut defects = scan.defects;
            for (_tool, raw) in &scan.raw_outputs {
                defects.extend(parser::parse(raw));
            }
            defects.extend(std::mem::take(&mut state.carried_test_defects));
            let mut defects = dedup_defects(defects);
            defects.retain(|d| !state.fixed_signatures.contains(&d.signature()));
            defects.retain(|d| !is_infrastructure_error(d));

            if state.initial_errors.is_none() {
                state.initial_errors = Some(defects.len());
            }
            let defects_before = defects.len();

            // Structural errors first; lower-priority noise may vanish
            // once they are repaired.
            let has_structural = defects
                .iter()
                .any(|d| d.bug_type.priority() >= DEFERRAL_PRIORITY);
            let (eligible, deferred): (Vec<Defect>, Vec<Defect>) = if has_structural {
                defects.into_iter().partition(|d| {
                    !matches!(d.bug_type, BugType::Linting | BugType::Logic)
                })
            } else {
                (defects, Vec::new())
            };
            if !deferred.is_empty() {
                info!("⏸️  Deferring {} lower-priority defects", deferred.len());
            }

            // Fix.
            self.report("fixing", 15 + (iteration as u8) * 10, "Generating fixes");
            let fixes = if eligible.is_empty() {
                Vec::new()
            } else {
                fixer.fix_defects(root, &eligible).await?
            };
            let fixes_attempted = fixes.len();
            let fixes_successful = fixes.iter().filter(|f| f.status == FixStatus::Fixed).count();
            let applied_signatures: HashSet<String> = fixes
                .iter()
                .filter(|f| f.status == FixStatus::Fixed)
                .map(|f| format!("{}|{}|{}", f.bug_type, f.file_path, f.line_number))
                .collect();
            state.all_fixes.extend(fixes);

            // Verify: re-scan and run the test suite.
            let post_scan = sandbox.scan(root, project).await?;
            let mut post_defects = post_scan.defects;
            for (_tool, raw) in &post_scan.raw_outputs {
                post_defects.extend(parser::parse(raw));
            }
            let mut post_defects = dedup_defects(post_defects);
            post_defects.retain(|d| !is_infrastructure_error(d));
            let post_signatures: HashSet<String> =
                post_defects.iter().map(Defect::signature).collect();

            let test_report = tester.run(root, framework).await.unwrap_or_else(|e| {
                warn!("test run failed: {e}");
                TestReport::default()
            });
            self.absorb_test_report(state, &test_report, post_defects.len());

            // Signatures eliminated this iteration: a fix landed and the
            // verification scan no longer reports the location.
            let newly_fixed: Vec<String> = eligible
                .iter()
                .map(Defect::signature)
                .filter(|sig| applied_signatures.contains(sig) && !post_signatures.contains(sig))
                .collect();
            state.fixed_signatures.extend(newly_fixed.iter().cloned());

            // Surviving failures become synthetic defects for next time.
            state.carried_test_defects = synthesize_test_defects(&test_report);
            let deferred_count = deferred.len();
            state
                .carried_test_defects
                .extend(deferred.into_iter().filter(|d| !post_signatures.contains(&d.signature())));

            state.final_errors = post_defects.len();
            state.iterations.push(IterationRecord {
                index: iteration,
                defects_before,
                defects_after: post_defects.len(),
                fixes_attempted,
                fixes_successful,
                duration_secs: iter_started.elapsed().as_secs_f64(),
                fixed_signatures: newly_fixed,
                remaining_signatures: post_signatures.iter().cloned().collect(),
            });

            info!(
                "   {} -> {} defects, {}/{} fixes applied, tests passing: {}",
                defects_before, post_defects.len(), fixes_successful, fixes_attempted,
                state.tests_passing
            );

            // Termination checks.
            if post_defects.is_empty() && test_report.failed == 0 && test_report.errors == 0 && deferred_count == 0 {
                info!("✅ Clean verification, stopping");
                return Ok(());
            }
            if fixes_successful == 0 && state.tests_passing {
                info!("🟡 No fixes applied and tests pass, stopping");
                return Ok(());
            }

            // Oscillation guard: fixes attempted, nothing landed, no
            // defect-count progress, tests failing.
            let stalling = fixes_attempted > 0
                && fixes_successful == 0
                && post_defects.len() >= defects_before
                && !state.tests_passing;
            if stalling {
                state.stalled += 1;
                if state.stalled >= MAX_STALLED_ITERATIONS {
                    warn!("⚠️  No progress for {} iterations, giving up", state.stalled);
                    return Ok(());
                }
            } else {
                state.stalled = 0;
            }
        }
        Ok(())
    }

    /// Up to three extra iterations working only on test failures.
    #[allow(clippy::too_many_arguments)]
    async fn test_tail(
        &self,
        state: &mut RunState,
        root: &Path,
        project: ProjectType,
        framework: TestFramework,
        sandbox: &SandboxExecutor,
        tester: &TestRunner,
        fixer: &CodeFixer,
    ) -> Result<()> {
        if state.stalled >= MAX_STALLED_ITERATIONS {
            return Ok(());
        }

        for tail in 1..=self.settings.limits.test_tail_iterations {
            if self.cancel.is_cancelled() {
                return Err(MedraError::Cancelled);
            }
            if state.no_tests || state.tests_passing {
                return Ok(());
            }
            let iter_started = std::time::Instant::now();
            info!("🎯 Test-focus iteration {tail}/{}", self.settings.limits.test_tail_iterations);

            let targets = std::mem::take(&mut state.carried_test_defects);
            let targets: Vec<Defect> = targets
                .into_iter()
                .filter(|d| d.bug_type == BugType::TestFailure)
                .collect();
            if targets.is_empty() {
                return Ok(());
            }
            let defects_before = targets.len();

            let fixes = fixer.fix_defects(root, &targets).await?;
            let fixes_attempted = fixes.len();
            let fixes_successful = fixes.iter().filter(|f| f.status == FixStatus::Fixed).count();
            state.all_fixes.extend(fixes);

            let test_report = tester.run(root, framework).await.unwrap_or_default();
            let post_scan = sandbox.scan(root, project).await?;
            self.absorb_test_report(state, &test_report, post_scan.defects.len());
            state.carried_test_defects = synthesize_test_defects(&test_report);
            state.final_errors = post_scan.defects.len();

            let index = self.settings.limits.max_iterations + tail;
            state.iterations.push(IterationRecord {
                index,
                defects_before,
                defects_after: state.carried_test_defects.len(),
                fixes_attempted,
                fixes_successful,
                duration_secs: iter_started.elapsed().as_secs_f64(),
                fixed_signatures: Vec::new(),
                remaining_signatures: state
                    .carried_test_defects
                    .iter()
                    .map(Defect::signature)
                    .collect(),
            });

            if fixes_successful == 0 {
                info!("   No test fixes landed, ending tail");
                return Ok(());
            }
        }
        Ok(())
    }

    fn absorb_test_report(&self, state: &mut RunState, report: &TestReport, open_defects: usize) {
        state.no_tests = report.no_tests;
        state.test_results = report.outcomes.clone();
        // A repo with zero discovered tests counts as passing only while
        // no defects are outstanding.
        state.tests_passing = if report.no_tests {
            open_defects == 0
        } else {
            report.all_passed()
        };
    }

    async fn generate_tests(&self, state: &mut RunState, root: &Path, fixer: &CodeFixer) {
        self.report("generating-tests", 88, "Generating tests for fixed files");
        for file in state.fixed_files() {
            match fixer.generate_test(root, &file).await {
                Ok(Some(generated)) => state.generated_tests.push(generated),
                Ok(None) => {}
                Err(e) => warn!("test generation skipped for {file}: {e}"),
            }
        }
    }

    fn resolution_status(&self, state: &RunState) -> ResolutionStatus {
        if state.final_errors == 0 && state.tests_passing {
            ResolutionStatus::AllResolved
        } else if state.successful_fixes() > 0 {
            ResolutionStatus::PartiallyResolved
        } else {
            ResolutionStatus::Unresolved
        }
    }

    /// Commit, push, open the PR and watch CI, as requested.
    async fn publish(
        &self,
        request: &RunRequest,
        state: &mut RunState,
        root: &Path,
        default_branch: &str,
    ) -> PushArtifacts {
        let mut artifacts = PushArtifacts::default();

        let Some(token) = request.push_token.as_deref() else {
            return artifacts;
        };
        if state.successful_fixes() == 0 {
            info!("No applied fixes; skipping push");
            return artifacts;
        }
        if state.branch_name == default_branch {
            warn!("remediation branch equals default branch; refusing to push");
            return artifacts;
        }

        self.report("pushing", 90, "Pushing fixes");
        let message = self.commit_message(request, state);

        let push_result: Result<(String, String)> = async {
            self.git.stage_all(root).await?;
            let sha = self.git.commit(root, &message).await?;
            state.commit_count += 1;
            let branch_url = self.git.push(root, &state.branch_name, Some(token)).await?;
            Ok((sha, branch_url))
        }
        .await;

        let (sha, branch_url) = match push_result {
            Ok(pair) => pair,
            Err(e) => {
                warn!("push failed: {e}");
                return artifacts;
            }
        };
        artifacts.commit_sha = Some(sha);
        artifacts.branch_url = Some(branch_url);

        if !request.create_pr {
            return artifacts;
        }
        let Some(forge) = &self.forge else {
            warn!("PR requested but no forge adapter configured");
            return artifacts;
        };
        let Some(repo) = RepoRef::parse(&request.repo_url) else {
            return artifacts;
        };

        let base = if default_branch.is_empty() { "main" } else { default_branch };
        self.report("pull-request", 92, "Opening pull request");
        let title = format!(
            "[AI Fix] Auto-fix {} bugs - {}",
            state.successful_fixes(),
            request.team_name
        );
        let body = self.pr_body(request, state);

        let pr = match forge
            .create_pull_request(&repo, &state.branch_name, base, &title, &body)
            .await
        {
            Ok(pr) => pr,
            Err(e) => {
                warn!("PR creation failed: {e}");
                return artifacts;
            }
        };
        artifacts.pr_url = Some(pr.url.clone());
        artifacts.pr_number = Some(pr.number);
        artifacts.ci_status = Some(CiStatus::Pending);

        if request.auto_merge_on_ci {
            self.report("ci-watch", 95, "Waiting for CI");
            let (ci_status, merged) = poll_ci_and_merge(
                forge.as_ref(),
                &repo,
                &state.branch_name,
                pr.number,
                Duration::from_secs(self.settings.timeouts.ci_poll_interval_secs),
                Duration::from_secs(self.settings.timeouts.ci_poll_total_secs),
                &self.cancel,
            )
            .await;
            artifacts.ci_status = Some(ci_status);
            artifacts.merged = merged;
        }

        artifacts
    }

    fn commit_message(&self, request: &RunRequest, state: &RunState) -> String {
        let files = state.fixed_files();
        let initial = state.initial_errors.unwrap_or(0);
        let resolution = self.resolution_status(state);
        let total_secs: f64 = state.iterations.iter().map(|i| i.duration_secs).sum();

        let mut message = format!(
            "fix: Auto-fix {} bugs in {} files\n\nTeam: {}\nLeader: {}\nBranch: {}\n\nSummary:\n- Initial errors: {}\n- Errors fixed: {}\n- Remaining errors: {}\n- Resolution: {:?}\n- Iterations: {}\n- Total time: {:.2}s\n\nFiles modified:\n",
            state.successful_fixes(),
            files.len(),
            request.team_name,
            request.leader_name,
            state.branch_name,
            initial,
            initial.saturating_sub(state.final_errors),
            state.final_errors,
            resolution,
            state.iterations.len(),
            total_secs,
        );
        for file in files.iter().take(10) {
            message.push_str(&format!("  - {file}\n"));
        }
        if files.len() > 10 {
            message.push_str(&format!("  - ... and {} more files\n", files.len() - 10));
        }
        message
    }

    fn pr_body(&self, request: &RunRequest, state: &RunState) -> String {
        let files = state.fixed_files();
        let initial = state.initial_errors.unwrap_or(0);
        let mut body = format!(
            "## Automated fix report\n\n**Team:** {}\n**Leader:** {}\n**Branch:** `{}`\n\n### Summary\n- **Initial errors:** {}\n- **Errors fixed:** {}\n- **Remaining errors:** {}\n- **Resolution:** {:?}\n- **Iterations:** {}\n\n### Files modified\n",
            request.team_name,
            request.leader_name,
            state.branch_name,
            initial,
            initial.saturating_sub(state.final_errors),
            state.final_errors,
            self.resolution_status(state),
            state.iterations.len(),
        );
        for file in files.iter().take(10) {
            body.push_str(&format!("- `{file}`\n"));
        }
        if files.len() > 10 {
            body.push_str(&format!("- ... and {} more files\n", files.len() - 10));
        }
        body
    }

    fn error_result(
        &self,
        request: &RunRequest,
        branch_name: &str,
        start_time: chrono::DateTime<Utc>,
        status: RunStatus,
    ) -> RunResult {
        RunResult {
            repo_url: request.repo_url.clone(),
            team_name: request.team_name.clone(),
            leader_name: request.leader_name.clone(),
            branch_name: branch_name.to_string(),
            total_failures_detected: 0,
            total_fixes_applied: 0,
            total_time_taken: 0.0,
            fixes: Vec::new(),
            test_results: Vec::new(),
            generated_tests: None,
            start_time,
            end_time: Utc::now(),
            status,
            summary: RunSummary {
                total_iterations: 0,
                initial_errors: 0,
                final_errors: 0,
                resolution_status: ResolutionStatus::Unresolved,
                iterations: Vec::new(),
            },
            commit_sha: None,
            branch_url: None,
            pr_url: None,
            pr_number: None,
            ci_status: None,
            merged: false,
            score: 0,
        }
    }
}

/// Artifacts from the publish phase.
#[derive(Debug, Default)]
struct PushArtifacts {
    commit_sha: Option<String>,
    branch_url: Option<String>,
    pr_url: Option<String>,
    pr_number: Option<u64>,
    ci_status: Option<CiStatus>,
    merged: bool,
}

/// One synthetic TEST_FAILURE defect per distinct failing source file.
fn synthesize_test_defects(report: &TestReport) -> Vec<Defect> {
    let mut seen = HashSet::new();
    let mut defects = Vec::new();

    for outcome in report.outcomes.iter().filter(|o| !o.passed) {
        let Some(file) = &outcome.file else { continue };
        if !seen.insert(file.clone()) {
            continue;
        }
        let mut defect = Defect::new(
            file.clone(),
            outcome.line.unwrap_or(1),
            BugType::TestFailure,
            outcome
                .message
                .clone()
                .unwrap_or_else(|| format!("test {} failed", outcome.name)),
        );
        defect.raw_error = format!(
            "Test failure in {}: {}",
            outcome.name,
            outcome.message.as_deref().unwrap_or("assertion failed")
        );
        defects.push(defect);
    }
    defects
}

/// Failures caused by missing tooling or sandbox plumbing, never by the
/// analyzed project; they are excluded from the fixable set.
fn is_infrastructure_error(defect: &Defect) -> bool {
    const MARKERS: &[&str] = &[
        "command not found",
        "is not recognized as an internal",
        "cannot connect to the docker daemon",
        "docker: not found",
        "npm err! code enoent",
        "no such file or directory (os error",
    ];
    let haystack = format!("{} {}", defect.message, defect.raw_error).to_lowercase();
    MARKERS.iter().any(|m| haystack.contains(m))
}
