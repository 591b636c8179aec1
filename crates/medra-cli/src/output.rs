//! Plain-text rendering of a run result.

use medra_engine::{FixStatus, RunResult};

pub fn render_result(result: &RunResult) -> String {
    let mut out = String::new();

    out.push_str(&format!("Repository : {}\n", result.repo_url));
    out.push_str(&format!("Branch     : {}\n", result.branch_name));
    out.push_str(&format!("Status     : {:?}\n", result.status));
    out.push_str(&format!(
        "Resolution : {:?} (score {})\n",
        result.summary.resolution_status, result.score
    ));
    out.push_str(&format!(
        "Defects    : {} found, {} fixed, {} remaining\n",
        result.summary.initial_errors,
        result.total_fixes_applied,
        result.summary.final_errors
    ));
    out.push_str(&format!(
        "Iterations : {} in {:.1}s\n",
        result.summary.total_iterations, result.total_time_taken
    ));

    if !result.fixes.is_empty() {
        out.push_str("\nFixes:\n");
        for fix in &result.fixes {
            let mark = match fix.status {
                FixStatus::Fixed => "✔",
                FixStatus::Failed => "✘",
                FixStatus::Proposed => "•",
            };
            out.push_str(&format!(
                "  {mark} [{}] {}:{} - {}\n",
                fix.bug_type, fix.file_path, fix.line_number, fix.commit_message
            ));
        }
    }

    if let Some(url) = &result.branch_url {
        out.push_str(&format!("\nPushed     : {url}\n"));
    }
    if let Some(pr) = &result.pr_url {
        out.push_str(&format!("PR         : {pr}\n"));
    }
    if let Some(ci) = &result.ci_status {
        out.push_str(&format!("CI         : {}\n", ci.as_str()));
    }
    if result.merged {
        out.push_str("Merged     : yes\n");
    }

    print!("{out}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use medra_engine::report::{ResolutionStatus, RunStatus, RunSummary};

    #[test]
    fn renders_the_essentials() {
        let result = RunResult {
            repo_url: "https://github.com/acme/widget".into(),
            team_name: "Acme".into(),
            leader_name: "Jane".into(),
            branch_name: "ACME_JANE_AI_Fix".into(),
            total_failures_detected: 2,
            total_fixes_applied: 2,
            total_time_taken: 42.0,
            fixes: vec![],
            test_results: vec![],
            generated_tests: None,
            start_time: Utc::now(),
            end_time: Utc::now(),
            status: RunStatus::Completed,
            summary: RunSummary {
                total_iterations: 2,
                initial_errors: 2,
                final_errors: 0,
                resolution_status: ResolutionStatus::AllResolved,
                iterations: vec![],
            },
            commit_sha: None,
            branch_url: Some("https://github.com/acme/widget/tree/ACME_JANE_AI_Fix".into()),
            pr_url: None,
            pr_number: None,
            ci_status: None,
            merged: false,
            score: 100,
        };

        let text = render_result(&result);
        assert!(text.contains("ACME_JANE_AI_Fix"));
        assert!(text.contains("score 100"));
        assert!(text.contains("Pushed"));
    }
}
