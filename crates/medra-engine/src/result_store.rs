//! Durable run-result storage: one JSON document per run id, written
//! atomically via write-to-temp and rename.

use std::path::{Path, PathBuf};

use tracing::info;

use medra_core::{MedraError, Result};

use crate::report::RunResult;

/// Writes run results under a shared directory, keyed by run id.
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    /// Persist the result document. The rename makes the write atomic:
    /// readers only ever observe a complete document.
    pub fn persist(&self, run_id: &str, result: &RunResult) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let json = serde_json::to_vec_pretty(result)?;
        let final_path = self.path_for(run_id);

        let temp = tempfile::NamedTempFile::new_in(&self.dir)?;
        std::fs::write(temp.path(), &json)?;
        temp.persist(&final_path)
            .map_err(|e| MedraError::fatal(format!("result store rename failed: {e}")))?;

        info!("💾 Run result persisted to {}", final_path.display());
        Ok(final_path)
    }

    /// Read a previously persisted result.
    pub fn load(&self, run_id: &str) -> Result<RunResult> {
        let bytes = std::fs::read(self.path_for(run_id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ResolutionStatus, RunStatus, RunSummary};
    use chrono::Utc;

    fn minimal_result() -> RunResult {
        RunResult {
            repo_url: "https://github.com/acme/widget".into(),
            team_name: "Acme".into(),
            leader_name: "Jane".into(),
            branch_name: "ACME_JANE_AI_Fix".into(),
            total_failures_detected: 0,
            total_fixes_applied: 0,
            total_time_taken: 1.0,
            fixes: vec![],
            test_results: vec![],
            generated_tests: None,
            start_time: Utc::now(),
            end_time: Utc::now(),
            status: RunStatus::Completed,
            summary: RunSummary {
                total_iterations: 0,
                initial_errors: 0,
                final_errors: 0,
                resolution_status: ResolutionStatus::AllResolved,
                iterations: vec![],
            },
            commit_sha: None,
            branch_url: None,
            pr_url: None,
            pr_number: None,
            ci_status: None,
            merged: false,
            score: 100,
        }
    }

    #[test]
    fn persist_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let result = minimal_result();

        let path = store.persist("run-42", &result).unwrap();
        assert!(path.ends_with("run-42.json"));

        let loaded = store.load("run-42").unwrap();
        assert_eq!(loaded.repo_url, result.repo_url);
        assert_eq!(loaded.score, 100);
    }

    #[test]
    fn persist_overwrites_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());

        let mut result = minimal_result();
        store.persist("run-1", &result).unwrap();
        result.score = 55;
        store.persist("run-1", &result).unwrap();

        assert_eq!(store.load("run-1").unwrap().score, 55);
    }

    #[test]
    fn no_partial_document_is_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        store.persist("run-9", &minimal_result()).unwrap();

        // The only surviving file is the named document.
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["run-9.json"]);
    }
}
