//! Run scoring.
//!
//! A total function of the run outputs: identical inputs always produce
//! identical scores.

/// Inputs the score is computed from.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs {
    /// All defects resolved and the test suite passes
    pub tests_passing: bool,
    /// Any defects or failures left at the end
    pub failures_remaining: bool,
    pub successful_fixes: usize,
    pub total_time_secs: f64,
    pub total_commits: usize,
}

/// Wall-clock threshold for the speed bonus, in seconds.
const SPEED_BONUS_THRESHOLD_SECS: f64 = 300.0;
/// Commits beyond this count cost points.
const COMMIT_BUDGET: usize = 20;

/// Compute the bounded run score.
pub fn compute_score(inputs: ScoreInputs) -> u8 {
    let base: i64 = if inputs.tests_passing && !inputs.failures_remaining {
        100
    } else if inputs.successful_fixes == 0 && inputs.failures_remaining {
        0
    } else {
        (40 + 15 * inputs.successful_fixes as i64).min(100)
    };

    let mut score = base;

    if base == 100 && inputs.total_time_secs < SPEED_BONUS_THRESHOLD_SECS {
        score += 10;
    }

    if inputs.total_commits > COMMIT_BUDGET {
        score -= 2 * (inputs.total_commits - COMMIT_BUDGET) as i64;
    }

    score.clamp(0, 100) as u8
}
