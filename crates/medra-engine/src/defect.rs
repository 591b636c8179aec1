//! Defect records and the closed bug taxonomy.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The closed bug taxonomy. Parsers that cannot classify emit `Linting`
/// (static findings) or `Runtime` (execution findings); nothing outside
/// this enum ever reaches the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BugType {
    Syntax,
    Indentation,
    Import,
    TypeError,
    Logic,
    TestFailure,
    Runtime,
    Linting,
}

impl BugType {
    /// Dedup and scheduling priority. Structural errors outrank everything
    /// that may become moot once they are repaired.
    pub fn priority(&self) -> u8 {
        match self {
            BugType::Syntax => 8,
            BugType::Indentation => 7,
            BugType::Import => 6,
            BugType::TypeError => 5,
            BugType::Logic => 4,
            BugType::TestFailure => 3,
            BugType::Runtime => 2,
            BugType::Linting => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BugType::Syntax => "SYNTAX",
            BugType::Indentation => "INDENTATION",
            BugType::Import => "IMPORT",
            BugType::TypeError => "TYPE_ERROR",
            BugType::Logic => "LOGIC",
            BugType::TestFailure => "TEST_FAILURE",
            BugType::Runtime => "RUNTIME",
            BugType::Linting => "LINTING",
        }
    }
}

impl std::fmt::Display for BugType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity class of a defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Prevents the project from running at all
    Blocker,
    /// Repairable in place
    Fixable,
    /// Cosmetic
    Stylistic,
}

impl Severity {
    /// Default severity for a bug type.
    pub fn for_bug_type(bug_type: BugType) -> Self {
        match bug_type {
            BugType::Syntax | BugType::Indentation | BugType::Import => Severity::Blocker,
            BugType::Linting => Severity::Stylistic,
            _ => Severity::Fixable,
        }
    }
}

/// One actionable diagnostic at one location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defect {
    /// Repo-relative source path
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
    pub bug_type: BugType,
    /// Raw tool output the defect was extracted from
    pub raw_error: String,
    /// Short human-readable message
    pub message: String,
    pub severity: Severity,
    /// True when produced by the degraded (non-isolated) runtime path
    pub degraded_sandbox: bool,
}

impl Defect {
    pub fn new(file: impl Into<String>, line: u32, bug_type: BugType, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            file: file.into(),
            line,
            column: None,
            bug_type,
            raw_error: message.clone(),
            message,
            severity: Severity::for_bug_type(bug_type),
            degraded_sandbox: false,
        }
    }

    /// Stable dedup key: `<bug-type>|<file>|<line>`.
    pub fn signature(&self) -> String {
        format!("{}|{}|{}", self.bug_type, self.file, self.line)
    }

    /// Key ignoring bug type, used to collapse disagreeing tools onto one
    /// location.
    fn location_key(&self) -> (String, u32) {
        (self.file.clone(), self.line)
    }
}

/// Merge defects from multiple analyzers. At most one defect survives per
/// file/line; on collision the highest-priority bug type wins.
pub fn dedup_defects(defects: Vec<Defect>) -> Vec<Defect> {
    let mut by_location: HashMap<(String, u32), Defect> = HashMap::new();
    let mut order: Vec<(String, u32)> = Vec::new();

    for defect in defects {
        let key = defect.location_key();
        match by_location.get(&key) {
            Some(existing) if existing.bug_type.priority() >= defect.bug_type.priority() => {}
            Some(_) => {
                by_location.insert(key, defect);
            }
            None => {
                order.push(key.clone());
                by_location.insert(key, defect);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| by_location.remove(&key))
        .collect()
}

/// Sort for the fix phase: bug-type priority descending, then file, then
/// ascending line.
pub fn sort_for_fixing(defects: &mut [Defect]) {
    defects.sort_by(|a, b| {
        b.bug_type
            .priority()
            .cmp(&a.bug_type.priority())
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.line.cmp(&b.line))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_is_total() {
        let order = [
            BugType::Syntax,
            BugType::Indentation,
            BugType::Import,
            BugType::TypeError,
            BugType::Logic,
            BugType::TestFailure,
            BugType::Runtime,
            BugType::Linting,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].priority() > pair[1].priority());
        }
    }

    #[test]
    fn signature_format() {
        let d = Defect::new("src/app.py", 14, BugType::Syntax, "invalid syntax");
        assert_eq!(d.signature(), "SYNTAX|src/app.py|14");
    }

    #[test]
    fn serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&BugType::TypeError).unwrap();
        assert_eq!(json, "\"TYPE_ERROR\"");
        let back: BugType = serde_json::from_str("\"TEST_FAILURE\"").unwrap();
        assert_eq!(back, BugType::TestFailure);
    }

    #[test]
    fn dedup_keeps_highest_priority_on_collision() {
        let defects = vec![
            Defect::new("a.py", 3, BugType::Linting, "long line"),
            Defect::new("a.py", 3, BugType::Syntax, "invalid syntax"),
            Defect::new("b.py", 1, BugType::Logic, "bad value"),
        ];
        let merged = dedup_defects(defects);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].bug_type, BugType::Syntax);
        assert_eq!(merged[1].file, "b.py");
    }

    #[test]
    fn dedup_is_stable_across_reruns() {
        let build = || {
            vec![
                Defect::new("x.py", 1, BugType::Import, "no module"),
                Defect::new("y.py", 2, BugType::Runtime, "crash"),
            ]
        };
        let a: Vec<String> = dedup_defects(build()).iter().map(Defect::signature).collect();
        let b: Vec<String> = dedup_defects(build()).iter().map(Defect::signature).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn fix_ordering() {
        let mut defects = vec![
            Defect::new("b.py", 9, BugType::Linting, "style"),
            Defect::new("a.py", 20, BugType::Syntax, "syntax"),
            Defect::new("a.py", 3, BugType::Syntax, "syntax"),
            Defect::new("a.py", 5, BugType::TestFailure, "assert"),
        ];
        sort_for_fixing(&mut defects);
        let sigs: Vec<String> = defects.iter().map(Defect::signature).collect();
        assert_eq!(
            sigs,
            vec![
                "SYNTAX|a.py|3",
                "SYNTAX|a.py|20",
                "TEST_FAILURE|a.py|5",
                "LINTING|b.py|9",
            ]
        );
    }
}
