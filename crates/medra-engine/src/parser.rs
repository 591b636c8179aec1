//! Deterministic error parser and classifier.
//!
//! Two responsibilities, no LLM involved: extract `(file, line, kind,
//! message)` tuples from raw tool output with an ordered list of tagged
//! regexes, and map each extracted kind onto the closed bug taxonomy with
//! a fixed lookup table. Running the parser twice over the same output
//! yields the same defect sequence.

use std::sync::OnceLock;

use regex::Regex;

use crate::defect::{dedup_defects, BugType, Defect};

/// One extracted diagnostic before classification.
#[derive(Debug, Clone)]
pub struct ExtractedError {
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
    /// The error kind token, e.g. `SyntaxError` or `TS2345`
    pub kind: String,
    pub message: String,
}

/// Classification table. Substring matching is case-insensitive; the first
/// matching row wins.
const CLASSIFICATION: &[(&[&str], BugType)] = &[
    (&["syntaxerror", "invalid syntax"], BugType::Syntax),
    (
        &["indentationerror", "taberror", "unexpected indent", "unindent does not match"],
        BugType::Indentation,
    ),
    (
        &["importerror", "modulenotfounderror", "cannot import name", "no module named"],
        BugType::Import,
    ),
    (
        &["typeerror", "attributeerror", "incompatible types"],
        BugType::TypeError,
    ),
    (
        &[
            "nameerror",
            "valueerror",
            "keyerror",
            "indexerror",
            "zerodivisionerror",
            "referenceerror",
            "rangeerror",
        ],
        BugType::Logic,
    ),
    (&["assertionerror"], BugType::TestFailure),
    (
        &["runtimeerror", "permissionerror", "recursionerror", "filenotfounderror"],
        BugType::Runtime,
    ),
];

/// Map an error kind (plus surrounding message) onto the bug taxonomy.
pub fn classify(kind: &str, message: &str) -> BugType {
    let haystack = format!("{kind} {message}").to_lowercase();

    for (needles, bug_type) in CLASSIFICATION {
        if needles.iter().any(|n| haystack.contains(n)) {
            return *bug_type;
        }
    }

    // TypeScript diagnostic codes classify as type errors.
    if ts_code_re().is_match(kind) {
        return BugType::TypeError;
    }

    // pytest FAILED lines with assertion text are test failures.
    if haystack.contains("failed") && haystack.contains("assert") {
        return BugType::TestFailure;
    }

    BugType::Linting
}

fn ts_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^TS\d+").unwrap())
}

/// Paths belonging to interpreters and test frameworks, not the project.
const FRAMEWORK_PATHS: &[&str] = &[
    "site-packages",
    "_pytest",
    "/pytest/",
    "/unittest/",
    "lib/python",
    "node_modules",
    "internal/modules",
];

fn is_framework_path(path: &str) -> bool {
    FRAMEWORK_PATHS.iter().any(|p| path.contains(p))
}

struct TaggedPattern {
    tag: &'static str,
    re: Regex,
}

/// Ordered extraction patterns. Earlier patterns are more specific; the
/// generic `file:line` fallback runs last.
fn patterns() -> &'static [TaggedPattern] {
    static PATTERNS: OnceLock<Vec<TaggedPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            // File "path/file.py", line 15 ... SomeError: message
            TaggedPattern {
                tag: "python_traceback",
                re: Regex::new(r#"File ["'](.+?)["'],\s*line\s*(\d+)"#).unwrap(),
            },
            // path/file.py:15: SomeError
            TaggedPattern {
                tag: "pytest_short",
                re: Regex::new(r"(?m)^(.+?\.py):(\d+):\s*(\w+(?:Error|Exception|Warning))").unwrap(),
            },
            // at fn (file.js:15:10)
            TaggedPattern {
                tag: "node_stack",
                re: Regex::new(r"at\s+(?:.+?\s+\()?(.+?\.(?:js|ts|jsx|tsx|mjs|cjs)):(\d+):?(\d+)?")
                    .unwrap(),
            },
            // path/file.js:15:10  error  message  rule-id
            TaggedPattern {
                tag: "eslint",
                re: Regex::new(r"(?mi)^(.+?\.(?:js|ts|jsx|tsx)):(\d+):(\d+)\s+(error|warning)\s+(.+)$")
                    .unwrap(),
            },
            // file.ts(12,34): error TS2345: message
            TaggedPattern {
                tag: "tsc",
                re: Regex::new(r"(?m)^(.+?\.(?:ts|tsx|js|jsx))\((\d+),(\d+)\):\s*error\s+(TS\d+):\s*(.+)$")
                    .unwrap(),
            },
            // Foo.java:12: error: message
            TaggedPattern {
                tag: "javac",
                re: Regex::new(r"(?m)^(.+?\.java):(\d+):\s*(?:error|warning):\s*(.+)$").unwrap(),
            },
            // generic file:line:col fallback
            TaggedPattern {
                tag: "generic",
                re: Regex::new(r"([^\s:]+\.(?:py|js|ts|jsx|tsx|java)):(\d+)(?::(\d+))?").unwrap(),
            },
        ]
    })
}

/// Extract a short error-kind token from the raw text around a match.
fn extract_kind(raw: &str) -> String {
    static KIND_RE: OnceLock<Regex> = OnceLock::new();
    let re = KIND_RE.get_or_init(|| Regex::new(r"(\w+(?:Error|Exception)):\s*(.+)").unwrap());

    if let Some(caps) = re.captures(raw) {
        return caps[1].to_string();
    }
    static TS_RE: OnceLock<Regex> = OnceLock::new();
    let ts = TS_RE.get_or_init(|| Regex::new(r"\b(TS\d+)\b").unwrap());
    if let Some(caps) = ts.captures(raw) {
        return caps[1].to_string();
    }
    String::new()
}

fn first_meaningful_line(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .chars()
        .take(200)
        .collect()
}

/// Extract structured errors from raw tool output.
pub fn extract(raw: &str) -> Vec<ExtractedError> {
    let mut found: Vec<ExtractedError> = Vec::new();
    let mut seen: std::collections::HashSet<(String, u32)> = std::collections::HashSet::new();

    let kind_hint = extract_kind(raw);

    for pattern in patterns() {
        for caps in pattern.re.captures_iter(raw) {
            let file = caps[1].replace('\\', "/");
            if is_framework_path(&file) {
                continue;
            }
            let Ok(line) = caps[2].parse::<u32>() else { continue };
            if !seen.insert((file.clone(), line)) {
                continue;
            }

            let (kind, message, column) = match pattern.tag {
                "pytest_short" => (caps[3].to_string(), first_meaningful_line(raw), None),
                "eslint" => {
                    let col = caps[3].parse::<u32>().ok();
                    (caps[4].to_string(), caps[5].trim().to_string(), col)
                }
                "tsc" => {
                    let col = caps[3].parse::<u32>().ok();
                    (caps[4].to_string(), caps[5].trim().to_string(), col)
                }
                "javac" => (String::new(), caps[3].trim().to_string(), None),
                "node_stack" => {
                    let col = caps.get(3).and_then(|c| c.as_str().parse::<u32>().ok());
                    (kind_hint.clone(), first_meaningful_line(raw), col)
                }
                _ => (kind_hint.clone(), first_meaningful_line(raw), None),
            };

            found.push(ExtractedError { file, line, column, kind, message });
        }
    }

    found
}

/// Parse raw tool output into classified, deduplicated defects.
pub fn parse(raw: &str) -> Vec<Defect> {
    let defects = extract(raw)
        .into_iter()
        .map(|e| {
            let bug_type = classify(&e.kind, &e.message);
            let mut defect = Defect::new(e.file, e.line, bug_type, e.message);
            defect.column = e.column;
            defect.raw_error = raw_slice(raw);
            defect
        })
        .collect();
    dedup_defects(defects)
}

fn raw_slice(raw: &str) -> String {
    raw.chars().take(2000).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_table_rows() {
        assert_eq!(classify("SyntaxError", "invalid syntax"), BugType::Syntax);
        assert_eq!(classify("IndentationError", ""), BugType::Indentation);
        assert_eq!(classify("TabError", ""), BugType::Indentation);
        assert_eq!(classify("ModuleNotFoundError", "No module named x"), BugType::Import);
        assert_eq!(classify("TypeError", ""), BugType::TypeError);
        assert_eq!(classify("AttributeError", ""), BugType::TypeError);
        assert_eq!(classify("TS2345", "Argument of type"), BugType::TypeError);
        assert_eq!(classify("NameError", ""), BugType::Logic);
        assert_eq!(classify("ReferenceError", ""), BugType::Logic);
        assert_eq!(classify("AssertionError", "assert 5 == 6"), BugType::TestFailure);
        assert_eq!(classify("RuntimeError", ""), BugType::Runtime);
        assert_eq!(classify("FileNotFoundError", ""), BugType::Runtime);
        assert_eq!(classify("E501", "line too long"), BugType::Linting);
        assert_eq!(classify("", "something unmapped"), BugType::Linting);
    }

    #[test]
    fn earlier_table_row_wins_ties() {
        // Contains both "invalid syntax" (row 1) and "TypeError" (row 4).
        assert_eq!(classify("SyntaxError", "TypeError mentioned later"), BugType::Syntax);
        // IndentationError outranks ImportError by table order.
        assert_eq!(
            classify("IndentationError", "while handling ImportError"),
            BugType::Indentation
        );
    }

    #[test]
    fn python_traceback_extraction() {
        let raw = concat!(
            "Traceback (most recent call last):\n",
            "  File \"app/main.py\", line 14, in <module>\n",
            "    run()\n",
            "  File \"/usr/lib/python3.11/site-packages/flask/app.py\", line 99, in run\n",
            "NameError: name 'run' is not defined\n",
        );
        let defects = parse(raw);
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].file, "app/main.py");
        assert_eq!(defects[0].line, 14);
        assert_eq!(defects[0].bug_type, BugType::Logic);
    }

    #[test]
    fn pytest_short_form_extraction() {
        let raw = "calculator.py:2: AssertionError\nassert multiply(2, 3) == 6";
        let extracted = extract(raw);
        assert_eq!(extracted[0].file, "calculator.py");
        assert_eq!(extracted[0].line, 2);
        assert_eq!(extracted[0].kind, "AssertionError");
        assert_eq!(parse(raw)[0].bug_type, BugType::TestFailure);
    }

    #[test]
    fn tsc_diagnostic_extraction() {
        let raw = "src/index.ts(7,3): error TS2345: Argument of type 'string' is not assignable.";
        let defects = parse(raw);
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].file, "src/index.ts");
        assert_eq!(defects[0].line, 7);
        assert_eq!(defects[0].column, Some(3));
        assert_eq!(defects[0].bug_type, BugType::TypeError);
    }

    #[test]
    fn eslint_line_extraction() {
        let raw = "src/app.js:10:5  error  Unexpected console statement  no-console";
        let defects = parse(raw);
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].file, "src/app.js");
        assert_eq!(defects[0].line, 10);
        assert_eq!(defects[0].bug_type, BugType::Linting);
    }

    #[test]
    fn javac_diagnostic_extraction() {
        let raw = "src/Main.java:12: error: ';' expected\n        int x = 1\n";
        let extracted = extract(raw);
        assert_eq!(extracted[0].file, "src/Main.java");
        assert_eq!(extracted[0].line, 12);
    }

    #[test]
    fn framework_internals_are_skipped() {
        let raw = concat!(
            "  File \"/usr/lib/python3.11/site-packages/_pytest/main.py\", line 10\n",
            "  File \"tests/test_app.py\", line 5\n",
            "AssertionError: boom\n",
        );
        let defects = parse(raw);
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].file, "tests/test_app.py");
    }

    #[test]
    fn parsing_is_deterministic() {
        let raw = "a.py:1: SyntaxError\nb.py:2: ValueError\n";
        let first: Vec<String> = parse(raw).iter().map(Defect::signature).collect();
        let second: Vec<String> = parse(raw).iter().map(Defect::signature).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_output_has_no_defects() {
        assert!(parse("").is_empty());
        assert!(parse("all checks passed\n").is_empty());
    }
}
