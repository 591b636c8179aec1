//! JavaScript/TypeScript static analysis.
//!
//! Prefers the project-local toolchain (`tsc --noEmit`, local eslint).
//! When neither is installed, a conservative built-in pass looks for the
//! error shapes that break builds: severe bracket imbalance, debugger
//! statements, empty catch blocks, assignment-in-condition, loose
//! inequality, and the classic JSX attribute mistakes.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use medra_core::{CancelToken, MedraError, Result, Settings};

use crate::defect::{BugType, Defect, Severity};
use crate::detector::source_files;
use crate::parser;
use crate::sandbox::process::run_bounded;

/// Net bracket imbalance below this is ignored; JSX with embedded
/// expressions trips smaller counts constantly.
const BRACKET_IMBALANCE_THRESHOLD: i32 = 2;

/// Scan all JS/TS sources. Returns defects plus raw tool output for the
/// classifier's supplemental pass.
pub async fn scan(
    root: &Path,
    settings: &Settings,
    cancel: &CancelToken,
) -> Result<(Vec<Defect>, Vec<(String, String)>)> {
    let mut defects = Vec::new();
    let mut raw_outputs = Vec::new();

    // Project-local type check first.
    if root.join("tsconfig.json").exists() {
        if let Some(raw) = run_tsc(root, settings, cancel).await? {
            defects.extend(parser::parse(&raw));
            raw_outputs.push(("tsc".to_string(), raw));
        }
    }

    // Project-local linter, else the built-in pattern checks.
    match run_local_eslint(root, settings, cancel).await? {
        Some(raw) => {
            defects.extend(parser::parse(&raw));
            raw_outputs.push(("eslint".to_string(), raw));
        }
        None => {
            for file in source_files(root, &[".js", ".jsx", ".ts", ".tsx"]) {
                if let Ok(content) = std::fs::read_to_string(root.join(&file)) {
                    defects.extend(check_file(&file, &content));
                }
            }
        }
    }

    Ok((defects, raw_outputs))
}

async fn run_tsc(
    root: &Path,
    settings: &Settings,
    cancel: &CancelToken,
) -> Result<Option<String>> {
    let timeout = Duration::from_secs(settings.timeouts.analyzer_secs);
    let cap = settings.limits.captured_output_bytes;

    let local_tsc = root.join("node_modules/.bin/tsc");
    let program = if local_tsc.exists() {
        local_tsc.to_string_lossy().into_owned()
    } else {
        "tsc".to_string()
    };

    match run_bounded(&program, &["--noEmit"], root, timeout, cap, cancel).await {
        Ok(out) => Ok(Some(out.combined())),
        Err(MedraError::Environmental { .. }) => {
            debug!("tsc unavailable, skipping type check");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn run_local_eslint(
    root: &Path,
    settings: &Settings,
    cancel: &CancelToken,
) -> Result<Option<String>> {
    let local = root.join("node_modules/.bin/eslint");
    if !local.exists() {
        return Ok(None);
    }
    let timeout = Duration::from_secs(settings.timeouts.analyzer_secs);
    let cap = settings.limits.captured_output_bytes;
    let program = local.to_string_lossy().into_owned();

    match run_bounded(&program, &["--format", "unix", "."], root, timeout, cap, cancel).await {
        Ok(out) => Ok(Some(out.combined())),
        Err(MedraError::Environmental { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Built-in checks for one file.
pub fn check_file(relative: &str, content: &str) -> Vec<Defect> {
    let lines: Vec<&str> = content.lines().collect();
    let mut defects = bracket_scan(relative, &lines);
    defects.extend(pattern_checks(relative, &lines));
    if relative.ends_with(".jsx") || relative.ends_with(".tsx") {
        defects.extend(jsx_checks(relative, &lines));
    }
    defects
}

/// Count bracket balance across the file, ignoring strings, template
/// literals and comments. Only a net imbalance above the threshold is
/// reported.
fn bracket_scan(relative: &str, lines: &[&str]) -> Vec<Defect> {
    let mut paren = 0i32;
    let mut brace = 0i32;
    let mut bracket = 0i32;

    let mut in_string = false;
    let mut string_char = ' ';
    let mut in_template = false;
    let mut in_block_comment = false;

    for line in lines {
        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();

            if in_block_comment {
                if c == '*' && next == Some('/') {
                    in_block_comment = false;
                    i += 2;
                    continue;
                }
                i += 1;
                continue;
            }
            if in_string {
                if c == '\\' {
                    i += 2;
                    continue;
                }
                if c == string_char {
                    in_string = false;
                }
                i += 1;
                continue;
            }
            if in_template {
                if c == '\\' {
                    i += 2;
                    continue;
                }
                if c == '`' {
                    in_template = false;
                }
                i += 1;
                continue;
            }

            match c {
                '/' if next == Some('/') => break,
                '/' if next == Some('*') => {
                    in_block_comment = true;
                    i += 2;
                    continue;
                }
                '"' | '\'' => {
                    in_string = true;
                    string_char = c;
                }
                '`' => in_template = true,
                '(' => paren += 1,
                ')' => paren -= 1,
                '{' => brace += 1,
                '}' => brace -= 1,
                '[' => bracket += 1,
                ']' => bracket -= 1,
                _ => {}
            }
            i += 1;
        }
        // Strings do not continue across lines; template literals do.
        in_string = false;
    }

    let mut defects = Vec::new();
    for (count, open, close) in [(paren, '(', ')'), (brace, '{', '}'), (bracket, '[', ']')] {
        if count > BRACKET_IMBALANCE_THRESHOLD {
            let mut d = Defect::new(
                relative,
                1,
                BugType::Syntax,
                format!("file has {count} unclosed '{open}' brackets"),
            );
            d.severity = Severity::Blocker;
            defects.push(d);
        } else if count < -BRACKET_IMBALANCE_THRESHOLD {
            let mut d = Defect::new(
                relative,
                1,
                BugType::Syntax,
                format!("file has {} extra '{close}' brackets", -count),
            );
            d.severity = Severity::Blocker;
            defects.push(d);
        }
    }
    defects
}

struct LinePattern {
    re: &'static Regex,
    bug_type: BugType,
    message: &'static str,
}

fn line_patterns() -> &'static [LinePattern] {
    static PATTERNS: OnceLock<Vec<LinePattern>> = OnceLock::new();
    static DEBUGGER: OnceLock<Regex> = OnceLock::new();
    static EMPTY_CATCH: OnceLock<Regex> = OnceLock::new();
    static ASSIGN_COND: OnceLock<Regex> = OnceLock::new();
    static LOOSE_NEQ: OnceLock<Regex> = OnceLock::new();

    PATTERNS.get_or_init(|| {
        vec![
            LinePattern {
                re: DEBUGGER.get_or_init(|| Regex::new(r"\bdebugger\b").unwrap()),
                bug_type: BugType::Runtime,
                message: "debugger statement found (remove before production)",
            },
            LinePattern {
                re: EMPTY_CATCH.get_or_init(|| Regex::new(r"catch\s*\([^)]*\)\s*\{\s*\}").unwrap()),
                bug_type: BugType::Logic,
                message: "empty catch block (may hide errors)",
            },
            LinePattern {
                re: ASSIGN_COND.get_or_init(|| Regex::new(r"\bif\s*\(\s*\w+\s*=\s*[^=]").unwrap()),
                bug_type: BugType::Logic,
                message: "assignment in condition (use === for comparison)",
            },
            LinePattern {
                re: LOOSE_NEQ.get_or_init(|| Regex::new(r"[^!=]!=[^=]").unwrap()),
                bug_type: BugType::Linting,
                message: "use !== instead of !=",
            },
        ]
    })
}

fn is_comment_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*')
}

fn pattern_checks(relative: &str, lines: &[&str]) -> Vec<Defect> {
    let mut defects = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        if is_comment_line(line) {
            continue;
        }
        for pattern in line_patterns() {
            if pattern.re.is_match(line) {
                let mut d = Defect::new(relative, (idx + 1) as u32, pattern.bug_type, pattern.message);
                d.raw_error = line.trim().to_string();
                defects.push(d);
            }
        }
    }
    defects
}

fn jsx_class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<\w+[^>]*\bclass\s*=").unwrap())
}

fn jsx_label_for_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<label[^>]*\bfor\s*=").unwrap())
}

/// JSX attribute and list-rendering checks.
fn jsx_checks(relative: &str, lines: &[&str]) -> Vec<Defect> {
    let mut defects = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        if is_comment_line(line) {
            continue;
        }
        let lineno = (idx + 1) as u32;

        if jsx_class_re().is_match(line) && !line.contains("className") {
            let mut d = Defect::new(relative, lineno, BugType::TypeError, "use 'className' instead of 'class' in JSX");
            d.raw_error = line.trim().to_string();
            defects.push(d);
        }
        if jsx_label_for_re().is_match(line) && !line.contains("htmlFor") {
            let mut d = Defect::new(relative, lineno, BugType::TypeError, "use 'htmlFor' instead of 'for' in JSX label");
            d.raw_error = line.trim().to_string();
            defects.push(d);
        }

        // Missing key in .map render expressions: look ahead three lines.
        if line.contains(".map(") && (line.contains('<') || line.contains("return")) {
            let window_has_key = lines[idx..lines.len().min(idx + 4)]
                .iter()
                .any(|l| l.contains("key=") || l.contains("key:"));
            if !window_has_key {
                let mut d = Defect::new(relative, lineno, BugType::Linting, "missing 'key' prop in list rendering");
                d.severity = Severity::Stylistic;
                d.raw_error = line.trim().to_string();
                defects.push(d);
            }
        }
    }

    defects
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_file_reports_nothing() {
        let content = "function f(a) {\n  return [a, a];\n}\n";
        assert!(check_file("a.js", content).is_empty());
    }

    #[test]
    fn severe_brace_imbalance_is_reported() {
        let content = "function f() {\n  if (a) {\n    if (b) {\n      if (c) {\n";
        let defects = check_file("a.js", content);
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].bug_type, BugType::Syntax);
        assert!(defects[0].message.contains("unclosed"));
    }

    #[test]
    fn brackets_in_strings_and_comments_are_ignored() {
        let content = concat!(
            "const s = \"((((((\";\n",
            "const t = `{{{{{{`;\n",
            "// ((((((\n",
            "/* {{{{{{ */\n",
        );
        assert!(check_file("a.js", content).is_empty());
    }

    #[test]
    fn small_jsx_imbalance_is_tolerated() {
        // Net imbalance of 2 stays under the reporting threshold.
        let content = "const el = (\n  <div>{\n";
        assert!(bracket_scan("a.jsx", &content.lines().collect::<Vec<_>>()).is_empty());
    }

    #[test]
    fn debugger_statement_detected() {
        let defects = check_file("a.js", "debugger;\n");
        assert_eq!(defects.len(), 1);
        assert!(defects[0].message.contains("debugger"));
    }

    #[test]
    fn comment_lines_are_skipped() {
        assert!(check_file("a.js", "// debugger;\n").is_empty());
    }

    #[test]
    fn empty_catch_and_assignment_in_condition() {
        let content = "try { f(); } catch (e) {}\nif (x = 5) { g(); }\n";
        let defects = check_file("a.js", content);
        let messages: Vec<&str> = defects.iter().map(|d| d.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("empty catch")));
        assert!(messages.iter().any(|m| m.contains("assignment in condition")));
    }

    #[test]
    fn loose_inequality_flagged_but_strict_is_not() {
        let defects = check_file("a.js", "if (a != b) {}\n");
        assert!(defects.iter().any(|d| d.message.contains("!==")));
        assert!(check_file("a.js", "if (a !== b) {}\n").is_empty());
    }

    #[test]
    fn jsx_class_attribute_flagged() {
        let defects = check_file("App.jsx", "<div class=\"box\">x</div>\n");
        assert_eq!(defects.len(), 1);
        assert!(defects[0].message.contains("className"));
        // className is already correct:
        assert!(check_file("App.jsx", "<div className=\"box\">x</div>\n").is_empty());
    }

    #[test]
    fn label_for_flagged() {
        let defects = check_file("Form.tsx", "<label for=\"name\">Name</label>\n");
        assert!(defects.iter().any(|d| d.message.contains("htmlFor")));
    }

    #[test]
    fn missing_key_in_map_with_lookahead() {
        let flagged = concat!(
            "return items.map(item => (\n",
            "  <li>{item}</li>\n",
            "))\n",
        );
        let defects = check_file("List.jsx", flagged);
        assert!(defects.iter().any(|d| d.message.contains("key")));

        let with_key = concat!(
            "return items.map(item => (\n",
            "  <li key={item.id}>{item}</li>\n",
            "))\n",
        );
        assert!(check_file("List.jsx", with_key)
            .iter()
            .all(|d| !d.message.contains("key")));
    }

    #[test]
    fn plain_js_skips_jsx_checks() {
        assert!(check_file("a.js", "<div class=\"box\"/>\n").is_empty());
    }
}
