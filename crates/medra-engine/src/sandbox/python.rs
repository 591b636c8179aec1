//! Python static analysis: lint pipeline and multi-error syntax discovery.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use medra_core::{CancelToken, MedraError, Result, Settings};

use crate::defect::{BugType, Defect};
use crate::detector::source_files;
use crate::parser;
use crate::sandbox::process::run_bounded;

/// Rounds of sentinel re-parsing per file. The naive parse stops at the
/// first syntax error; replacing each known error line with a no-op and
/// re-parsing surfaces the rest, up to this bound or fixpoint.
const MAX_SYNTAX_ROUNDS: usize = 10;

/// One parsed syntax error from the interpreter's stderr.
#[derive(Debug)]
struct SyntaxFinding {
    line: u32,
    column: Option<u32>,
    kind: String,
    message: String,
}

fn location_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"File ["'](.+?)["'], line (\d+)"#).unwrap())
}

fn kind_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\w+Error):\s*(.+)").unwrap())
}

fn parse_syntax_stderr(stderr: &str) -> Option<SyntaxFinding> {
    let loc = location_re().captures_iter(stderr).last()?;
    let line = loc[2].parse().ok()?;
    let (kind, message) = match kind_re().captures_iter(stderr).last() {
        Some(caps) => (caps[1].to_string(), caps[2].trim().to_string()),
        None => ("SyntaxError".to_string(), "invalid syntax".to_string()),
    };
    Some(SyntaxFinding { line, column: None, kind, message })
}

/// Ask the interpreter to AST-parse one file.
async fn try_parse(
    root: &Path,
    file: &Path,
    timeout: Duration,
    cap: usize,
    cancel: &CancelToken,
) -> Result<Option<SyntaxFinding>> {
    let script = "import ast,sys\nsrc=open(sys.argv[1],encoding='utf-8',errors='ignore').read()\nast.parse(src, filename=sys.argv[1])";
    let file_str = file.to_string_lossy();
    let out = run_bounded(
        "python3",
        &["-c", script, file_str.as_ref()],
        root,
        timeout,
        cap,
        cancel,
    )
    .await?;

    if out.success() {
        return Ok(None);
    }
    Ok(parse_syntax_stderr(&out.stderr))
}

/// Find every distinct syntax error in `relative` by iteratively replacing
/// known error lines with an indentation-preserving `pass` placeholder and
/// re-parsing, up to `MAX_SYNTAX_ROUNDS` or fixpoint.
pub async fn find_all_syntax_errors(
    root: &Path,
    relative: &str,
    settings: &Settings,
    cancel: &CancelToken,
) -> Result<Vec<Defect>> {
    let timeout = Duration::from_secs(settings.timeouts.analyzer_secs);
    let cap = settings.limits.captured_output_bytes;
    let path = root.join(relative);

    let Ok(content) = std::fs::read_to_string(&path) else {
        return Ok(Vec::new());
    };
    let lines: Vec<&str> = content.lines().collect();

    let mut defects = Vec::new();
    let mut error_lines: Vec<u32> = Vec::new();

    let first = try_parse(root, &path, timeout, cap, cancel).await?;
    let Some(finding) = first else {
        return Ok(Vec::new());
    };
    error_lines.push(finding.line);
    defects.push(finding_to_defect(finding, relative, &lines));

    let scratch = tempfile::Builder::new()
        .prefix("syntax_scan_")
        .suffix(".py")
        .tempfile()
        .map_err(MedraError::Io)?;

    for _round in 0..MAX_SYNTAX_ROUNDS {
        let masked: String = lines
            .iter()
            .enumerate()
            .map(|(idx, line)| {
                let lineno = (idx + 1) as u32;
                if error_lines.contains(&lineno) {
                    format!("{}\n", mask_line(&lines, idx))
                } else {
                    format!("{line}\n")
                }
            })
            .collect();

        if std::fs::write(scratch.path(), &masked).is_err() {
            break;
        }

        match try_parse(root, scratch.path(), timeout, cap, cancel).await? {
            Some(finding) if !error_lines.contains(&finding.line) => {
                // Report against the original source line.
                error_lines.push(finding.line);
                defects.push(finding_to_defect(finding, relative, &lines));
            }
            _ => break,
        }
    }

    Ok(defects)
}

fn indent_of(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ' || *c == '\t').count()
}

/// Replacement for a known-bad line, preserving both its indentation and
/// the block structure around it. A line followed by a deeper-indented
/// block is masked as a function header so the block still parses; any
/// other line becomes a plain `pass`.
fn mask_line(lines: &[&str], idx: usize) -> String {
    let line = lines[idx];
    let indent: String = line.chars().take_while(|c| *c == ' ' || *c == '\t').collect();

    let next_nonblank = lines[idx + 1..]
        .iter()
        .find(|l| !l.trim().is_empty());
    let opens_block = next_nonblank
        .map(|next| indent_of(next) > indent_of(line))
        .unwrap_or(false);

    if opens_block {
        format!("{indent}def _masked_{}():", idx + 1)
    } else {
        format!("{indent}pass")
    }
}

fn finding_to_defect(finding: SyntaxFinding, relative: &str, lines: &[&str]) -> Defect {
    let bug_type = parser::classify(&finding.kind, &finding.message);
    // AST findings are structural even when the kind is unmapped.
    let bug_type = if bug_type == BugType::Linting { BugType::Syntax } else { bug_type };

    let mut raw = format!("{}: {}\nFile: {relative}, Line: {}\n", finding.kind, finding.message, finding.line);
    if let Some(text) = lines.get(finding.line.saturating_sub(1) as usize) {
        raw.push_str(&format!("    {}\n", text.trim_end()));
    }

    let mut defect = Defect::new(relative, finding.line, bug_type, format!("{}: {}", finding.kind, finding.message));
    defect.column = finding.column;
    defect.raw_error = raw;
    defect
}

/// Scan every Python file for syntax errors.
pub async fn syntax_scan(
    root: &Path,
    settings: &Settings,
    cancel: &CancelToken,
) -> Result<Vec<Defect>> {
    let mut defects = Vec::new();
    for file in source_files(root, &[".py"]) {
        match find_all_syntax_errors(root, &file, settings, cancel).await {
            Ok(found) => defects.extend(found),
            Err(MedraError::Environmental { tool, reason }) => {
                warn!("python syntax scan degraded ({tool}: {reason})");
                return Ok(defects);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(defects)
}

/// Run the lint pipeline: ruff, falling back to flake8, then pylint
/// (errors and warnings only). Returns defects plus the raw tool output
/// for the classifier's supplemental pass.
pub async fn lint_scan(
    root: &Path,
    settings: &Settings,
    cancel: &CancelToken,
) -> Result<(Vec<Defect>, Vec<(String, String)>)> {
    let timeout = Duration::from_secs(settings.timeouts.analyzer_secs);
    let cap = settings.limits.captured_output_bytes;

    let attempts: &[(&str, &[&str])] = &[
        ("ruff", &["check", "--output-format", "concise", "."]),
        ("flake8", &["."]),
        ("pylint", &["--recursive=y", "--disable=C,R", "--output-format=text", "."]),
    ];

    for (tool, args) in attempts {
        match run_bounded(tool, args, root, timeout, cap, cancel).await {
            Ok(out) => {
                let raw = out.combined();
                let defects = parse_lint_output(&raw);
                debug!("{tool} reported {} findings", defects.len());
                return Ok((defects, vec![((*tool).to_string(), raw)]));
            }
            Err(MedraError::Environmental { .. }) => continue,
            Err(e) => return Err(e),
        }
    }

    debug!("no python linter installed; skipping lint phase");
    Ok((Vec::new(), Vec::new()))
}

fn lint_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // path:line:col: CODE message   (ruff/flake8/pylint text format)
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(.+?\.py):(\d+):(\d+):?\s+([A-Z]\d+|[A-Z]{1,2}\d{3,4}):?\s+(.+)$").unwrap()
    })
}

/// Parse `file:line:col: CODE message` lint lines.
pub fn parse_lint_output(raw: &str) -> Vec<Defect> {
    let mut defects = Vec::new();
    for caps in lint_line_re().captures_iter(raw) {
        let file = caps[1].trim_start_matches("./").replace('\\', "/");
        let Ok(line) = caps[2].parse::<u32>() else { continue };
        let code = caps[4].to_string();
        let message = caps[5].trim().to_string();

        let bug_type = parser::classify(&code, &message);
        let mut defect = Defect::new(file, line, bug_type, format!("{code} {message}"));
        defect.column = caps[3].parse().ok();
        defect.raw_error = caps[0].to_string();
        defects.push(defect);
    }
    defects
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lint_output_parses_ruff_and_flake8_shapes() {
        let raw = concat!(
            "app.py:3:1: F401 'os' imported but unused\n",
            "./lib/util.py:10:80: E501 line too long (88 > 79 characters)\n",
            "app.py:7:5: E999 SyntaxError: invalid syntax\n",
        );
        let defects = parse_lint_output(raw);
        assert_eq!(defects.len(), 3);
        assert_eq!(defects[0].file, "app.py");
        assert_eq!(defects[0].line, 3);
        assert_eq!(defects[0].bug_type, BugType::Linting);
        assert_eq!(defects[1].file, "lib/util.py");
        // E999 carries SyntaxError text and classifies structurally.
        assert_eq!(defects[2].bug_type, BugType::Syntax);
    }

    #[test]
    fn syntax_stderr_parsing() {
        let stderr = concat!(
            "Traceback (most recent call last):\n",
            "  File \"<string>\", line 3, in <module>\n",
            "  File \"a.py\", line 1\n",
            "    def f(x)\n",
            "            ^\n",
            "SyntaxError: expected ':'\n",
        );
        let finding = parse_syntax_stderr(stderr).unwrap();
        assert_eq!(finding.line, 1);
        assert_eq!(finding.kind, "SyntaxError");
        assert!(finding.message.contains("expected"));
    }

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn single_syntax_error_detected() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def f(x)\n    return x\n").unwrap();

        let settings = Settings::default();
        let defects = syntax_scan(dir.path(), &settings, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].file, "a.py");
        assert_eq!(defects[0].line, 1);
        assert_eq!(defects[0].bug_type, BugType::Syntax);
    }

    #[tokio::test]
    async fn multi_error_file_surfaces_every_location() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let source = concat!(
            "x = 1\n",
            "y = 2\n",
            "def f(a)\n",          // line 3: missing colon
            "    return a\n",
            "z = 3\n",
            "w = 4\n",
            "def g(b)\n",          // line 7: missing colon
            "    return b\n",
            "v = 5\n",
            "u = 6\n",
            "t = 7\n",
            "def h(c)\n",          // line 12: missing colon
            "    return c\n",
        );
        std::fs::write(dir.path().join("b.py"), source).unwrap();

        let settings = Settings::default();
        let defects = find_all_syntax_errors(dir.path(), "b.py", &settings, &CancelToken::new())
            .await
            .unwrap();

        let mut lines: Vec<u32> = defects.iter().map(|d| d.line).collect();
        lines.sort_unstable();
        assert_eq!(lines, vec![3, 7, 12]);
    }

    #[tokio::test]
    async fn clean_file_has_no_defects() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.py"), "def f(x):\n    return x\n").unwrap();
        let settings = Settings::default();
        let defects = syntax_scan(dir.path(), &settings, &CancelToken::new())
            .await
            .unwrap();
        assert!(defects.is_empty());
    }
}
