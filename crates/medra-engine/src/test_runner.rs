//! Test framework execution and result parsing.
//!
//! Runs the detected framework, parses pass/fail counts and per-failure
//! locations, and works out which *source* file a failure points at so the
//! fixer can target the code under test rather than the test itself.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};

use medra_core::{CancelToken, MedraError, Result, Settings};

use crate::detector::TestFramework;
use crate::report::TestOutcome;
use crate::sandbox::process::run_bounded;

/// Aggregate outcome of one test run.
#[derive(Debug, Clone, Default)]
pub struct TestReport {
    pub outcomes: Vec<TestOutcome>,
    pub passed: usize,
    pub failed: usize,
    /// Collection or framework errors, distinct from assertion failures
    pub errors: usize,
    pub raw_output: String,
    /// True when no test framework or no test files were discovered
    pub no_tests: bool,
}

impl TestReport {
    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }
}

/// Executes the project's test suite.
pub struct TestRunner {
    settings: Settings,
    cancel: CancelToken,
}

impl TestRunner {
    pub fn new(settings: Settings, cancel: CancelToken) -> Self {
        Self { settings, cancel }
    }

    /// Run the given framework. A missing tool degrades to a no-tests
    /// report rather than failing the run.
    pub async fn run(&self, root: &Path, framework: TestFramework) -> Result<TestReport> {
        let (program, args): (&str, Vec<&str>) = match framework {
            TestFramework::Pytest => ("python3", vec!["-m", "pytest", "-v", "--tb=short"]),
            TestFramework::Unittest => ("python3", vec!["-m", "unittest", "discover", "-v"]),
            TestFramework::Jest => ("npx", vec!["--no-install", "jest", "--ci", "--verbose"]),
            TestFramework::Vitest => ("npx", vec!["--no-install", "vitest", "run"]),
            TestFramework::Mocha => ("npx", vec!["--no-install", "mocha", "--reporter", "spec"]),
            TestFramework::None => {
                return Ok(TestReport { no_tests: true, ..TestReport::default() })
            }
        };

        let timeout = Duration::from_secs(self.settings.timeouts.test_run_secs);
        let cap = self.settings.limits.captured_output_bytes;

        let output = match run_bounded(program, &args, root, timeout, cap, &self.cancel).await {
            Ok(out) => out,
            Err(MedraError::Environmental { tool, reason }) => {
                debug!("test framework unavailable ({tool}: {reason})");
                return Ok(TestReport { no_tests: true, ..TestReport::default() });
            }
            Err(e) => return Err(e),
        };

        if output.timed_out {
            return Err(MedraError::Timeout {
                what: "test run".to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }

        let raw = output.combined();
        let mut report = match framework {
            TestFramework::Pytest => parse_pytest_output(&raw),
            TestFramework::Unittest => parse_unittest_output(&raw),
            _ => parse_js_output(&raw),
        };
        report.raw_output = raw;

        // "no tests ran" exits nonzero on pytest; treat as no tests.
        if report.outcomes.is_empty() && report.failed == 0 && report.errors == 0 {
            report.no_tests = report.passed == 0;
        }

        info!(
            "🧪 Tests: {} passed, {} failed, {} errors",
            report.passed, report.failed, report.errors
        );
        Ok(report)
    }
}

/// Given a failing test file, derive the source file under test by naming
/// convention: strip the `test_` prefix or the `_test` suffix.
pub fn derive_source_file(test_file: &str) -> Option<String> {
    let (dir, base) = match test_file.rsplit_once('/') {
        Some((d, b)) => (Some(d), b),
        None => (None, test_file),
    };

    let derived = if let Some(stripped) = base.strip_prefix("test_") {
        stripped.to_string()
    } else if let Some(stem) = base.strip_suffix("_test.py") {
        format!("{stem}.py")
    } else if let Some(stem) = base.strip_suffix(".test.js") {
        format!("{stem}.js")
    } else if let Some(stem) = base.strip_suffix(".test.ts") {
        format!("{stem}.ts")
    } else {
        return None;
    };

    Some(match dir {
        Some(d) => format!("{d}/{derived}"),
        None => derived,
    })
}

fn pytest_result_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // tests/test_calc.py::test_multiply PASSED [ 50%]
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(\S+?\.py)::(\S+)\s+(PASSED|FAILED|ERROR)").unwrap()
    })
}

fn pytest_source_loc_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // calculator.py:2: in multiply      (short traceback form)
    RE.get_or_init(|| Regex::new(r"(?m)^(\S+?\.py):(\d+):\s+in\s+(\S+)").unwrap())
}

fn pytest_failure_loc_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // tests/test_calc.py:7: AssertionError
    RE.get_or_init(|| Regex::new(r"(?m)^(\S+?\.py):(\d+):\s+(\w+Error)").unwrap())
}

/// Parse `pytest -v --tb=short` output.
pub fn parse_pytest_output(raw: &str) -> TestReport {
    let mut report = TestReport::default();

    // Prefer a location in the code under test over the test file itself.
    let source_loc = pytest_source_loc_re()
        .captures_iter(raw)
        .find(|caps| {
            let file = &caps[1];
            !file.contains("test_") && !file.ends_with("_test.py")
        })
        .map(|caps| (caps[1].to_string(), caps[2].parse::<u32>().unwrap_or(1)));

    let failure_loc = pytest_failure_loc_re()
        .captures_iter(raw)
        .next()
        .map(|caps| (caps[1].to_string(), caps[2].parse::<u32>().unwrap_or(1), caps[3].to_string()));

    for caps in pytest_result_re().captures_iter(raw) {
        let test_file = caps[1].to_string();
        let name = format!("{}::{}", &caps[1], &caps[2]);
        let verdict = &caps[3];

        match verdict {
            "PASSED" => {
                report.passed += 1;
                report.outcomes.push(TestOutcome {
                    name,
                    passed: true,
                    file: None,
                    line: None,
                    message: None,
                    failure_type: None,
                });
            }
            _ => {
                if verdict == "FAILED" {
                    report.failed += 1;
                } else {
                    report.errors += 1;
                }

                // Best available location: a traceback frame in the code
                // under test; else the source file derived from the test
                // file's name; else the assertion site in the test itself.
                let (file, line) = match (&source_loc, &failure_loc) {
                    (Some((f, l)), _) => (Some(f.clone()), Some(*l)),
                    (None, Some((f, l, _))) => match derive_source_file(f) {
                        Some(derived) => (Some(derived), None),
                        None => (Some(f.clone()), Some(*l)),
                    },
                    (None, None) => (derive_source_file(&test_file).or(Some(test_file.clone())), None),
                };

                report.outcomes.push(TestOutcome {
                    name,
                    passed: false,
                    file,
                    line,
                    message: Some(failure_message(raw)),
                    failure_type: failure_loc.as_ref().map(|(_, _, kind)| kind.clone()),
                });
            }
        }
    }

    report
}

/// Parse `unittest discover -v` output.
pub fn parse_unittest_output(raw: &str) -> TestReport {
    static RESULT_RE: OnceLock<Regex> = OnceLock::new();
    let result_re = RESULT_RE.get_or_init(|| {
        Regex::new(r"(?m)^(\w+)\s+\((\S+)\)\s*(?:\.\.\.\s*)?(ok|FAIL|ERROR)").unwrap()
    });

    let mut report = TestReport::default();
    for caps in result_re.captures_iter(raw) {
        let name = format!("{}::{}", &caps[2], &caps[1]);
        match &caps[3] {
            "ok" => {
                report.passed += 1;
                report.outcomes.push(TestOutcome {
                    name,
                    passed: true,
                    file: None,
                    line: None,
                    message: None,
                    failure_type: None,
                });
            }
            verdict => {
                if verdict == "FAIL" {
                    report.failed += 1;
                } else {
                    report.errors += 1;
                }
                let loc = pytest_failure_loc_re()
                    .captures_iter(raw)
                    .next()
                    .map(|c| (c[1].to_string(), c[2].parse::<u32>().unwrap_or(1)));
                report.outcomes.push(TestOutcome {
                    name,
                    passed: false,
                    file: loc.as_ref().map(|(f, _)| f.clone()),
                    line: loc.as_ref().map(|(_, l)| *l),
                    message: Some(failure_message(raw)),
                    failure_type: None,
                });
            }
        }
    }
    report
}

/// Parse jest/vitest/mocha output: per-test markers plus the summary line.
pub fn parse_js_output(raw: &str) -> TestReport {
    static PASS_RE: OnceLock<Regex> = OnceLock::new();
    static FAIL_RE: OnceLock<Regex> = OnceLock::new();
    static SUMMARY_RE: OnceLock<Regex> = OnceLock::new();
    static LOC_RE: OnceLock<Regex> = OnceLock::new();

    let pass_re = PASS_RE.get_or_init(|| Regex::new(r"(?m)^\s*(?:✓|√|PASS)\s+(.+)$").unwrap());
    let fail_re = FAIL_RE.get_or_init(|| Regex::new(r"(?m)^\s*(?:✕|✗|×|FAIL)\s+(.+)$").unwrap());
    let summary_re = SUMMARY_RE.get_or_init(|| {
        Regex::new(r"Tests:\s+(?:(\d+)\s+failed,\s+)?(\d+)\s+passed,\s+(\d+)\s+total").unwrap()
    });
    let loc_re = LOC_RE.get_or_init(|| {
        Regex::new(r"\(?([^\s()]+\.(?:js|ts|jsx|tsx)):(\d+):\d+\)?").unwrap()
    });

    let mut report = TestReport::default();

    let loc = loc_re
        .captures_iter(raw)
        .find(|caps| !caps[1].contains("node_modules"))
        .map(|caps| (caps[1].to_string(), caps[2].parse::<u32>().unwrap_or(1)));

    for caps in pass_re.captures_iter(raw) {
        report.passed += 1;
        report.outcomes.push(TestOutcome {
            name: caps[1].trim().to_string(),
            passed: true,
            file: None,
            line: None,
            message: None,
            failure_type: None,
        });
    }
    for caps in fail_re.captures_iter(raw) {
        report.failed += 1;
        let (file, line) = match &loc {
            Some((f, l)) => {
                let source = derive_source_file(f).unwrap_or_else(|| f.clone());
                (Some(source), Some(*l))
            }
            None => (None, None),
        };
        report.outcomes.push(TestOutcome {
            name: caps[1].trim().to_string(),
            passed: false,
            file,
            line,
            message: Some(failure_message(raw)),
            failure_type: None,
        });
    }

    // Trust the summary when individual markers were swallowed.
    if let Some(caps) = summary_re.captures(raw) {
        let failed: usize = caps.get(1).map(|m| m.as_str().parse().unwrap_or(0)).unwrap_or(0);
        let passed: usize = caps[2].parse().unwrap_or(0);
        if report.passed == 0 && report.failed == 0 {
            report.passed = passed;
            report.failed = failed;
        }
    }

    report
}

fn failure_message(raw: &str) -> String {
    static ASSERT_RE: OnceLock<Regex> = OnceLock::new();
    let re = ASSERT_RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:E\s+)?((?:assert|AssertionError|Expected|expected).{0,200})$").unwrap()
    });
    re.captures(raw)
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_else(|| {
            raw.lines()
                .find(|l| l.contains("Error") || l.contains("assert"))
                .unwrap_or("test failed")
                .trim()
                .chars()
                .take(200)
                .collect()
        })
}
