//! Project language and test-framework detection from on-disk markers.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// Directories the analyzers never descend into.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    "venv",
    ".venv",
    "dist",
    "build",
];

pub fn is_skipped_dir(name: &str) -> bool {
    name.starts_with('.') || SKIP_DIRS.contains(&name)
}

/// Detected project language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Java,
    TypeScript,
    Node,
    Python,
    Unknown,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Java => "java",
            ProjectType::TypeScript => "typescript",
            ProjectType::Node => "node",
            ProjectType::Python => "python",
            ProjectType::Unknown => "unknown",
        }
    }
}

/// Detected test framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestFramework {
    Pytest,
    Unittest,
    Jest,
    Vitest,
    Mocha,
    None,
}

/// Walk the tree, respecting the skip list, yielding repo-relative paths
/// with one of the given extensions.
pub fn source_files(root: &Path, extensions: &[&str]) -> Vec<String> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || e.file_name()
                    .to_str()
                    .map(|n| !e.file_type().is_dir() || !is_skipped_dir(n))
                    .unwrap_or(false)
        })
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if extensions.iter().any(|ext| name.ends_with(ext)) {
            if let Ok(rel) = entry.path().strip_prefix(root) {
                files.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    files.sort();
    files
}

/// First-match-wins decision tree over dependency manifests, falling back
/// to the majority extension at the tree root.
pub fn detect_project(root: &Path) -> ProjectType {
    if root.join("pom.xml").exists()
        || root.join("build.gradle").exists()
        || root.join("build.gradle.kts").exists()
    {
        return ProjectType::Java;
    }
    if root.join("tsconfig.json").exists() {
        return ProjectType::TypeScript;
    }
    if root.join("package.json").exists() {
        return ProjectType::Node;
    }
    if root.join("requirements.txt").exists()
        || root.join("setup.py").exists()
        || root.join("pyproject.toml").exists()
    {
        return ProjectType::Python;
    }

    majority_extension(root).unwrap_or(ProjectType::Unknown)
}

fn majority_extension(root: &Path) -> Option<ProjectType> {
    let mut counts: HashMap<ProjectType, usize> = HashMap::new();

    let entries = std::fs::read_dir(root).ok()?;
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let kind = if name.ends_with(".py") {
            ProjectType::Python
        } else if name.ends_with(".ts") || name.ends_with(".tsx") {
            ProjectType::TypeScript
        } else if name.ends_with(".js") || name.ends_with(".jsx") {
            ProjectType::Node
        } else if name.ends_with(".java") {
            ProjectType::Java
        } else {
            continue;
        };
        *counts.entry(kind).or_default() += 1;
    }

    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(kind, _)| kind)
}

/// Detect the test framework from manifests, config files and test-file
/// naming patterns.
pub fn detect_test_framework(root: &Path, project: ProjectType) -> TestFramework {
    match project {
        ProjectType::Python | ProjectType::Unknown => detect_python_framework(root),
        ProjectType::Node | ProjectType::TypeScript => detect_js_framework(root),
        ProjectType::Java => TestFramework::None,
    }
}

fn detect_python_framework(root: &Path) -> TestFramework {
    if root.join("pytest.ini").exists() || root.join("conftest.py").exists() {
        return TestFramework::Pytest;
    }
    if let Ok(cfg) = std::fs::read_to_string(root.join("setup.cfg")) {
        if cfg.contains("[tool:pytest]") {
            return TestFramework::Pytest;
        }
    }
    if let Ok(pyproject) = std::fs::read_to_string(root.join("pyproject.toml")) {
        if pyproject.contains("[tool.pytest") {
            return TestFramework::Pytest;
        }
    }

    let test_files = source_files(root, &[".py"]);
    let has_pytest_style = test_files.iter().any(|f| {
        let base = f.rsplit('/').next().unwrap_or(f);
        base.starts_with("test_") || base.ends_with("_test.py")
    });
    if has_pytest_style {
        return TestFramework::Pytest;
    }

    let has_unittest = test_files.iter().any(|f| {
        std::fs::read_to_string(root.join(f))
            .map(|c| c.contains("unittest.TestCase"))
            .unwrap_or(false)
    });
    if has_unittest {
        TestFramework::Unittest
    } else {
        TestFramework::None
    }
}

fn detect_js_framework(root: &Path) -> TestFramework {
    if let Ok(pkg) = std::fs::read_to_string(root.join("package.json")) {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(&pkg) {
            let mut deps = String::new();
            for key in ["dependencies", "devDependencies"] {
                if let Some(map) = json.get(key).and_then(|v| v.as_object()) {
                    for name in map.keys() {
                        deps.push_str(name);
                        deps.push(' ');
                    }
                }
            }
            if deps.contains("vitest") {
                return TestFramework::Vitest;
            }
            if deps.contains("jest") {
                return TestFramework::Jest;
            }
            if deps.contains("mocha") {
                return TestFramework::Mocha;
            }
        }
    }

    let js_files = source_files(root, &[".js", ".ts", ".jsx", ".tsx"]);
    let has_test_suffix = js_files.iter().any(|f| {
        f.contains(".test.") || f.contains(".spec.")
    });
    if has_test_suffix {
        return TestFramework::Jest;
    }
    let has_mocha_layout = js_files
        .iter()
        .any(|f| f.starts_with("test/") && (f.ends_with(".js") || f.ends_with(".ts")));
    if has_mocha_layout {
        TestFramework::Mocha
    } else {
        TestFramework::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn manifest_decision_tree_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "package.json", "{}");
        touch(dir.path(), "requirements.txt", "");
        // package.json outranks requirements.txt
        assert_eq!(detect_project(dir.path()), ProjectType::Node);

        touch(dir.path(), "tsconfig.json", "{}");
        assert_eq!(detect_project(dir.path()), ProjectType::TypeScript);

        touch(dir.path(), "pom.xml", "<project/>");
        assert_eq!(detect_project(dir.path()), ProjectType::Java);
    }

    #[test]
    fn majority_extension_fallback() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.py", "");
        touch(dir.path(), "b.py", "");
        touch(dir.path(), "c.js", "");
        assert_eq!(detect_project(dir.path()), ProjectType::Python);
    }

    #[test]
    fn empty_tree_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_project(dir.path()), ProjectType::Unknown);
    }

    #[test]
    fn pytest_detected_from_file_patterns() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "requirements.txt", "");
        touch(dir.path(), "calculator.py", "def f():\n    pass\n");
        touch(dir.path(), "test_calculator.py", "def test_f():\n    pass\n");
        assert_eq!(detect_project(dir.path()), ProjectType::Python);
        assert_eq!(
            detect_test_framework(dir.path(), ProjectType::Python),
            TestFramework::Pytest
        );
    }

    #[test]
    fn jest_detected_from_package_json() {
        let dir = tempfile::tempdir().unwrap();
        touch(
            dir.path(),
            "package.json",
            r#"{"devDependencies": {"jest": "^29.0.0"}}"#,
        );
        assert_eq!(
            detect_test_framework(dir.path(), ProjectType::Node),
            TestFramework::Jest
        );
    }

    #[test]
    fn skip_dirs_are_not_walked() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "src/main.py", "");
        touch(dir.path(), "node_modules/pkg/index.js", "");
        touch(dir.path(), ".venv/lib/thing.py", "");
        let files = source_files(dir.path(), &[".py", ".js"]);
        assert_eq!(files, vec!["src/main.py"]);
    }
}
