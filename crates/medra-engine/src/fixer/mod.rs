//! Code fixer: LLM-driven patch generation and application.

pub mod apply;
pub mod prompts;
pub mod recovery;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use medra_core::{Result, Settings};

use crate::defect::{sort_for_fixing, Defect};
use crate::fix::{resolve_in_workspace, Fix};
use crate::llm::{ChatModel, ChatRequest};
use crate::report::GeneratedTest;

/// Generates and applies fixes for defects, one LLM round trip per defect.
pub struct CodeFixer {
    llm: Arc<dyn ChatModel>,
    settings: Settings,
}

impl CodeFixer {
    pub fn new(llm: Arc<dyn ChatModel>, settings: Settings) -> Self {
        Self { llm, settings }
    }

    /// Propose a fix for one defect. Returns `None` when the model's
    /// response could not be recovered into a usable payload; that is a
    /// patch-class failure local to this defect.
    pub async fn propose(&self, root: &Path, defect: &Defect) -> Result<Option<Fix>> {
        let path = resolve_in_workspace(root, &defect.file)?;
        let Ok(content) = std::fs::read_to_string(&path) else {
            debug!("defect file {} unreadable, skipping", defect.file);
            return Ok(None);
        };

        let request = ChatRequest {
            system: prompts::system_prompt_for(defect).to_string(),
            user: prompts::user_prompt(defect, &content, self.settings.limits.prompt_file_bytes),
            max_tokens: None,
            temperature: None,
        };

        let response = match self.llm.complete(&request).await {
            Ok(text) => text,
            Err(e) => {
                warn!("LLM call failed for {}: {e}", defect.signature());
                return Ok(None);
            }
        };

        let Some(raw) = recovery::parse_fix_response(&response) else {
            warn!("unrecoverable LLM response for {}", defect.signature());
            return Ok(None);
        };

        Ok(Some(Fix::proposed(
            defect.file.clone(),
            defect.line,
            defect.bug_type,
            raw.original_code,
            raw.fixed_code,
            raw.description,
            nonempty_or(raw.commit_message, || format!("fix: resolve {} in {}", defect.bug_type, defect.file)),
        )))
    }

    /// Generate and apply fixes for a defect set. Defects are handled in
    /// priority order; the returned fixes are each FIXED or FAILED.
    pub async fn fix_defects(&self, root: &Path, defects: &[Defect]) -> Result<Vec<Fix>> {
        let mut ordered: Vec<Defect> = defects.to_vec();
        sort_for_fixing(&mut ordered);

        let mut fixes = Vec::new();
        for defect in &ordered {
            match self.propose(root, defect).await? {
                Some(fix) => fixes.push(fix),
                None => {
                    let mut failed = Fix::proposed(
                        defect.file.clone(),
                        defect.line,
                        defect.bug_type,
                        String::new(),
                        String::new(),
                        String::new(),
                        format!("fix: resolve {} in {}", defect.bug_type, defect.file),
                    );
                    failed.mark_failed("no usable fix from model");
                    fixes.push(failed);
                }
            }
        }

        let applied = apply::apply_fixes(root, &mut fixes)?;
        info!("🔧 Applied {applied}/{} fixes", fixes.len());
        Ok(fixes)
    }

    /// Ask the model for a minimal test file covering `source_file`. Used
    /// when test generation was requested and the repository has no tests.
    pub async fn generate_test(&self, root: &Path, source_file: &str) -> Result<Option<GeneratedTest>> {
        let path = resolve_in_workspace(root, source_file)?;
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Ok(None);
        };
        if !source_file.ends_with(".py") {
            return Ok(None);
        }

        let base = source_file.rsplit('/').next().unwrap_or(source_file);
        let module = base.trim_end_matches(".py");
        let test_file = source_file.replace(base, &format!("test_{base}"));

        let request = ChatRequest {
            system: "You are a test engineer. Write a minimal pytest test file for the given module. \
                     Import the module by its plain name (no relative imports). Respond with ONLY the \
                     Python source of the test file, no fences, no prose."
                .to_string(),
            user: format!(
                "Module name: {module}\nModule source:\n```\n{}\n```\n\nWrite test_{base} with 2-4 focused tests.",
                content.chars().take(self.settings.limits.prompt_file_bytes).collect::<String>()
            ),
            max_tokens: None,
            temperature: None,
        };

        let response = match self.llm.complete(&request).await {
            Ok(text) => text,
            Err(e) => {
                warn!("test generation failed for {source_file}: {e}");
                return Ok(None);
            }
        };

        let body = strip_code_fences(&response);
        if body.trim().is_empty() {
            return Ok(None);
        }

        let dest = resolve_in_workspace(root, &test_file)?;
        std::fs::write(&dest, body)?;
        info!("🧬 Generated {test_file}");

        Ok(Some(GeneratedTest {
            file_path: test_file,
            source_file: source_file.to_string(),
        }))
    }
}

fn nonempty_or(value: String, fallback: impl FnOnce() -> String) -> String {
    if value.trim().is_empty() {
        fallback()
    } else {
        value
    }
}

fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(inner) = trimmed.strip_prefix("```") {
        let inner = inner
            .trim_start_matches(|c: char| c.is_ascii_alphanumeric())
            .trim_start_matches('\n');
        if let Some(body) = inner.strip_suffix("```") {
            return body.trim_end().to_string() + "\n";
        }
    }
    trimmed.to_string() + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::defect::BugType;
    use crate::fix::FixStatus;

    /// Scripted model: pops responses front-to-back, repeating the last.
    struct ScriptedModel {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, _request: &ChatRequest) -> Result<String> {
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                Ok(responses.remove(0))
            } else {
                Ok(responses.first().cloned().unwrap_or_default())
            }
        }
    }

    fn fixer_with(responses: Vec<&str>) -> CodeFixer {
        CodeFixer::new(Arc::new(ScriptedModel::new(responses)), Settings::default())
    }

    #[tokio::test]
    async fn fixes_single_syntax_defect() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def f(x)\n    return x\n").unwrap();

        let fixer = fixer_with(vec![
            r#"{"original_code":"def f(x)","fixed_code":"def f(x):","commit_message":"fix: add colon","description":"Missing colon"}"#,
        ]);
        let defect = Defect::new("a.py", 1, BugType::Syntax, "invalid syntax");
        let fixes = fixer.fix_defects(dir.path(), &[defect]).await.unwrap();

        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].status, FixStatus::Fixed);
        let content = std::fs::read_to_string(dir.path().join("a.py")).unwrap();
        assert_eq!(content, "def f(x):\n    return x\n");
    }

    #[tokio::test]
    async fn malformed_response_recovered_from_fenced_block() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def f(x)\n    return x\n").unwrap();

        // Fenced, with a bare newline inside fixed_code.
        let fixer = fixer_with(vec![
            "```json\n{\"original_code\": \"def f(x)\", \"fixed_code\": \"def f(x):\n    return x\", \"description\": \"d\", \"commit_message\": \"fix: colon\"}\n```",
        ]);
        let defect = Defect::new("a.py", 1, BugType::Syntax, "invalid syntax");
        let fixes = fixer.fix_defects(dir.path(), &[defect]).await.unwrap();
        assert_eq!(fixes[0].status, FixStatus::Fixed);
    }

    #[tokio::test]
    async fn unusable_response_yields_failed_fix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();

        let fixer = fixer_with(vec!["I refuse to answer in JSON."]);
        let defect = Defect::new("a.py", 1, BugType::Logic, "bad");
        let fixes = fixer.fix_defects(dir.path(), &[defect]).await.unwrap();
        assert_eq!(fixes[0].status, FixStatus::Failed);
    }

    #[tokio::test]
    async fn fixes_ordered_by_priority_across_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "import missing\nx==\n").unwrap();

        let fixer = fixer_with(vec![
            r#"{"original_code":"x==","fixed_code":"x = 0","commit_message":"m","description":"d"}"#,
        ]);
        let defects = vec![
            Defect::new("a.py", 1, BugType::Linting, "unused import"),
            Defect::new("a.py", 2, BugType::Syntax, "invalid syntax"),
        ];
        let fixes = fixer.fix_defects(dir.path(), &defects).await.unwrap();
        // Syntax defect comes first in the output ordering.
        assert_eq!(fixes[0].bug_type, BugType::Syntax);
    }

    #[tokio::test]
    async fn generated_test_written_to_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("calc.py"), "def add(a, b):\n    return a + b\n").unwrap();

        let fixer = fixer_with(vec![
            "```python\nfrom calc import add\n\ndef test_add():\n    assert add(1, 2) == 3\n```",
        ]);
        let generated = fixer
            .generate_test(dir.path(), "calc.py")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(generated.file_path, "test_calc.py");
        let body = std::fs::read_to_string(dir.path().join("test_calc.py")).unwrap();
        assert!(body.contains("def test_add"));
        assert!(!body.contains("```"));
    }
}
