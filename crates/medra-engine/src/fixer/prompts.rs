//! System and user prompts for fix generation.

use crate::defect::{BugType, Defect};

/// General minimal-fix system prompt.
pub const MINIMAL_FIX_SYSTEM: &str = r#"You are a SENIOR code reviewer fixing production code. Your fixes must be professional and context-aware.

CRITICAL RULES:
1. UNDERSTAND THE CONTEXT - Read the surrounding code to understand the developer's intent
2. FIX PROPERLY - Don't use lazy placeholders like `pass`, `range(0)`, or empty blocks
3. IF CODE IS UNNECESSARY - REMOVE IT entirely instead of making it a no-op
4. IF CODE IS INCOMPLETE - Complete it based on context (variable names, function purpose, etc.)
5. PRESERVE FUNCTIONALITY - Your fix should make the code work as the developer intended
6. NEVER REWRITE IMPORT STYLE - Do NOT introduce relative imports like `from .module import`. Keep imports exactly in the style the file already uses.

BAD FIXES (NEVER DO THIS):
- `for _ in range(0):` - This is pointless, remove the loop entirely
- Adding `pass` to empty blocks without purpose
- `if True:` or `if False:` placeholders
- `from .module import something` - Relative imports break standalone scripts

GOOD FIXES:
- Remove unnecessary/incomplete code that serves no purpose
- Complete code based on context
- Fix syntax while preserving the developer's clear intent

Respond in JSON format:
{
    "original_code": "the exact original problematic code (include full lines)",
    "fixed_code": "the corrected code (can be empty string to remove code)",
    "description": "brief explanation of what was fixed and WHY",
    "commit_message": "concise commit message for this fix"
}

IMPORTANT:
- The original_code must be an EXACT character-by-character match of text in the file
- Include the FULL LINE(s) in original_code, not partial lines
- If the problematic code should be removed entirely, set fixed_code to ""
- Include enough context to make original_code unique in the file"#;

/// Logic-bug variant used for test failures: the test is ground truth.
pub const LOGIC_BUG_SYSTEM: &str = r#"You are a SENIOR code reviewer fixing a LOGIC BUG that caused a test to fail.

CRITICAL: The test is CORRECT - the code being tested has a BUG. Fix the SOURCE CODE, not the test.

COMMON LOGIC BUGS TO LOOK FOR:
1. Wrong operator: Using + instead of *, - instead of /, etc.
2. Wrong return value: Returning the wrong variable or calculation
3. Off-by-one errors: Wrong loop bounds, wrong indices
4. Inverted logic: Using > instead of <, and instead of or
5. Wrong function called: Calling the wrong helper/method
6. Missing negation: Forgot to use 'not' or '-'

ANALYSIS STEPS:
1. Read the test failure message to understand what was expected vs actual
2. Look at the function being tested
3. Find the logical error in the implementation
4. Fix the LOGIC, not just syntax

NEVER REWRITE IMPORT STYLE - Do NOT introduce relative imports like `from .module import`.

Respond in JSON format:
{
    "original_code": "the exact original buggy code line(s)",
    "fixed_code": "the corrected code with proper logic",
    "description": "explanation of the logic bug and how you fixed it",
    "commit_message": "fix: correct logic in <function_name>"
}

IMPORTANT:
- The original_code must be an EXACT character-by-character match
- Include the FULL LINE(s), not partial
- Focus on the LOGIC ERROR causing the test failure"#;

/// Pick the system prompt for a defect.
pub fn system_prompt_for(defect: &Defect) -> &'static str {
    if defect.bug_type == BugType::TestFailure {
        LOGIC_BUG_SYSTEM
    } else {
        MINIMAL_FIX_SYSTEM
    }
}

/// Numbered ±5-line context window around the defect line.
pub fn context_window(content: &str, line: u32, radius: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let target = (line.max(1) as usize - 1).min(lines.len() - 1);
    let start = target.saturating_sub(radius);
    let end = (target + radius + 1).min(lines.len());

    lines[start..end]
        .iter()
        .enumerate()
        .map(|(offset, text)| format!("{}: {}", start + offset + 1, text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Assemble the user prompt for a defect.
pub fn user_prompt(defect: &Defect, content: &str, file_cap: usize) -> String {
    let context = context_window(content, defect.line, 5);
    let slice: String = content.chars().take(file_cap).collect();

    if defect.bug_type == BugType::TestFailure {
        format!(
            "File: {file}\nError Type: TEST FAILURE (the code has a LOGIC BUG)\nError Line: {line}\n\nTest Failure Message:\n```\n{message}\n```\n\nCode in {file} (this is the code WITH THE BUG):\n```\n{context}\n```\n\nFull file content:\n```\n{slice}\n```\n\nFind and fix the LOGIC ERROR in this code that caused the test to fail. The test is correct - the code is wrong.",
            file = defect.file,
            line = defect.line,
            message = truncate(&defect.raw_error, 2000),
        )
    } else {
        format!(
            "File: {file}\nIssue Type: {bug_type}\nLine Number: {line}\nIssue Description: {message}\n\nCode context around line {line}:\n```\n{context}\n```\n\nFull file content:\n```\n{slice}\n```\n\nGenerate the fix for this issue.",
            file = defect.file,
            bug_type = defect.bug_type,
            line = defect.line,
            message = truncate(&defect.message, 1500),
        )
    }
}

fn truncate(text: &str, cap: usize) -> String {
    text.chars().take(cap).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_get_the_logic_prompt() {
        let defect = Defect::new("calculator.py", 1, BugType::TestFailure, "assert 5 == 6");
        assert!(system_prompt_for(&defect).contains("LOGIC BUG"));

        let defect = Defect::new("a.py", 1, BugType::Syntax, "invalid syntax");
        assert!(system_prompt_for(&defect).contains("SENIOR code reviewer fixing production code"));
    }

    #[test]
    fn both_prompts_forbid_relative_imports() {
        assert!(MINIMAL_FIX_SYSTEM.contains("relative imports"));
        assert!(LOGIC_BUG_SYSTEM.contains("relative imports"));
    }

    #[test]
    fn context_window_is_numbered_and_bounded() {
        let content = (1..=20).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n");
        let window = context_window(&content, 10, 5);
        assert!(window.starts_with("5: line5"));
        assert!(window.ends_with("15: line15"));
        assert_eq!(window.lines().count(), 11);
    }

    #[test]
    fn context_window_clamps_at_edges() {
        let content = "a\nb\nc";
        let window = context_window(content, 1, 5);
        assert_eq!(window, "1: a\n2: b\n3: c");
        // Out-of-range line clamps to the last line.
        let window = context_window(content, 99, 1);
        assert!(window.contains("3: c"));
    }

    #[test]
    fn user_prompt_caps_file_slice() {
        let defect = Defect::new("big.py", 1, BugType::Syntax, "bad");
        let content = "x".repeat(100_000);
        let prompt = user_prompt(&defect, &content, 6000);
        assert!(prompt.len() < 10_000);
    }
}
