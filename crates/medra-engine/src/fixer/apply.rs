//! Textual patch application.
//!
//! Exact first-occurrence replacement, then a line-anchored fallback that
//! tolerates whitespace drift, then failure. Within a file fixes apply in
//! descending line order so earlier positions stay stable, and the file is
//! written once after all edits.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use medra_core::Result;

use crate::fix::{resolve_in_workspace, Fix, FixStatus};

/// Outcome of one application attempt.
#[derive(Debug, PartialEq, Eq)]
enum ApplyOutcome {
    /// Replaced at this byte offset
    Applied { offset: usize },
    NotFound,
}

/// Apply a batch of fixes to the workspace, grouped per file. Every fix
/// ends up FIXED or FAILED; the count of FIXED fixes is returned.
pub fn apply_fixes(root: &Path, fixes: &mut [Fix]) -> Result<usize> {
    // Group indices by file, preserving a stable order.
    let mut by_file: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, fix) in fixes.iter().enumerate() {
        by_file.entry(fix.file_path.clone()).or_default().push(idx);
    }

    let mut applied_total = 0;

    for (file, mut indices) in by_file {
        let path = match resolve_in_workspace(root, &file) {
            Ok(p) => p,
            Err(e) => {
                for &idx in &indices {
                    fixes[idx].mark_failed(e.to_string());
                }
                continue;
            }
        };

        let Ok(mut content) = std::fs::read_to_string(&path) else {
            for &idx in &indices {
                fixes[idx].mark_failed("file not found in workspace");
            }
            continue;
        };

        // Descending line order within the file.
        indices.sort_by(|a, b| fixes[*b].line_number.cmp(&fixes[*a].line_number));

        let mut changed = false;
        for idx in indices {
            let fix = &mut fixes[idx];
            if fix.original_code.is_empty() {
                fix.mark_failed("missing original code");
                continue;
            }

            let pre_edit = content.clone();
            match apply_one(&mut content, fix) {
                ApplyOutcome::Applied { offset } => {
                    fix.mark_fixed(&pre_edit, offset);
                    applied_total += 1;
                    changed = true;
                }
                ApplyOutcome::NotFound => {
                    fix.mark_failed("original code not found in file");
                }
            }
        }

        if changed {
            std::fs::write(&path, &content)?;
            debug!("wrote {} with applied fixes", file);
        }
    }

    Ok(applied_total)
}

fn apply_one(content: &mut String, fix: &Fix) -> ApplyOutcome {
    // 1. Exact first occurrence.
    if let Some(offset) = content.find(&fix.original_code) {
        let mut end = offset + fix.original_code.len();
        // Deleting a whole line takes its newline with it.
        if fix.fixed_code.is_empty()
            && (offset == 0 || content.as_bytes()[offset - 1] == b'\n')
            && content.as_bytes().get(end) == Some(&b'\n')
        {
            end += 1;
        }
        content.replace_range(offset..end, &fix.fixed_code);
        return ApplyOutcome::Applied { offset };
    }

    // 2. Line-anchored replacement at the declared line number.
    line_anchored_apply(content, fix)
}

/// Whether the declared first original line plausibly matches the file
/// line: exact after trimming, or sharing at least half of its significant
/// tokens.
fn first_line_matches(expected: &str, actual: &str) -> bool {
    let expected_trimmed = expected.trim();
    let actual_trimmed = actual.trim();
    if expected_trimmed.is_empty() {
        return false;
    }
    if expected_trimmed == actual_trimmed {
        return true;
    }

    let tokens: Vec<&str> = expected_trimmed
        .split_whitespace()
        .filter(|t| t.len() >= 3)
        .collect();
    if tokens.is_empty() {
        return false;
    }
    let hits = tokens.iter().filter(|t| actual_trimmed.contains(**t)).count();
    hits * 2 >= tokens.len()
}

fn leading_whitespace(line: &str) -> &str {
    let end = line
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map(|(i, _)| i)
        .unwrap_or(line.len());
    &line[..end]
}

fn line_anchored_apply(content: &mut String, fix: &Fix) -> ApplyOutcome {
    if fix.line_number == 0 {
        return ApplyOutcome::NotFound;
    }
    let anchor_idx = (fix.line_number - 1) as usize;

    let lines: Vec<String> = content.lines().map(str::to_string).collect();
    if anchor_idx >= lines.len() {
        return ApplyOutcome::NotFound;
    }

    let original_lines: Vec<&str> = fix.original_code.lines().collect();
    if original_lines.is_empty() || anchor_idx + original_lines.len() > lines.len() {
        return ApplyOutcome::NotFound;
    }

    if !first_line_matches(original_lines[0], &lines[anchor_idx]) {
        return ApplyOutcome::NotFound;
    }

    // Byte offset of the anchor line for the applied-edit record.
    let offset: usize = lines[..anchor_idx].iter().map(|l| l.len() + 1).sum();

    let mut rebuilt: Vec<String> = lines[..anchor_idx].to_vec();

    if !fix.fixed_code.trim().is_empty() {
        let anchor_indent = leading_whitespace(&lines[anchor_idx]).to_string();
        let fixed_lines: Vec<&str> = fix.fixed_code.lines().collect();
        let base_indent = leading_whitespace(fixed_lines[0]).len();

        for (i, fixed_line) in fixed_lines.iter().enumerate() {
            if i == 0 {
                // The anchor line's indentation wins over the model's.
                rebuilt.push(format!("{anchor_indent}{}", fixed_line.trim_start()));
            } else {
                // Subsequent lines keep their indent relative to the first.
                let own_indent = leading_whitespace(fixed_line).len();
                let relative = own_indent.saturating_sub(base_indent);
                rebuilt.push(format!(
                    "{anchor_indent}{}{}",
                    " ".repeat(relative),
                    fixed_line.trim_start()
                ));
            }
        }
    }
    // Empty fixed_code deletes the original lines.

    rebuilt.extend(lines[anchor_idx + original_lines.len()..].iter().cloned());

    let had_trailing_newline = content.ends_with('\n');
    *content = rebuilt.join("\n");
    if had_trailing_newline {
        content.push('\n');
    }

    ApplyOutcome::Applied { offset }
}
