//! Fix records: a proposed or applied textual edit tied to one defect.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use medra_core::{MedraError, Result};

use crate::defect::BugType;

/// Lifecycle of a fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixStatus {
    Proposed,
    Fixed,
    Failed,
}

/// Record of the pre-edit file state, kept so a FIXED edit is reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedEdit {
    /// Hash of the file content immediately before the edit
    pub pre_edit_hash: u64,
    /// Byte offset of the replaced `original_code` occurrence
    pub match_offset: usize,
}

/// A proposed or applied patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fix {
    pub file_path: String,
    pub line_number: u32,
    pub bug_type: BugType,
    pub status: FixStatus,
    /// Exact substring expected in the file; empty `fixed_code` means delete
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fixed_code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub commit_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied: Option<AppliedEdit>,
    /// Populated when the fix could not be applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl Fix {
    pub fn proposed(
        file_path: impl Into<String>,
        line_number: u32,
        bug_type: BugType,
        original_code: String,
        fixed_code: String,
        description: String,
        commit_message: String,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            line_number,
            bug_type,
            status: FixStatus::Proposed,
            original_code,
            fixed_code,
            description,
            commit_message,
            applied: None,
            failure_reason: None,
        }
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = FixStatus::Failed;
        self.failure_reason = Some(reason.into());
    }

    pub fn mark_fixed(&mut self, pre_edit_content: &str, match_offset: usize) {
        self.status = FixStatus::Fixed;
        self.applied = Some(AppliedEdit {
            pre_edit_hash: content_hash(pre_edit_content),
            match_offset,
        });
    }
}

/// Hash of file content for the applied-edit record.
pub fn content_hash(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

/// Resolve a repo-relative path inside the workspace, rejecting traversal
/// outside the workspace root.
pub fn resolve_in_workspace(root: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    if rel.is_absolute() {
        return Err(MedraError::patch(format!("absolute path rejected: {relative}")));
    }
    for component in rel.components() {
        match component {
            Component::ParentDir => {
                return Err(MedraError::patch(format!("path traversal rejected: {relative}")))
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(MedraError::patch(format!("invalid path: {relative}")))
            }
            _ => {}
        }
    }
    Ok(root.join(rel))
}
