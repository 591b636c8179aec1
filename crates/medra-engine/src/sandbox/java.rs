//! Java static analysis via `javac -Xlint:all` into a scratch directory.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use medra_core::{CancelToken, MedraError, Result, Settings};

use crate::defect::Defect;
use crate::detector::source_files;
use crate::parser;
use crate::sandbox::process::run_bounded;

/// Compile all Java sources, collecting diagnostics. Class files go to a
/// scratch directory that is removed afterwards.
pub async fn scan(
    root: &Path,
    settings: &Settings,
    cancel: &CancelToken,
) -> Result<(Vec<Defect>, Vec<(String, String)>)> {
    let files = source_files(root, &[".java"]);
    if files.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    let scratch = tempfile::tempdir().map_err(MedraError::Io)?;
    let scratch_str = scratch.path().to_string_lossy().into_owned();

    let mut args: Vec<&str> = vec!["-Xlint:all", "-d", scratch_str.as_str()];
    args.extend(files.iter().map(String::as_str));

    let timeout = Duration::from_secs(settings.timeouts.analyzer_secs);
    let cap = settings.limits.captured_output_bytes;

    match run_bounded("javac", &args, root, timeout, cap, cancel).await {
        Ok(out) => {
            let raw = out.combined();
            let defects = parser::parse(&raw);
            debug!("javac reported {} findings", defects.len());
            Ok((defects, vec![("javac".to_string(), raw)]))
        }
        Err(MedraError::Environmental { .. }) => {
            debug!("javac unavailable, skipping java analysis");
            Ok((Vec::new(), Vec::new()))
        }
        Err(e) => Err(e),
    }
}
