//! Best-effort runtime execution of candidate entry points.
//!
//! When a container backend is available each entry point runs isolated:
//! no network, memory and CPU caps, read-only workspace mount, 30-second
//! wall clock. Without a backend the executor falls back to a direct
//! subprocess under the same wall clock; defects found that way carry the
//! degraded-sandbox marker.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use medra_core::{CancelToken, MedraError, Result, Settings};

use crate::defect::Defect;
use crate::detector::{source_files, ProjectType};
use crate::parser;
use crate::sandbox::process::{run_bounded, ProcessOutput};

/// Upper bound on entry points executed per run.
const MAX_ENTRY_POINTS: usize = 5;

/// Probe the container backend once per run.
pub async fn docker_available(root: &Path, cancel: &CancelToken) -> bool {
    match run_bounded("docker", &["info"], root, Duration::from_secs(10), 4096, cancel).await {
        Ok(out) => out.success(),
        Err(_) => false,
    }
}

/// Candidate entry points for runtime execution, most likely first.
pub fn find_entry_points(root: &Path, project: ProjectType) -> Vec<String> {
    let mut candidates = Vec::new();

    match project {
        ProjectType::Python | ProjectType::Unknown => {
            for name in ["main.py", "app.py", "run.py"] {
                if root.join(name).exists() {
                    candidates.push(name.to_string());
                }
            }
            // Scripts with a __main__ guard also qualify.
            for file in source_files(root, &[".py"]) {
                if candidates.contains(&file) {
                    continue;
                }
                if let Ok(content) = std::fs::read_to_string(root.join(&file)) {
                    if content.contains("__name__") && content.contains("__main__") {
                        candidates.push(file);
                    }
                }
            }
        }
        ProjectType::Node | ProjectType::TypeScript => {
            if let Ok(pkg) = std::fs::read_to_string(root.join("package.json")) {
                if let Ok(json) = serde_json::from_str::<serde_json::Value>(&pkg) {
                    if let Some(main) = json.get("main").and_then(|v| v.as_str()) {
                        if root.join(main).exists() {
                            candidates.push(main.to_string());
                        }
                    }
                }
            }
            for name in ["index.js", "server.js", "app.js"] {
                if root.join(name).exists() && !candidates.contains(&name.to_string()) {
                    candidates.push(name.to_string());
                }
            }
        }
        ProjectType::Java => {}
    }

    candidates.truncate(MAX_ENTRY_POINTS);
    candidates
}

fn interpreter_for(entry: &str) -> Option<&'static str> {
    if entry.ends_with(".py") {
        Some("python3")
    } else if entry.ends_with(".js") || entry.ends_with(".mjs") || entry.ends_with(".cjs") {
        Some("node")
    } else {
        None
    }
}

async fn run_in_docker(
    root: &Path,
    entry: &str,
    settings: &Settings,
    cancel: &CancelToken,
) -> Result<ProcessOutput> {
    let interpreter = interpreter_for(entry)
        .ok_or_else(|| MedraError::environmental("docker", format!("no interpreter for {entry}")))?;
    let image = if interpreter == "python3" {
        &settings.sandbox.python_image
    } else {
        &settings.sandbox.node_image
    };

    let mount = format!("{}:/code:ro", root.display());
    let memory = format!("{}m", settings.sandbox.memory_limit_mb);
    let cpus = settings.sandbox.cpu_limit.to_string();
    let binary = if interpreter == "python3" { "python" } else { "node" };

    let args: Vec<&str> = vec![
        "run",
        "--rm",
        "--network",
        "none",
        "--memory",
        memory.as_str(),
        "--cpus",
        cpus.as_str(),
        "-v",
        mount.as_str(),
        "-w",
        "/code",
        image.as_str(),
        binary,
        entry,
    ];

    run_bounded(
        "docker",
        &args,
        root,
        Duration::from_secs(settings.timeouts.runtime_exec_secs),
        settings.limits.captured_output_bytes,
        cancel,
    )
    .await
}

async fn run_direct(
    root: &Path,
    entry: &str,
    settings: &Settings,
    cancel: &CancelToken,
) -> Result<ProcessOutput> {
    let interpreter = interpreter_for(entry)
        .ok_or_else(|| MedraError::environmental("runtime", format!("no interpreter for {entry}")))?;

    run_bounded(
        interpreter,
        &[entry],
        root,
        Duration::from_secs(settings.timeouts.runtime_exec_secs),
        settings.limits.captured_output_bytes,
        cancel,
    )
    .await
}

/// Execute each candidate entry point, parsing crashes into defects.
/// Returns defects plus raw output per entry point.
pub async fn scan(
    root: &Path,
    project: ProjectType,
    settings: &Settings,
    cancel: &CancelToken,
) -> Result<(Vec<Defect>, Vec<(String, String)>)> {
    let entries = find_entry_points(root, project);
    if entries.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    let isolated = docker_available(root, cancel).await;
    if !isolated {
        info!("⚠️  No container backend; runtime checks run in degraded mode");
    }

    let mut defects = Vec::new();
    let mut raw_outputs = Vec::new();

    for entry in entries {
        let result = if isolated {
            run_in_docker(root, &entry, settings, cancel).await
        } else {
            run_direct(root, &entry, settings, cancel).await
        };

        let output = match result {
            Ok(out) => out,
            Err(MedraError::Environmental { tool, reason }) => {
                debug!("runtime exec skipped for {entry} ({tool}: {reason})");
                continue;
            }
            Err(e) => return Err(e),
        };

        if output.success() {
            continue;
        }
        if output.timed_out {
            debug!("{entry} hit the runtime wall clock; long-running entry points are not defects");
            continue;
        }

        let raw = output.combined();
        for mut defect in parser::parse(&raw) {
            defect.degraded_sandbox = !isolated;
            defects.push(defect);
        }
        raw_outputs.push((format!("runtime:{entry}"), raw));
    }

    Ok((defects, raw_outputs))
}
