//! Sandbox executor: a pipeline of bounded analyzers whose findings are
//! merged and deduplicated by defect signature.

pub mod java;
pub mod javascript;
pub mod process;
pub mod python;
pub mod runtime;

use std::path::Path;

use tracing::{debug, info, warn};

use medra_core::{CancelToken, MedraError, Result, Settings};

use crate::defect::{dedup_defects, Defect};
use crate::detector::ProjectType;

/// Everything one scan produced: merged defects plus the raw tool outputs
/// for the classifier's supplemental pass.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub defects: Vec<Defect>,
    /// `(tool tag, raw output)` pairs
    pub raw_outputs: Vec<(String, String)>,
}

/// Runs static analyzers and best-effort runtime execution over a
/// workspace.
pub struct SandboxExecutor {
    settings: Settings,
    cancel: CancelToken,
}

impl SandboxExecutor {
    pub fn new(settings: Settings, cancel: CancelToken) -> Self {
        Self { settings, cancel }
    }

    /// Run both analysis phases and merge the results. Environmental
    /// failures degrade the affected analyzer, never the scan.
    pub async fn scan(&self, root: &Path, project: ProjectType) -> Result<ScanReport> {
        let mut report = ScanReport::default();

        self.static_phase(root, project, &mut report).await?;
        self.runtime_phase(root, project, &mut report).await?;

        let before = report.defects.len();
        report.defects = dedup_defects(std::mem::take(&mut report.defects));
        debug!(
            "sandbox scan: {} findings, {} after dedup",
            before,
            report.defects.len()
        );
        info!("🔍 Sandbox found {} defects", report.defects.len());

        Ok(report)
    }

    async fn static_phase(
        &self,
        root: &Path,
        project: ProjectType,
        report: &mut ScanReport,
    ) -> Result<()> {
        match project {
            ProjectType::Python | ProjectType::Unknown => {
                match python::syntax_scan(root, &self.settings, &self.cancel).await {
                    Ok(defects) => report.defects.extend(defects),
                    Err(e) => self.degrade("python-syntax", e)?,
                }
                match python::lint_scan(root, &self.settings, &self.cancel).await {
                    Ok((defects, raw)) => {
                        report.defects.extend(defects);
                        report.raw_outputs.extend(raw);
                    }
                    Err(e) => self.degrade("python-lint", e)?,
                }
                if project == ProjectType::Unknown {
                    // Pattern-based JS checks still run on unknown trees.
                    match javascript::scan(root, &self.settings, &self.cancel).await {
                        Ok((defects, raw)) => {
                            report.defects.extend(defects);
                            report.raw_outputs.extend(raw);
                        }
                        Err(e) => self.degrade("javascript", e)?,
                    }
                }
            }
            ProjectType::Node | ProjectType::TypeScript => {
                match javascript::scan(root, &self.settings, &self.cancel).await {
                    Ok((defects, raw)) => {
                        report.defects.extend(defects);
                        report.raw_outputs.extend(raw);
                    }
                    Err(e) => self.degrade("javascript", e)?,
                }
            }
            ProjectType::Java => {
                match java::scan(root, &self.settings, &self.cancel).await {
                    Ok((defects, raw)) => {
                        report.defects.extend(defects);
                        report.raw_outputs.extend(raw);
                    }
                    Err(e) => self.degrade("java", e)?,
                }
            }
        }
        Ok(())
    }

    async fn runtime_phase(
        &self,
        root: &Path,
        project: ProjectType,
        report: &mut ScanReport,
    ) -> Result<()> {
        match runtime::scan(root, project, &self.settings, &self.cancel).await {
            Ok((defects, raw)) => {
                report.defects.extend(defects);
                report.raw_outputs.extend(raw);
            }
            Err(e) => self.degrade("runtime", e)?,
        }
        Ok(())
    }

    /// Environmental and timeout failures skip the analyzer; anything else
    /// propagates.
    fn degrade(&self, analyzer: &str, err: MedraError) -> Result<()> {
        match err.class() {
            medra_core::ErrorClass::Degrade => {
                warn!("analyzer {analyzer} degraded: {err}");
                Ok(())
            }
            _ => Err(err),
        }
    }
}
