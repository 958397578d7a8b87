//! Run report and CSV artifacts.
//!
//! Every step of a workflow appends one [`ReportEntry`] to the
//! [`ProvisionReport`]. At the end of a run the report is written as two CSV
//! files:
//!
//! - the mapping file (`provisioned_resources.csv`): one row per resource
//!   name, rewritten each run and extended with rows from earlier runs for
//!   names this run did not touch
//! - the findings file (`security_findings.csv`): append-only, one row per
//!   flagged or failed entry

use crate::error::ProvisionResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;

pub const MAPPING_FILE: &str = "provisioned_resources.csv";
pub const FINDINGS_FILE: &str = "security_findings.csv";

/// Kind of resource a report entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Group,
    PimRegistration,
    RoleAssignment,
    Catalog,
    CatalogResource,
    AccessPackage,
    PackageRoleScope,
    AssignmentPolicy,
    ConditionalAccessPolicy,
    AuthenticationMethod,
    GroupMembership,
    User,
}

/// What happened to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Created,
    Reused,
    Updated,
    /// A finding the operator declined to remediate.
    Flagged,
    Skipped,
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Outcome::Created => "created",
            Outcome::Reused => "reused",
            Outcome::Updated => "updated",
            Outcome::Flagged => "flagged",
            Outcome::Skipped => "skipped",
            Outcome::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// One row of the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub kind: ResourceKind,
    pub name: String,
    pub id: Option<String>,
    pub outcome: Outcome,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

/// Everything a run did, in order.
#[derive(Debug, Clone, Default)]
pub struct ProvisionReport {
    entries: Vec<ReportEntry>,
}

impl ProvisionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        kind: ResourceKind,
        name: impl Into<String>,
        id: Option<String>,
        outcome: Outcome,
        detail: impl Into<String>,
    ) {
        let entry = ReportEntry {
            kind,
            name: name.into(),
            id,
            outcome,
            detail: detail.into(),
            recorded_at: Utc::now(),
        };
        match outcome {
            Outcome::Failed | Outcome::Flagged => log::warn!(
                "{:?} '{}' {}: {}",
                entry.kind,
                entry.name,
                entry.outcome,
                entry.detail
            ),
            _ => log::info!(
                "{:?} '{}' {} ({})",
                entry.kind,
                entry.name,
                entry.outcome,
                entry.id.as_deref().unwrap_or("-")
            ),
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    /// Entries of one kind with one outcome.
    pub fn filter(&self, kind: ResourceKind, outcome: Outcome) -> Vec<&ReportEntry> {
        self.entries
            .iter()
            .filter(|e| e.kind == kind && e.outcome == outcome)
            .collect()
    }

    /// The last entry recorded under `name`.
    pub fn find(&self, kind: ResourceKind, name: &str) -> Option<&ReportEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.kind == kind && e.name == name)
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(Outcome::Failed) > 0
    }

    pub fn has_findings(&self) -> bool {
        self.count(Outcome::Flagged) > 0
    }

    /// One-line summary per outcome, for the end of a run.
    pub fn summary(&self) -> String {
        [
            Outcome::Created,
            Outcome::Reused,
            Outcome::Updated,
            Outcome::Flagged,
            Outcome::Skipped,
            Outcome::Failed,
        ]
        .iter()
        .map(|o| format!("{}={}", o, self.count(*o)))
        .collect::<Vec<_>>()
        .join(" ")
    }

    /// Rewrite the mapping CSV, keeping rows for names this run did not touch.
    ///
    /// Only entries that carry an identifier are written.
    pub fn write_mapping_csv(&self, path: &Path) -> ProvisionResult<()> {
        let mut rows: BTreeMap<(ResourceKind, String), ReportEntry> = BTreeMap::new();

        if path.exists() {
            let mut reader = csv::Reader::from_path(path)?;
            for row in reader.deserialize::<ReportEntry>() {
                let row = row?;
                rows.insert((row.kind, row.name.clone()), row);
            }
        }

        for entry in self.entries.iter().filter(|e| e.id.is_some()) {
            rows.insert((entry.kind, entry.name.clone()), entry.clone());
        }

        let mut writer = csv::Writer::from_path(path)?;
        for row in rows.values() {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Append flagged and failed entries to the findings CSV.
    pub fn append_findings_csv(&self, path: &Path) -> ProvisionResult<usize> {
        let findings: Vec<&ReportEntry> = self
            .entries
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Flagged | Outcome::Failed))
            .collect();
        if findings.is_empty() {
            return Ok(0);
        }

        let write_header = !path.exists() || std::fs::metadata(path)?.len() == 0;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);
        for entry in &findings {
            writer.serialize(entry)?;
        }
        writer.flush()?;
        Ok(findings.len())
    }

    /// Write both artifacts into `dir`.
    pub fn write_artifacts(&self, dir: &Path) -> ProvisionResult<()> {
        std::fs::create_dir_all(dir)?;
        self.write_mapping_csv(&dir.join(MAPPING_FILE))?;
        let appended = self.append_findings_csv(&dir.join(FINDINGS_FILE))?;
        log::info!(
            "Wrote {} and {} new finding(s) to {}",
            MAPPING_FILE,
            appended,
            dir.display()
        );
        Ok(())
    }
}
