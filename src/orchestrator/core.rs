//! Core orchestrator structure.

use crate::confirm::ConfirmationProvider;
use crate::context::ProvisionContext;
use crate::directory::DirectoryProvider;
use crate::error::ProvisionError;
use crate::report::{Outcome, ProvisionReport, ResourceKind};

/// Runs provisioning workflows against a directory backend.
///
/// # Type Parameters
///
/// * `D` - The directory backend implementing [`DirectoryProvider`]
/// * `C` - The source of operator confirmations
pub struct Orchestrator<D, C> {
    pub(super) directory: D,
    pub(super) confirmation: C,
    pub(super) context: ProvisionContext,
}

impl<D: DirectoryProvider, C: ConfirmationProvider> Orchestrator<D, C> {
    pub fn new(directory: D, confirmation: C, context: ProvisionContext) -> Self {
        log::debug!("Orchestrator ready for run {}", context.run_id);
        Self {
            directory,
            confirmation,
            context,
        }
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn context(&self) -> &ProvisionContext {
        &self.context
    }
}

/// Record a failed step.
pub(super) fn record_failure(
    report: &mut ProvisionReport,
    kind: ResourceKind,
    name: impl Into<String>,
    error: &ProvisionError,
) {
    report.record(kind, name, None, Outcome::Failed, error.to_string());
}

/// Record a step that was not attempted because `cause` failed first.
pub(super) fn record_dependent(
    report: &mut ProvisionReport,
    kind: ResourceKind,
    name: impl Into<String>,
    cause: &str,
) {
    report.record(
        kind,
        name,
        None,
        Outcome::Failed,
        format!("not attempted: {}", cause),
    );
}
