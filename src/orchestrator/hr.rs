//! HR onboarding and offboarding.

use super::core::{Orchestrator, record_failure};
use crate::confirm::ConfirmationProvider;
use crate::directory::DirectoryProvider;
use crate::error::ProvisionResult;
use crate::hr_sync::{HrAction, WorkerRecord, offboard, onboard};
use crate::prerequisites::{Workflow, ensure_scopes};
use crate::report::{ProvisionReport, ResourceKind};
use log::{debug, info};

impl<D: DirectoryProvider, C: ConfirmationProvider> Orchestrator<D, C> {
    /// Apply the HR export as of the run's start date.
    ///
    /// Workers outside both windows are ignored and not reported.
    pub async fn sync_hr(&self, workers: &[WorkerRecord]) -> ProvisionResult<ProvisionReport> {
        ensure_scopes(&self.directory, Workflow::HrSync).await?;

        let today = self.context.today();
        let window = self.context.hr_onboarding_window_days;
        let mut report = ProvisionReport::new();

        for worker in workers {
            let upn = worker.user_principal_name.as_str();
            let result = match worker.action(today, window) {
                HrAction::Onboard => onboard(&self.directory, worker).await,
                HrAction::Offboard => offboard(&self.directory, &self.confirmation, worker).await,
                HrAction::None => {
                    debug!("No HR action for '{}' on {}", upn, today);
                    continue;
                }
            };

            match result {
                Ok(synced) => report.record(
                    ResourceKind::User,
                    upn,
                    synced.user.map(|u| u.id),
                    synced.outcome,
                    synced.detail,
                ),
                Err(e) => record_failure(&mut report, ResourceKind::User, upn, &e),
            }
        }

        info!("HR sync for {}: {}", today, report.summary());
        Ok(report)
    }
}
