//! Run context passed into every provisioning operation.
//!
//! The context replaces ambient session state: it carries the run identifier
//! used in log lines, the tenant being provisioned, and the settings that
//! change workflow behaviour. Nothing in the crate reads globals.

use crate::config::Config;
use crate::environment::UnmatchedEnvironment;
use crate::error::{ProvisionError, ProvisionResult};
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Context for one provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisionContext {
    /// Unique identifier for this run
    pub run_id: String,
    /// Directory tenant being provisioned
    pub tenant_id: Option<String>,
    pub catalog_name: String,
    pub vm_team_approver_group_id: Option<String>,
    pub authentication_strength: String,
    pub unmatched_environment: UnmatchedEnvironment,
    pub hr_onboarding_window_days: u32,
    /// When the run started
    pub started_at: DateTime<Utc>,
}

impl ProvisionContext {
    /// Create a context with a generated run ID from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            tenant_id: config.tenant_id.clone(),
            catalog_name: config.catalog_name.clone(),
            vm_team_approver_group_id: config.vm_team_approver_group_id.clone(),
            authentication_strength: config.authentication_strength.clone(),
            unmatched_environment: config.unmatched_environment,
            hr_onboarding_window_days: config.hr_onboarding_window_days,
            started_at: Utc::now(),
        }
    }

    /// The date HR windows are evaluated against.
    pub fn today(&self) -> NaiveDate {
        self.started_at.date_naive()
    }

    /// Pin the run start time, for reproducible date-window decisions.
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Refuse to run when the token belongs to another tenant than configured.
    ///
    /// A token without a tenant claim passes with a warning.
    pub fn check_tenant(&self, token_tenant: Option<&str>) -> ProvisionResult<()> {
        let Some(expected) = self.tenant_id.as_deref() else {
            return Ok(());
        };
        match token_tenant {
            Some(actual) if actual.eq_ignore_ascii_case(expected) => Ok(()),
            Some(actual) => Err(ProvisionError::prerequisite(
                format!("token is for tenant '{}', configured tenant is '{}'", actual, expected),
                "Acquire tokens for the configured tenant or fix tenant_id.",
            )),
            None => {
                log::warn!("Token has no tenant claim; cannot confirm tenant '{}'", expected);
                Ok(())
            }
        }
    }

    pub fn with_vm_team_approver(mut self, group_id: impl Into<String>) -> Self {
        self.vm_team_approver_group_id = Some(group_id.into());
        self
    }
}

impl Default for ProvisionContext {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generated_run_ids_differ() {
        let a = ProvisionContext::default();
        let b = ProvisionContext::default();
        assert_ne!(a.run_id, b.run_id);
    }

    #[test]
    fn test_check_tenant() {
        let unpinned = ProvisionContext::default();
        assert!(unpinned.check_tenant(Some("anything")).is_ok());

        let config = Config {
            tenant_id: Some("T1".to_string()),
            ..Config::default()
        };
        let pinned = ProvisionContext::from_config(&config);
        assert!(pinned.check_tenant(Some("t1")).is_ok());
        assert!(pinned.check_tenant(None).is_ok());
        let err = pinned.check_tenant(Some("t2")).unwrap_err();
        assert!(matches!(err, ProvisionError::PrerequisiteMissing { .. }));
    }

    #[test]
    fn test_today_follows_start_time() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 23, 30, 0).unwrap();
        let context = ProvisionContext::default().with_started_at(start);
        assert_eq!(context.today(), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
    }
}
