//! Common test utilities for workflow tests.
//!
//! Every test gets a fresh [`InMemoryDirectory`] and a context whose run date
//! is pinned so that HR date windows are reproducible.

#![allow(dead_code)]

use chrono::{NaiveDate, TimeZone, Utc};
use identity_provisioner::confirm::ConfirmationProvider;
use identity_provisioner::directory::InMemoryDirectory;
use identity_provisioner::{Orchestrator, ProvisionContext};

pub mod builders;

pub const DEV_SUBSCRIPTION: &str = "sub-work-dev-01";
pub const PROD_SUBSCRIPTION: &str = "sub-work-prod-01";
pub const VM_NAME: &str = "vm-webapp-01";
pub const VM_TEAM_GROUP: &str = "9d2f0c2e-7c3b-4d8e-9a51-0c6e2f7d1a11";
pub const AUTH_STRENGTH: &str = "Phishing-resistant MFA";

pub fn subscription_scope(id: &str) -> String {
    format!("/subscriptions/{}", id)
}

pub fn vm_scope() -> String {
    format!(
        "/subscriptions/s1/resourceGroups/rg-webapp/providers/Microsoft.Compute/virtualMachines/{}",
        VM_NAME
    )
}

/// The date every test run pretends to start on.
pub fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
}

pub fn test_context() -> ProvisionContext {
    ProvisionContext::default()
        .with_started_at(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap())
        .with_vm_team_approver(VM_TEAM_GROUP)
}

pub fn orchestrator<C: ConfirmationProvider>(
    directory: &InMemoryDirectory,
    confirmation: C,
) -> Orchestrator<InMemoryDirectory, C> {
    Orchestrator::new(directory.clone(), confirmation, test_context())
}

/// A directory that already holds the authentication-strength policy.
pub async fn enrollment_directory() -> InMemoryDirectory {
    let directory = InMemoryDirectory::new();
    directory.seed_authentication_strength(AUTH_STRENGTH).await;
    directory
}
