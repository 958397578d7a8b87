//! Failure-path tests for the orchestrator.
//!
//! Happy-path workflow scenarios live in `tests/rbac_workflow.rs`,
//! `tests/enrollment_workflow.rs` and `tests/hr_sync_workflow.rs`.

use super::Orchestrator;
use crate::confirm::AutoDecline;
use crate::context::ProvisionContext;
use crate::directory::InMemoryDirectory;
use crate::enrollment::parse_membership_csv;
use crate::error::ProvisionError;
use crate::report::{Outcome, ResourceKind};

const SUB: &str = "/subscriptions/0b1f6471-1bf0-4dda-aec3-111122223333";

fn orchestrator(directory: &InMemoryDirectory) -> Orchestrator<InMemoryDirectory, AutoDecline> {
    Orchestrator::new(directory.clone(), AutoDecline, ProvisionContext::default())
}

#[tokio::test]
async fn test_failed_group_marks_dependents_failed() {
    let directory = InMemoryDirectory::new();
    directory.fail_on("SG-sub-work-dev-01-Contributor").await;

    let report = orchestrator(&directory)
        .provision_subscription("sub-work-dev-01", SUB)
        .await
        .unwrap();

    let group = report
        .find(ResourceKind::Group, "SG-sub-work-dev-01-Contributor")
        .unwrap();
    assert_eq!(group.outcome, Outcome::Failed);

    let package = report
        .find(ResourceKind::AccessPackage, "AP-sub-work-dev-01-Contributor")
        .unwrap();
    assert_eq!(package.outcome, Outcome::Failed);
    assert!(package.detail.contains("not attempted"));

    // Independent roles still went through.
    let owner = report
        .find(ResourceKind::Group, "SG-sub-work-dev-01-Owner")
        .unwrap();
    assert_eq!(owner.outcome, Outcome::Created);
    assert_eq!(directory.stats().await.groups, 2);
}

#[tokio::test]
async fn test_failed_catalog_skips_packages_only() {
    let directory = InMemoryDirectory::new();
    directory.fail_on("RBAC Access").await;

    let report = orchestrator(&directory)
        .provision_subscription("sub-work-dev-01", SUB)
        .await
        .unwrap();

    assert!(report.has_failures());
    assert_eq!(report.filter(ResourceKind::Group, Outcome::Created).len(), 3);
    assert_eq!(
        report.filter(ResourceKind::AccessPackage, Outcome::Failed).len(),
        3
    );
    assert_eq!(directory.stats().await.access_packages, 0);
}

#[tokio::test]
async fn test_failed_package_marks_policies_failed() {
    let directory = InMemoryDirectory::new();
    directory.fail_on("AP-sub-work-dev-01-Owner").await;

    let report = orchestrator(&directory)
        .provision_subscription("sub-work-dev-01", SUB)
        .await
        .unwrap();

    let policy = report
        .find(
            ResourceKind::AssignmentPolicy,
            "AP-sub-work-dev-01-Owner: Owner - 8 hours",
        )
        .unwrap();
    assert_eq!(policy.outcome, Outcome::Failed);
}

#[tokio::test]
async fn test_missing_scopes_create_nothing() {
    let directory = InMemoryDirectory::new();
    directory.set_granted_scopes(&["Group.ReadWrite.All"]).await;

    let err = orchestrator(&directory)
        .provision_subscription("sub-work-dev-01", SUB)
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::PrerequisiteMissing { .. }));
    assert!(directory.journal().await.is_empty());
}

#[tokio::test]
async fn test_invalid_scope_rejected() {
    let directory = InMemoryDirectory::new();
    let err = orchestrator(&directory)
        .provision_subscription("sub-work-dev-01", "sub-work-dev-01")
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_vm_without_team_approver_creates_nothing() {
    let directory = InMemoryDirectory::new();
    let err = orchestrator(&directory)
        .provision_virtual_machine(
            "vm-webapp-01",
            "/subscriptions/s1/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm-webapp-01",
        )
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(directory.journal().await.is_empty());
}

#[tokio::test]
async fn test_import_without_enrollment_groups_fails_rows() {
    let directory = InMemoryDirectory::new();
    directory.seed_user("ada@example.com", true).await;
    let import = parse_membership_csv("upn,platform\nada@example.com,windows\n".as_bytes()).unwrap();

    let report = orchestrator(&directory)
        .import_enrollment_membership(&import)
        .await
        .unwrap();

    let entry = &report.entries()[0];
    assert_eq!(entry.outcome, Outcome::Failed);
    assert!(entry.detail.contains("run enrollment first"));
}

#[tokio::test]
async fn test_enrollment_group_failure_skips_its_policy() {
    let directory = InMemoryDirectory::new();
    directory
        .seed_authentication_strength("Phishing-resistant MFA")
        .await;
    directory.fail_on("SG-MFA-PhishingResistant-iOS").await;

    let report = orchestrator(&directory).provision_enrollment().await.unwrap();

    let policy = report
        .find(
            ResourceKind::ConditionalAccessPolicy,
            "CA-PhishingResistant-iOS",
        )
        .unwrap();
    assert_eq!(policy.outcome, Outcome::Failed);
    assert_eq!(directory.stats().await.conditional_access_policies, 2);
}
