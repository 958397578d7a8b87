//! Permission prerequisites per workflow.
//!
//! Before a workflow mutates anything it checks that the session holds every
//! scope the workflow needs. A missing scope halts the run with a remediation
//! hint instead of failing halfway through.

use crate::directory::DirectoryProvider;
use crate::error::{ProvisionError, ProvisionResult};

/// Workflows that can be run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workflow {
    SubscriptionRbac,
    VirtualMachineRbac,
    Enrollment,
    MembershipImport,
    HrSync,
}

/// Every scope any workflow asks for.
pub const ALL_SCOPES: &[&str] = &[
    "Group.ReadWrite.All",
    "GroupMember.ReadWrite.All",
    "RoleManagement.ReadWrite.Directory",
    "PrivilegedAccess.ReadWrite.AzureADGroup",
    "EntitlementManagement.ReadWrite.All",
    "Policy.Read.All",
    "Policy.ReadWrite.ConditionalAccess",
    "Policy.ReadWrite.AuthenticationMethod",
    "User.ReadWrite.All",
];

impl Workflow {
    pub fn required_scopes(&self) -> &'static [&'static str] {
        match self {
            Workflow::SubscriptionRbac | Workflow::VirtualMachineRbac => &[
                "Group.ReadWrite.All",
                "RoleManagement.ReadWrite.Directory",
                "PrivilegedAccess.ReadWrite.AzureADGroup",
                "EntitlementManagement.ReadWrite.All",
            ],
            Workflow::Enrollment => &[
                "Group.ReadWrite.All",
                "Policy.Read.All",
                "Policy.ReadWrite.ConditionalAccess",
                "Policy.ReadWrite.AuthenticationMethod",
            ],
            Workflow::MembershipImport => &["GroupMember.ReadWrite.All", "User.ReadWrite.All"],
            Workflow::HrSync => &["User.ReadWrite.All"],
        }
    }
}

/// Required scopes absent from `granted`, compared case-insensitively.
pub fn missing_scopes(workflow: Workflow, granted: &[String]) -> Vec<&'static str> {
    workflow
        .required_scopes()
        .iter()
        .copied()
        .filter(|required| !granted.iter().any(|g| g.eq_ignore_ascii_case(required)))
        .collect()
}

/// Fail with [`ProvisionError::PrerequisiteMissing`] unless every scope is granted.
pub async fn ensure_scopes<D: DirectoryProvider>(
    directory: &D,
    workflow: Workflow,
) -> ProvisionResult<()> {
    let granted = directory.granted_scopes().await.map_err(|e| {
        ProvisionError::prerequisite(
            format!("granted scopes could not be read ({})", e),
            "Check that the bearer token is a valid access token for Microsoft Graph.",
        )
    })?;

    let missing = missing_scopes(workflow, &granted);
    if missing.is_empty() {
        log::debug!("All scopes for {:?} are granted", workflow);
        return Ok(());
    }

    Err(ProvisionError::prerequisite(
        format!("permission scopes {}", missing.join(", ")),
        "Grant these scopes (with admin consent) to the app registration or sign in with them.",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;

    #[test]
    fn test_missing_scopes_case_insensitive() {
        let granted = vec![
            "group.readwrite.all".to_string(),
            "RoleManagement.ReadWrite.Directory".to_string(),
        ];
        let missing = missing_scopes(Workflow::SubscriptionRbac, &granted);
        assert_eq!(
            missing,
            vec![
                "PrivilegedAccess.ReadWrite.AzureADGroup",
                "EntitlementManagement.ReadWrite.All"
            ]
        );
    }

    #[test]
    fn test_all_scopes_cover_every_workflow() {
        let granted: Vec<String> = ALL_SCOPES.iter().map(|s| s.to_string()).collect();
        for workflow in [
            Workflow::SubscriptionRbac,
            Workflow::VirtualMachineRbac,
            Workflow::Enrollment,
            Workflow::MembershipImport,
            Workflow::HrSync,
        ] {
            assert!(missing_scopes(workflow, &granted).is_empty(), "{workflow:?}");
        }
    }

    #[tokio::test]
    async fn test_ensure_scopes_reports_missing() {
        let directory = InMemoryDirectory::new();
        directory.set_granted_scopes(&["User.ReadWrite.All"]).await;

        assert!(ensure_scopes(&directory, Workflow::HrSync).await.is_ok());
        let err = ensure_scopes(&directory, Workflow::Enrollment)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Policy.ReadWrite.ConditionalAccess"));
    }
}
