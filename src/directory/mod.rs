//! Directory abstraction layer.
//!
//! The identity platform is an opaque collaborator. Everything the workflows
//! need from it goes through the [`DirectoryProvider`] trait, which keeps the
//! provisioning logic independent of the transport:
//!
//! - [`InMemoryDirectory`] backs tests and `--dry-run` runs
//! - [`GraphDirectory`] talks to Microsoft Graph and Azure Resource Manager
//!
//! # What the provider is NOT responsible for
//!
//! - Deciding create vs reuse (see [`crate::upsert`])
//! - Naming, tiers or policy tables (see [`crate::model`])
//! - Confirmation or reporting
//!
//! Lookups by name are exact and case-sensitive on the provider side. Graph
//! `$filter` comparisons are case-insensitive, so the Graph backend filters
//! the returned records again before handing them back.
//!
//! # Example Usage
//!
//! ```rust
//! use identity_provisioner::directory::{DirectoryProvider, InMemoryDirectory, NewGroup};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let directory = InMemoryDirectory::new();
//! let group = directory
//!     .create_group(NewGroup::new("SG-sub-work-dev-01-Reader", "Reader access", false))
//!     .await?;
//! let found = directory.find_groups_by_name("SG-sub-work-dev-01-Reader").await?;
//! assert_eq!(found[0].id, group.id);
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod graph;
pub mod in_memory;

pub use errors::DirectoryError;
pub use graph::{GraphDirectory, GraphEndpoints};
pub use in_memory::{InMemoryDirectory, InMemoryDirectoryStats};

use crate::model::{ConditionalAccessSpec, MembershipType, PolicySpec, PolicyState};
use chrono::{DateTime, Utc};
use std::future::Future;

/// A directory security group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub role_assignable: bool,
}

/// Payload for creating a security group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGroup {
    pub display_name: String,
    pub description: String,
    pub role_assignable: bool,
}

impl NewGroup {
    pub fn new(
        display_name: impl Into<String>,
        description: impl Into<String>,
        role_assignable: bool,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            description: description.into(),
            role_assignable,
        }
    }

    /// Mail nickname derived from the display name.
    pub fn mail_nickname(&self) -> String {
        self.display_name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect()
    }
}

/// Result of registering a group for privileged-identity management.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PimRegistration {
    Registered,
    AlreadyRegistered,
}

/// An entitlement-management catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRecord {
    pub id: String,
    pub display_name: String,
}

/// An access package inside a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPackageRecord {
    pub id: String,
    pub display_name: String,
    pub catalog_id: String,
}

/// Payload for creating an access package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccessPackage {
    pub display_name: String,
    pub description: String,
    pub catalog_id: String,
}

/// An assignment policy of an access package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRecord {
    pub id: String,
    pub display_name: String,
    pub access_package_id: String,
}

/// An Azure RBAC role assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignmentRecord {
    pub id: String,
    /// Assignment name (the last segment of `id`).
    pub name: String,
    pub principal_id: String,
    /// Role definition GUID, without the ARM path prefix.
    pub role_definition_id: String,
    pub scope: String,
    pub condition: Option<String>,
}

/// Payload for creating a role assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRoleAssignment {
    pub principal_id: String,
    pub role_definition_id: String,
    pub scope: String,
    pub condition: Option<String>,
}

/// A conditional-access policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalAccessRecord {
    pub id: String,
    pub display_name: String,
    pub state: PolicyState,
}

/// An authentication-strength policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStrengthRecord {
    pub id: String,
    pub display_name: String,
}

/// Include targets of the passkey authentication method.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthMethodTargets {
    pub state: String,
    pub include_group_ids: Vec<String>,
}

/// A directory user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub user_principal_name: String,
    pub display_name: String,
    pub account_enabled: bool,
    pub employee_id: Option<String>,
}

/// Payload for creating a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub user_principal_name: String,
    pub display_name: String,
    pub employee_id: String,
    pub account_enabled: bool,
    pub hire_date: Option<DateTime<Utc>>,
}

/// Operations the workflows need from the identity platform.
///
/// Implementations perform one remote call per method (plus paging) and never
/// retry. Every `find_*` method returns all exact, case-sensitive name matches
/// so that callers can notice duplicates.
pub trait DirectoryProvider: Send + Sync {
    /// Permission scopes granted to the current session.
    fn granted_scopes(&self) -> impl Future<Output = Result<Vec<String>, DirectoryError>> + Send;

    // Groups

    fn find_groups_by_name(
        &self,
        display_name: &str,
    ) -> impl Future<Output = Result<Vec<GroupRecord>, DirectoryError>> + Send;

    fn create_group(
        &self,
        group: NewGroup,
    ) -> impl Future<Output = Result<GroupRecord, DirectoryError>> + Send;

    /// Register a group for PIM. Registering twice is not an error.
    fn register_group_for_pim(
        &self,
        group_id: &str,
    ) -> impl Future<Output = Result<PimRegistration, DirectoryError>> + Send;

    fn list_group_member_ids(
        &self,
        group_id: &str,
    ) -> impl Future<Output = Result<Vec<String>, DirectoryError>> + Send;

    /// Add a member. Returns `false` when the user was already a member.
    fn add_group_member(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> impl Future<Output = Result<bool, DirectoryError>> + Send;

    // Entitlement management

    fn find_catalogs_by_name(
        &self,
        display_name: &str,
    ) -> impl Future<Output = Result<Vec<CatalogRecord>, DirectoryError>> + Send;

    fn create_catalog(
        &self,
        display_name: &str,
        description: &str,
    ) -> impl Future<Output = Result<CatalogRecord, DirectoryError>> + Send;

    fn catalog_has_group(
        &self,
        catalog_id: &str,
        group_id: &str,
    ) -> impl Future<Output = Result<bool, DirectoryError>> + Send;

    fn add_group_to_catalog(
        &self,
        catalog_id: &str,
        group_id: &str,
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send;

    fn find_access_packages_by_name(
        &self,
        catalog_id: &str,
        display_name: &str,
    ) -> impl Future<Output = Result<Vec<AccessPackageRecord>, DirectoryError>> + Send;

    fn create_access_package(
        &self,
        package: NewAccessPackage,
    ) -> impl Future<Output = Result<AccessPackageRecord, DirectoryError>> + Send;

    /// Membership types through which a package currently grants the group.
    fn package_role_scopes(
        &self,
        access_package_id: &str,
        group_id: &str,
    ) -> impl Future<Output = Result<Vec<MembershipType>, DirectoryError>> + Send;

    fn add_package_role_scope(
        &self,
        access_package_id: &str,
        catalog_id: &str,
        group_id: &str,
        membership: MembershipType,
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send;

    fn find_policies_by_name(
        &self,
        access_package_id: &str,
        display_name: &str,
    ) -> impl Future<Output = Result<Vec<PolicyRecord>, DirectoryError>> + Send;

    fn create_policy(
        &self,
        access_package_id: &str,
        policy: &PolicySpec,
    ) -> impl Future<Output = Result<PolicyRecord, DirectoryError>> + Send;

    // Azure RBAC

    /// Assignments matching the (principal, role definition, scope) triple.
    fn list_role_assignments(
        &self,
        principal_id: &str,
        role_definition_id: &str,
        scope: &str,
    ) -> impl Future<Output = Result<Vec<RoleAssignmentRecord>, DirectoryError>> + Send;

    fn create_role_assignment(
        &self,
        assignment: NewRoleAssignment,
    ) -> impl Future<Output = Result<RoleAssignmentRecord, DirectoryError>> + Send;

    /// Replace the condition of an existing assignment.
    fn update_role_assignment_condition(
        &self,
        assignment: &RoleAssignmentRecord,
        condition: &str,
    ) -> impl Future<Output = Result<RoleAssignmentRecord, DirectoryError>> + Send;

    // Conditional access and authentication methods

    fn find_authentication_strengths(
        &self,
        display_name: &str,
    ) -> impl Future<Output = Result<Vec<AuthStrengthRecord>, DirectoryError>> + Send;

    fn find_conditional_access_policies(
        &self,
        display_name: &str,
    ) -> impl Future<Output = Result<Vec<ConditionalAccessRecord>, DirectoryError>> + Send;

    fn create_conditional_access_policy(
        &self,
        policy: &ConditionalAccessSpec,
    ) -> impl Future<Output = Result<ConditionalAccessRecord, DirectoryError>> + Send;

    fn passkey_method_targets(
        &self,
    ) -> impl Future<Output = Result<AuthMethodTargets, DirectoryError>> + Send;

    /// Append group include targets to the passkey method.
    ///
    /// Existing targets and their settings are kept as they are.
    fn add_passkey_method_targets(
        &self,
        group_ids: &[String],
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send;

    // Users

    fn find_user_by_upn(
        &self,
        user_principal_name: &str,
    ) -> impl Future<Output = Result<Option<UserRecord>, DirectoryError>> + Send;

    fn create_user(
        &self,
        user: NewUser,
    ) -> impl Future<Output = Result<UserRecord, DirectoryError>> + Send;

    fn set_account_enabled(
        &self,
        user_id: &str,
        enabled: bool,
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send;
}

/// Last path segment of an ARM or Graph identifier.
pub(crate) fn last_segment(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mail_nickname_strips_symbols() {
        let group = NewGroup::new("SG-sub work.dev 01-Reader", "", false);
        assert_eq!(group.mail_nickname(), "SG-subworkdev01-Reader");
    }

    #[test]
    fn test_last_segment() {
        assert_eq!(
            last_segment(
                "/subscriptions/s1/providers/Microsoft.Authorization/roleDefinitions/acdd72a7"
            ),
            "acdd72a7"
        );
        assert_eq!(last_segment("plain"), "plain");
    }
}
