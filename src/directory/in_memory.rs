//! In-memory directory implementation.
//!
//! This module provides a thread-safe in-memory implementation of the
//! [`DirectoryProvider`] trait. It backs the test suite and `--dry-run`
//! invocations of the CLI, where nothing may reach the real tenant.
//!
//! # Features
//!
//! * Thread-safe access through a tokio `RwLock`
//! * Exact, case-sensitive name lookups like the Graph backend
//! * Failure injection per resource name for partial-failure tests
//! * A journal of mutating calls for assertions
//!
//! # Example Usage
//!
//! ```rust
//! use identity_provisioner::directory::{DirectoryProvider, InMemoryDirectory};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let directory = InMemoryDirectory::new();
//! directory.seed_authentication_strength("Phishing-resistant MFA").await;
//! let found = directory.find_authentication_strengths("Phishing-resistant MFA").await?;
//! assert_eq!(found.len(), 1);
//! # Ok(())
//! # }
//! ```

use crate::directory::{
    AccessPackageRecord, AuthMethodTargets, AuthStrengthRecord, CatalogRecord,
    ConditionalAccessRecord, DirectoryError, DirectoryProvider, GroupRecord, NewAccessPackage,
    NewGroup, NewRoleAssignment, NewUser, PimRegistration, PolicyRecord, RoleAssignmentRecord,
    UserRecord,
};
use crate::model::{ConditionalAccessSpec, MembershipType, PolicySpec};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct DirectoryState {
    // None grants every scope.
    scopes: Option<Vec<String>>,
    groups: Vec<GroupRecord>,
    pim_registered: HashSet<String>,
    members: HashMap<String, BTreeSet<String>>,
    catalogs: Vec<CatalogRecord>,
    catalog_groups: HashMap<String, BTreeSet<String>>,
    packages: Vec<AccessPackageRecord>,
    role_scopes: HashMap<String, Vec<(String, MembershipType)>>,
    policies: Vec<(PolicyRecord, PolicySpec)>,
    assignments: Vec<RoleAssignmentRecord>,
    auth_strengths: Vec<AuthStrengthRecord>,
    ca_policies: Vec<(ConditionalAccessRecord, ConditionalAccessSpec)>,
    passkey: AuthMethodTargets,
    users: Vec<UserRecord>,
    failing_names: HashSet<String>,
    journal: Vec<String>,
}

impl DirectoryState {
    fn check_failure(&self, name: &str) -> Result<(), DirectoryError> {
        if self.failing_names.contains(name) {
            Err(DirectoryError::Unavailable {
                message: format!("injected failure for '{}'", name),
            })
        } else {
            Ok(())
        }
    }

    fn record(&mut self, entry: String) {
        log::trace!("in-memory directory: {}", entry);
        self.journal.push(entry);
    }
}

/// Thread-safe in-memory directory.
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    state: Arc<RwLock<DirectoryState>>,
}

/// Counts of stored objects, for assertions and dry-run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InMemoryDirectoryStats {
    pub groups: usize,
    pub pim_registered: usize,
    pub catalogs: usize,
    pub access_packages: usize,
    pub policies: usize,
    pub role_assignments: usize,
    pub conditional_access_policies: usize,
    pub users: usize,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl InMemoryDirectory {
    /// Create an empty directory that grants every permission scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the granted scopes reported by [`DirectoryProvider::granted_scopes`].
    pub async fn set_granted_scopes(&self, scopes: &[&str]) {
        let mut state = self.state.write().await;
        state.scopes = Some(scopes.iter().map(|s| s.to_string()).collect());
    }

    /// Make every lookup or create for `name` fail with `Unavailable`.
    pub async fn fail_on(&self, name: &str) {
        let mut state = self.state.write().await;
        state.failing_names.insert(name.to_string());
    }

    pub async fn seed_authentication_strength(&self, display_name: &str) -> String {
        let mut state = self.state.write().await;
        let id = new_id();
        state.auth_strengths.push(AuthStrengthRecord {
            id: id.clone(),
            display_name: display_name.to_string(),
        });
        id
    }

    pub async fn seed_user(&self, user_principal_name: &str, account_enabled: bool) -> UserRecord {
        let mut state = self.state.write().await;
        let user = UserRecord {
            id: new_id(),
            user_principal_name: user_principal_name.to_string(),
            display_name: user_principal_name
                .split('@')
                .next()
                .unwrap_or(user_principal_name)
                .to_string(),
            account_enabled,
            employee_id: None,
        };
        state.users.push(user.clone());
        user
    }

    /// Insert a role assignment without any condition checks.
    pub async fn seed_role_assignment(&self, assignment: NewRoleAssignment) -> RoleAssignmentRecord {
        let mut state = self.state.write().await;
        let name = new_id();
        let record = RoleAssignmentRecord {
            id: format!(
                "{}/providers/Microsoft.Authorization/roleAssignments/{}",
                assignment.scope, name
            ),
            name,
            principal_id: assignment.principal_id,
            role_definition_id: assignment.role_definition_id,
            scope: assignment.scope,
            condition: assignment.condition,
        };
        state.assignments.push(record.clone());
        record
    }

    pub async fn stats(&self) -> InMemoryDirectoryStats {
        let state = self.state.read().await;
        InMemoryDirectoryStats {
            groups: state.groups.len(),
            pim_registered: state.pim_registered.len(),
            catalogs: state.catalogs.len(),
            access_packages: state.packages.len(),
            policies: state.policies.len(),
            role_assignments: state.assignments.len(),
            conditional_access_policies: state.ca_policies.len(),
            users: state.users.len(),
        }
    }

    pub async fn is_pim_registered(&self, group_id: &str) -> bool {
        self.state.read().await.pim_registered.contains(group_id)
    }

    /// Policy specs stored for a package, in creation order.
    pub async fn policies_for(&self, access_package_id: &str) -> Vec<PolicySpec> {
        let state = self.state.read().await;
        state
            .policies
            .iter()
            .filter(|(record, _)| record.access_package_id == access_package_id)
            .map(|(_, spec)| spec.clone())
            .collect()
    }

    pub async fn conditional_access_spec(&self, display_name: &str) -> Option<ConditionalAccessSpec> {
        let state = self.state.read().await;
        state
            .ca_policies
            .iter()
            .find(|(record, _)| record.display_name == display_name)
            .map(|(_, spec)| spec.clone())
    }

    pub async fn all_role_assignments(&self) -> Vec<RoleAssignmentRecord> {
        self.state.read().await.assignments.clone()
    }

    pub async fn user(&self, user_principal_name: &str) -> Option<UserRecord> {
        let state = self.state.read().await;
        state
            .users
            .iter()
            .find(|u| u.user_principal_name == user_principal_name)
            .cloned()
    }

    /// Mutating calls in the order they happened.
    pub async fn journal(&self) -> Vec<String> {
        self.state.read().await.journal.clone()
    }
}

impl DirectoryProvider for InMemoryDirectory {
    async fn granted_scopes(&self) -> Result<Vec<String>, DirectoryError> {
        let state = self.state.read().await;
        Ok(match &state.scopes {
            Some(scopes) => scopes.clone(),
            None => crate::prerequisites::ALL_SCOPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        })
    }

    async fn find_groups_by_name(&self, display_name: &str) -> Result<Vec<GroupRecord>, DirectoryError> {
        let state = self.state.read().await;
        state.check_failure(display_name)?;
        Ok(state
            .groups
            .iter()
            .filter(|g| g.display_name == display_name)
            .cloned()
            .collect())
    }

    async fn create_group(&self, group: NewGroup) -> Result<GroupRecord, DirectoryError> {
        let mut state = self.state.write().await;
        state.check_failure(&group.display_name)?;
        let record = GroupRecord {
            id: new_id(),
            display_name: group.display_name,
            description: group.description,
            role_assignable: group.role_assignable,
        };
        state.record(format!("create_group {}", record.display_name));
        state.groups.push(record.clone());
        Ok(record)
    }

    async fn register_group_for_pim(&self, group_id: &str) -> Result<PimRegistration, DirectoryError> {
        let mut state = self.state.write().await;
        if !state.groups.iter().any(|g| g.id == group_id) {
            return Err(DirectoryError::not_found("Group", group_id));
        }
        if state.pim_registered.insert(group_id.to_string()) {
            state.record(format!("register_group_for_pim {}", group_id));
            Ok(PimRegistration::Registered)
        } else {
            Ok(PimRegistration::AlreadyRegistered)
        }
    }

    async fn list_group_member_ids(&self, group_id: &str) -> Result<Vec<String>, DirectoryError> {
        let state = self.state.read().await;
        Ok(state
            .members
            .get(group_id)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_group_member(&self, group_id: &str, user_id: &str) -> Result<bool, DirectoryError> {
        let mut state = self.state.write().await;
        if !state.groups.iter().any(|g| g.id == group_id) {
            return Err(DirectoryError::not_found("Group", group_id));
        }
        let added = state
            .members
            .entry(group_id.to_string())
            .or_default()
            .insert(user_id.to_string());
        if added {
            state.record(format!("add_group_member {} {}", group_id, user_id));
        }
        Ok(added)
    }

    async fn find_catalogs_by_name(&self, display_name: &str) -> Result<Vec<CatalogRecord>, DirectoryError> {
        let state = self.state.read().await;
        state.check_failure(display_name)?;
        Ok(state
            .catalogs
            .iter()
            .filter(|c| c.display_name == display_name)
            .cloned()
            .collect())
    }

    async fn create_catalog(&self, display_name: &str, _description: &str) -> Result<CatalogRecord, DirectoryError> {
        let mut state = self.state.write().await;
        state.check_failure(display_name)?;
        let record = CatalogRecord {
            id: new_id(),
            display_name: display_name.to_string(),
        };
        state.record(format!("create_catalog {}", display_name));
        state.catalogs.push(record.clone());
        Ok(record)
    }

    async fn catalog_has_group(&self, catalog_id: &str, group_id: &str) -> Result<bool, DirectoryError> {
        let state = self.state.read().await;
        Ok(state
            .catalog_groups
            .get(catalog_id)
            .is_some_and(|groups| groups.contains(group_id)))
    }

    async fn add_group_to_catalog(&self, catalog_id: &str, group_id: &str) -> Result<(), DirectoryError> {
        let mut state = self.state.write().await;
        if !state.catalogs.iter().any(|c| c.id == catalog_id) {
            return Err(DirectoryError::not_found("Catalog", catalog_id));
        }
        state
            .catalog_groups
            .entry(catalog_id.to_string())
            .or_default()
            .insert(group_id.to_string());
        state.record(format!("add_group_to_catalog {} {}", catalog_id, group_id));
        Ok(())
    }

    async fn find_access_packages_by_name(
        &self,
        catalog_id: &str,
        display_name: &str,
    ) -> Result<Vec<AccessPackageRecord>, DirectoryError> {
        let state = self.state.read().await;
        state.check_failure(display_name)?;
        Ok(state
            .packages
            .iter()
            .filter(|p| p.catalog_id == catalog_id && p.display_name == display_name)
            .cloned()
            .collect())
    }

    async fn create_access_package(&self, package: NewAccessPackage) -> Result<AccessPackageRecord, DirectoryError> {
        let mut state = self.state.write().await;
        state.check_failure(&package.display_name)?;
        let record = AccessPackageRecord {
            id: new_id(),
            display_name: package.display_name,
            catalog_id: package.catalog_id,
        };
        state.record(format!("create_access_package {}", record.display_name));
        state.packages.push(record.clone());
        Ok(record)
    }

    async fn package_role_scopes(
        &self,
        access_package_id: &str,
        group_id: &str,
    ) -> Result<Vec<MembershipType>, DirectoryError> {
        let state = self.state.read().await;
        Ok(state
            .role_scopes
            .get(access_package_id)
            .map(|scopes| {
                scopes
                    .iter()
                    .filter(|(g, _)| g == group_id)
                    .map(|(_, m)| *m)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add_package_role_scope(
        &self,
        access_package_id: &str,
        catalog_id: &str,
        group_id: &str,
        membership: MembershipType,
    ) -> Result<(), DirectoryError> {
        let mut state = self.state.write().await;
        let in_catalog = state
            .catalog_groups
            .get(catalog_id)
            .is_some_and(|groups| groups.contains(group_id));
        if !in_catalog {
            return Err(DirectoryError::Http {
                operation: "add package role scope".to_string(),
                status: 400,
                code: "ResourceNotInCatalog".to_string(),
                message: format!("group '{}' is not a resource of catalog '{}'", group_id, catalog_id),
            });
        }
        state
            .role_scopes
            .entry(access_package_id.to_string())
            .or_default()
            .push((group_id.to_string(), membership));
        state.record(format!(
            "add_package_role_scope {} {} {}",
            access_package_id,
            group_id,
            membership.as_str()
        ));
        Ok(())
    }

    async fn find_policies_by_name(
        &self,
        access_package_id: &str,
        display_name: &str,
    ) -> Result<Vec<PolicyRecord>, DirectoryError> {
        let state = self.state.read().await;
        state.check_failure(display_name)?;
        Ok(state
            .policies
            .iter()
            .map(|(record, _)| record)
            .filter(|p| p.access_package_id == access_package_id && p.display_name == display_name)
            .cloned()
            .collect())
    }

    async fn create_policy(&self, access_package_id: &str, policy: &PolicySpec) -> Result<PolicyRecord, DirectoryError> {
        let mut state = self.state.write().await;
        state.check_failure(&policy.name)?;
        let record = PolicyRecord {
            id: new_id(),
            display_name: policy.name.clone(),
            access_package_id: access_package_id.to_string(),
        };
        state.record(format!("create_policy {}", policy.name));
        state.policies.push((record.clone(), policy.clone()));
        Ok(record)
    }

    async fn list_role_assignments(
        &self,
        principal_id: &str,
        role_definition_id: &str,
        scope: &str,
    ) -> Result<Vec<RoleAssignmentRecord>, DirectoryError> {
        let state = self.state.read().await;
        Ok(state
            .assignments
            .iter()
            .filter(|a| {
                a.principal_id == principal_id
                    && a.role_definition_id.eq_ignore_ascii_case(role_definition_id)
                    && a.scope.eq_ignore_ascii_case(scope)
            })
            .cloned()
            .collect())
    }

    async fn create_role_assignment(&self, assignment: NewRoleAssignment) -> Result<RoleAssignmentRecord, DirectoryError> {
        {
            let mut state = self.state.write().await;
            state.record(format!(
                "create_role_assignment {} {} {}",
                assignment.principal_id, assignment.role_definition_id, assignment.scope
            ));
        }
        Ok(self.seed_role_assignment(assignment).await)
    }

    async fn update_role_assignment_condition(
        &self,
        assignment: &RoleAssignmentRecord,
        condition: &str,
    ) -> Result<RoleAssignmentRecord, DirectoryError> {
        let mut state = self.state.write().await;
        let stored = state
            .assignments
            .iter_mut()
            .find(|a| a.id == assignment.id)
            .ok_or_else(|| DirectoryError::not_found("RoleAssignment", &assignment.id))?;
        stored.condition = Some(condition.to_string());
        let updated = stored.clone();
        state.record(format!("update_role_assignment_condition {}", updated.name));
        Ok(updated)
    }

    async fn find_authentication_strengths(
        &self,
        display_name: &str,
    ) -> Result<Vec<AuthStrengthRecord>, DirectoryError> {
        let state = self.state.read().await;
        state.check_failure(display_name)?;
        Ok(state
            .auth_strengths
            .iter()
            .filter(|s| s.display_name == display_name)
            .cloned()
            .collect())
    }

    async fn find_conditional_access_policies(
        &self,
        display_name: &str,
    ) -> Result<Vec<ConditionalAccessRecord>, DirectoryError> {
        let state = self.state.read().await;
        state.check_failure(display_name)?;
        Ok(state
            .ca_policies
            .iter()
            .map(|(record, _)| record)
            .filter(|p| p.display_name == display_name)
            .cloned()
            .collect())
    }

    async fn create_conditional_access_policy(
        &self,
        policy: &ConditionalAccessSpec,
    ) -> Result<ConditionalAccessRecord, DirectoryError> {
        let mut state = self.state.write().await;
        state.check_failure(&policy.name)?;
        let record = ConditionalAccessRecord {
            id: new_id(),
            display_name: policy.name.clone(),
            state: policy.state,
        };
        state.record(format!("create_conditional_access_policy {}", policy.name));
        state.ca_policies.push((record.clone(), policy.clone()));
        Ok(record)
    }

    async fn passkey_method_targets(&self) -> Result<AuthMethodTargets, DirectoryError> {
        Ok(self.state.read().await.passkey.clone())
    }

    async fn add_passkey_method_targets(&self, group_ids: &[String]) -> Result<(), DirectoryError> {
        let mut state = self.state.write().await;
        for id in group_ids {
            if !state.passkey.include_group_ids.contains(id) {
                state.passkey.include_group_ids.push(id.clone());
            }
        }
        state.record(format!("add_passkey_method_targets {}", group_ids.len()));
        Ok(())
    }

    async fn find_user_by_upn(&self, user_principal_name: &str) -> Result<Option<UserRecord>, DirectoryError> {
        let state = self.state.read().await;
        state.check_failure(user_principal_name)?;
        Ok(state
            .users
            .iter()
            .find(|u| u.user_principal_name.eq_ignore_ascii_case(user_principal_name))
            .cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord, DirectoryError> {
        let mut state = self.state.write().await;
        state.check_failure(&user.user_principal_name)?;
        let record = UserRecord {
            id: new_id(),
            user_principal_name: user.user_principal_name,
            display_name: user.display_name,
            account_enabled: user.account_enabled,
            employee_id: Some(user.employee_id),
        };
        state.record(format!("create_user {}", record.user_principal_name));
        state.users.push(record.clone());
        Ok(record)
    }

    async fn set_account_enabled(&self, user_id: &str, enabled: bool) -> Result<(), DirectoryError> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| DirectoryError::not_found("User", user_id))?;
        user.account_enabled = enabled;
        state.record(format!("set_account_enabled {} {}", user_id, enabled));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_group_lookup_is_case_sensitive() {
        let directory = InMemoryDirectory::new();
        directory
            .create_group(NewGroup::new("SG-sub-work-dev-01-Reader", "", false))
            .await
            .unwrap();

        let exact = directory
            .find_groups_by_name("SG-sub-work-dev-01-Reader")
            .await
            .unwrap();
        assert_eq!(exact.len(), 1);

        let other_case = directory
            .find_groups_by_name("sg-sub-work-dev-01-reader")
            .await
            .unwrap();
        assert!(other_case.is_empty());
    }

    #[tokio::test]
    async fn test_pim_registration_is_idempotent() {
        let directory = InMemoryDirectory::new();
        let group = directory
            .create_group(NewGroup::new("SG-x-Owner", "", true))
            .await
            .unwrap();

        assert_eq!(
            directory.register_group_for_pim(&group.id).await.unwrap(),
            PimRegistration::Registered
        );
        assert_eq!(
            directory.register_group_for_pim(&group.id).await.unwrap(),
            PimRegistration::AlreadyRegistered
        );
        assert!(directory.is_pim_registered(&group.id).await);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let directory = InMemoryDirectory::new();
        directory.fail_on("SG-broken").await;

        let result = directory.find_groups_by_name("SG-broken").await;
        assert!(matches!(result, Err(DirectoryError::Unavailable { .. })));

        let other = directory.find_groups_by_name("SG-fine").await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_role_scope_requires_catalog_resource() {
        let directory = InMemoryDirectory::new();
        let catalog = directory.create_catalog("RBAC", "").await.unwrap();
        let group = directory
            .create_group(NewGroup::new("SG-g", "", false))
            .await
            .unwrap();
        let package = directory
            .create_access_package(NewAccessPackage {
                display_name: "AP-g".to_string(),
                description: String::new(),
                catalog_id: catalog.id.clone(),
            })
            .await
            .unwrap();

        let err = directory
            .add_package_role_scope(&package.id, &catalog.id, &group.id, MembershipType::Member)
            .await;
        assert!(err.is_err());

        directory
            .add_group_to_catalog(&catalog.id, &group.id)
            .await
            .unwrap();
        directory
            .add_package_role_scope(&package.id, &catalog.id, &group.id, MembershipType::Member)
            .await
            .unwrap();
        assert_eq!(
            directory
                .package_role_scopes(&package.id, &group.id)
                .await
                .unwrap(),
            vec![MembershipType::Member]
        );
    }

    #[tokio::test]
    async fn test_add_member_reports_existing() {
        let directory = InMemoryDirectory::new();
        let group = directory
            .create_group(NewGroup::new("SG-m", "", false))
            .await
            .unwrap();
        let user = directory.seed_user("ada@example.com", true).await;

        assert!(directory.add_group_member(&group.id, &user.id).await.unwrap());
        assert!(!directory.add_group_member(&group.id, &user.id).await.unwrap());
        assert_eq!(
            directory.list_group_member_ids(&group.id).await.unwrap(),
            vec![user.id]
        );
    }

    #[tokio::test]
    async fn test_default_grants_all_scopes() {
        let directory = InMemoryDirectory::new();
        let scopes = directory.granted_scopes().await.unwrap();
        assert!(scopes.iter().any(|s| s == "Group.ReadWrite.All"));

        directory.set_granted_scopes(&["User.Read"]).await;
        assert_eq!(directory.granted_scopes().await.unwrap(), vec!["User.Read"]);
    }
}
