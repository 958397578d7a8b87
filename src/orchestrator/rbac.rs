//! Subscription and virtual-machine role provisioning.
//!
//! For each role of the target the fixed order is: group, PIM registration,
//! role assignment, catalog resource, access package, role binding, request
//! policies.

use super::core::{Orchestrator, record_dependent, record_failure};
use crate::abac::ensure_role_assignment;
use crate::access_package::{
    compose, ensure_access_package, ensure_catalog, ensure_catalog_resource, ensure_policy,
    ensure_role_scope,
};
use crate::confirm::ConfirmationProvider;
use crate::directory::{CatalogRecord, DirectoryProvider, GroupRecord, NewGroup};
use crate::environment::{EnvironmentTier, classify_with_fallback};
use crate::error::{ProvisionError, ProvisionResult};
use crate::model::{AccessPackageSpec, MembershipType, RoleGroupSpec, RoleKind, TargetKind};
use crate::pim::register_if_privileged;
use crate::prerequisites::{Workflow, ensure_scopes};
use crate::report::{ProvisionReport, ResourceKind};
use crate::upsert::{Upserted, upsert};
use log::info;

impl<D: DirectoryProvider, C: ConfirmationProvider> Orchestrator<D, C> {
    /// Provision Reader, Contributor and Owner access to a subscription.
    ///
    /// The tier is classified from `name` first; an unrecognized name fails
    /// before anything is looked up or created.
    pub async fn provision_subscription(
        &self,
        name: &str,
        scope: &str,
    ) -> ProvisionResult<ProvisionReport> {
        let tier = classify_with_fallback(name, self.context.unmatched_environment)?;
        info!("Provisioning subscription '{}' as {}", name, tier);
        self.provision_target(
            TargetKind::Subscription,
            name,
            scope,
            Some(tier),
            Workflow::SubscriptionRbac,
        )
        .await
    }

    /// Provision Users and Admins login access to a virtual machine.
    pub async fn provision_virtual_machine(
        &self,
        name: &str,
        scope: &str,
    ) -> ProvisionResult<ProvisionReport> {
        info!("Provisioning virtual machine '{}'", name);
        self.provision_target(
            TargetKind::VirtualMachine,
            name,
            scope,
            None,
            Workflow::VirtualMachineRbac,
        )
        .await
    }

    async fn provision_target(
        &self,
        target: TargetKind,
        resource: &str,
        scope: &str,
        tier: Option<EnvironmentTier>,
        workflow: Workflow,
    ) -> ProvisionResult<ProvisionReport> {
        let scope = normalize_scope(scope);
        validate_scope(target, scope)?;
        ensure_scopes(&self.directory, workflow).await?;

        // Composition can fail on configuration; do it before any mutation.
        let packages = RoleKind::for_target(target)
            .iter()
            .map(|role| {
                compose(
                    resource,
                    target,
                    tier,
                    *role,
                    self.context.vm_team_approver_group_id.as_deref(),
                )
            })
            .collect::<ProvisionResult<Vec<AccessPackageSpec>>>()?;

        let mut report = ProvisionReport::new();

        let catalog_name = &self.context.catalog_name;
        let catalog = match ensure_catalog(&self.directory, catalog_name).await {
            Ok(catalog) => {
                report.record(
                    ResourceKind::Catalog,
                    catalog_name.as_str(),
                    Some(catalog.get().id.clone()),
                    catalog.outcome(),
                    "",
                );
                Some(catalog.into_inner())
            }
            Err(e) => {
                record_failure(&mut report, ResourceKind::Catalog, catalog_name.as_str(), &e);
                None
            }
        };

        for package in &packages {
            let spec = RoleGroupSpec::new(resource, package.role, tier);
            self.provision_role(&spec, scope, package, catalog.as_ref(), &mut report)
                .await;
        }

        info!("Provisioned '{}': {}", resource, report.summary());
        Ok(report)
    }

    async fn provision_role(
        &self,
        spec: &RoleGroupSpec,
        scope: &str,
        package: &AccessPackageSpec,
        catalog: Option<&CatalogRecord>,
        report: &mut ProvisionReport,
    ) {
        let assignment_name = format!("{}@{}", spec.name, scope);

        let group = match self.ensure_role_group(spec).await {
            Ok(group) => {
                let detail = if spec.privileged { "role-assignable" } else { "" };
                report.record(
                    ResourceKind::Group,
                    spec.name.as_str(),
                    Some(group.get().id.clone()),
                    group.outcome(),
                    detail,
                );
                group.into_inner()
            }
            Err(e) => {
                record_failure(report, ResourceKind::Group, spec.name.as_str(), &e);
                let cause = format!("group '{}' was not provisioned", spec.name);
                record_dependent(report, ResourceKind::RoleAssignment, assignment_name, &cause);
                record_dependent(report, ResourceKind::AccessPackage, package.name.as_str(), &cause);
                return;
            }
        };

        let pim_ok = match register_if_privileged(&self.directory, spec, &group).await {
            Ok(Some(outcome)) => {
                report.record(
                    ResourceKind::PimRegistration,
                    spec.name.as_str(),
                    Some(group.id.clone()),
                    outcome,
                    "",
                );
                true
            }
            Ok(None) => true,
            Err(e) => {
                record_failure(report, ResourceKind::PimRegistration, spec.name.as_str(), &e);
                false
            }
        };

        match ensure_role_assignment(
            &self.directory,
            &self.confirmation,
            &group.id,
            spec.role.role_definition_id(),
            scope,
        )
        .await
        {
            Ok(assignments) => {
                for enforced in assignments {
                    report.record(
                        ResourceKind::RoleAssignment,
                        assignment_name.as_str(),
                        Some(enforced.assignment.id),
                        enforced.outcome,
                        enforced.detail,
                    );
                }
            }
            Err(e) => record_failure(report, ResourceKind::RoleAssignment, assignment_name, &e),
        }

        let Some(catalog) = catalog else {
            let cause = format!("catalog '{}' is unavailable", self.context.catalog_name);
            record_dependent(report, ResourceKind::AccessPackage, package.name.as_str(), &cause);
            return;
        };
        self.provision_package(spec, &group, package, catalog, pim_ok, report)
            .await;
    }

    async fn ensure_role_group(
        &self,
        spec: &RoleGroupSpec,
    ) -> ProvisionResult<Upserted<GroupRecord>> {
        upsert(
            "group",
            &spec.name,
            self.directory.find_groups_by_name(&spec.name),
            || {
                self.directory.create_group(NewGroup::new(
                    &spec.name,
                    &spec.description,
                    spec.privileged,
                ))
            },
        )
        .await
    }

    async fn provision_package(
        &self,
        spec: &RoleGroupSpec,
        group: &GroupRecord,
        package: &AccessPackageSpec,
        catalog: &CatalogRecord,
        pim_ok: bool,
        report: &mut ProvisionReport,
    ) {
        let resource_name = format!("{} in {}", spec.name, catalog.display_name);
        let in_catalog = match ensure_catalog_resource(&self.directory, catalog, &group.id).await {
            Ok(outcome) => {
                report.record(
                    ResourceKind::CatalogResource,
                    resource_name.as_str(),
                    Some(group.id.clone()),
                    outcome,
                    "",
                );
                true
            }
            Err(e) => {
                record_failure(report, ResourceKind::CatalogResource, resource_name.as_str(), &e);
                false
            }
        };

        let record = match ensure_access_package(&self.directory, catalog, package).await {
            Ok(upserted) => {
                report.record(
                    ResourceKind::AccessPackage,
                    package.name.as_str(),
                    Some(upserted.get().id.clone()),
                    upserted.outcome(),
                    package.membership.as_str(),
                );
                upserted.into_inner()
            }
            Err(e) => {
                record_failure(report, ResourceKind::AccessPackage, package.name.as_str(), &e);
                let cause = format!("access package '{}' was not provisioned", package.name);
                for policy in &package.policies {
                    record_dependent(
                        report,
                        ResourceKind::AssignmentPolicy,
                        policy_label(package, &policy.name),
                        &cause,
                    );
                }
                return;
            }
        };

        let binding_name = format!("{} -> {}", package.name, spec.name);
        if !in_catalog {
            let cause = format!("'{}' is not a catalog resource", spec.name);
            record_dependent(report, ResourceKind::PackageRoleScope, binding_name, &cause);
        } else if package.membership == MembershipType::EligibleMember && !pim_ok {
            let cause = format!("PIM registration of '{}' failed", spec.name);
            record_dependent(report, ResourceKind::PackageRoleScope, binding_name, &cause);
        } else {
            match ensure_role_scope(&self.directory, &record, catalog, &group.id, package.membership)
                .await
            {
                Ok((outcome, detail)) => report.record(
                    ResourceKind::PackageRoleScope,
                    binding_name,
                    Some(group.id.clone()),
                    outcome,
                    detail,
                ),
                Err(e) => record_failure(report, ResourceKind::PackageRoleScope, binding_name, &e),
            }
        }

        for policy in &package.policies {
            let label = policy_label(package, &policy.name);
            match ensure_policy(&self.directory, &record, policy).await {
                Ok(upserted) => report.record(
                    ResourceKind::AssignmentPolicy,
                    label,
                    Some(upserted.get().id.clone()),
                    upserted.outcome(),
                    policy.duration.iso8601(),
                ),
                Err(e) => record_failure(report, ResourceKind::AssignmentPolicy, label, &e),
            }
        }
    }
}

fn policy_label(package: &AccessPackageSpec, policy_name: &str) -> String {
    format!("{}: {}", package.name, policy_name)
}

/// Resource ids never end in `/`; drop one so lookups compare equal.
fn normalize_scope(scope: &str) -> &str {
    scope.trim().trim_end_matches('/')
}

/// Reject scopes that cannot belong to the target kind.
fn validate_scope(target: TargetKind, scope: &str) -> ProvisionResult<()> {
    let lowered = scope.to_ascii_lowercase();
    let valid = match target {
        TargetKind::Subscription => crate::abac::is_subscription_scope(scope),
        TargetKind::VirtualMachine => {
            lowered.starts_with("/subscriptions/")
                && lowered.contains("/providers/microsoft.compute/virtualmachines/")
        }
    };
    if valid {
        Ok(())
    } else {
        Err(ProvisionError::InvalidInput {
            message: format!("'{}' is not a {:?} scope", scope, target),
        })
    }
}
