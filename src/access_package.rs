//! Access-package composition and catalog plumbing.
//!
//! [`compose`] turns a (target, tier, role) triple into the desired package
//! and its request policies. The policy table:
//!
//! | Target | Role | Tier | Membership | Durations |
//! |---|---|---|---|---|
//! | Subscription | Reader | any | Member | 1, 3, 6 months |
//! | Subscription | Contributor | dev, stg | Member | 1, 3, 6 months |
//! | Subscription | Contributor | prod | Eligible Member | 1, 3, 6 months |
//! | Subscription | Owner | any | Eligible Member | 8 hours |
//! | Virtual machine | Users | n/a | Member | 1, 6, 12 months |
//! | Virtual machine | Admins | n/a | Member | 1 month, not extensible |
//!
//! Every policy requires manager approval. Virtual-machine policies add a
//! second stage approved by the VM team group.
//!
//! The `ensure_*` functions below reconcile those specs against the
//! directory one object at a time and never delete anything.

use crate::directory::{
    AccessPackageRecord, CatalogRecord, DirectoryProvider, NewAccessPackage, PolicyRecord,
};
use crate::environment::EnvironmentTier;
use crate::error::{ProvisionError, ProvisionResult};
use crate::model::{
    AccessDuration, AccessPackageSpec, ApprovalStage, MembershipType, PolicySpec, RoleKind,
    TargetKind, access_package_name,
};
use crate::report::Outcome;
use crate::upsert::{Upserted, upsert};

const ONE_THREE_SIX_MONTHS: &[AccessDuration] = &[
    AccessDuration::Months(1),
    AccessDuration::Months(3),
    AccessDuration::Months(6),
];
const ONE_SIX_TWELVE_MONTHS: &[AccessDuration] = &[
    AccessDuration::Months(1),
    AccessDuration::Months(6),
    AccessDuration::Months(12),
];
const EIGHT_HOURS: &[AccessDuration] = &[AccessDuration::Hours(8)];
const ONE_MONTH: &[AccessDuration] = &[AccessDuration::Months(1)];

/// Membership type, durations and extensibility for one row of the table.
fn policy_row(
    target: TargetKind,
    tier: Option<EnvironmentTier>,
    role: RoleKind,
) -> Option<(MembershipType, &'static [AccessDuration], bool)> {
    use MembershipType::{EligibleMember, Member};

    match (target, role) {
        (TargetKind::Subscription, RoleKind::Reader) => Some((Member, ONE_THREE_SIX_MONTHS, true)),
        (TargetKind::Subscription, RoleKind::Contributor) => {
            let membership = if tier == Some(EnvironmentTier::Prod) {
                EligibleMember
            } else {
                Member
            };
            Some((membership, ONE_THREE_SIX_MONTHS, true))
        }
        (TargetKind::Subscription, RoleKind::Owner) => {
            Some((EligibleMember, EIGHT_HOURS, true))
        }
        (TargetKind::VirtualMachine, RoleKind::Users) => {
            Some((Member, ONE_SIX_TWELVE_MONTHS, true))
        }
        (TargetKind::VirtualMachine, RoleKind::Admins) => {
            Some((Member, ONE_MONTH, false))
        }
        _ => None,
    }
}

/// Name of a request policy, e.g. `Owner - 8 hours`.
pub fn policy_name(role: RoleKind, duration: AccessDuration) -> String {
    format!("{} - {}", role, duration)
}

/// Build the desired access package for one role group.
///
/// Virtual-machine packages need the team approver group; without it the
/// package cannot be composed and a prerequisite error is returned.
pub fn compose(
    resource: &str,
    target: TargetKind,
    tier: Option<EnvironmentTier>,
    role: RoleKind,
    team_approver_group_id: Option<&str>,
) -> ProvisionResult<AccessPackageSpec> {
    let (membership, durations, extensible) =
        policy_row(target, tier, role).ok_or_else(|| ProvisionError::InvalidInput {
            message: format!("role {} does not apply to {:?} targets", role, target),
        })?;

    let mut approval_stages = vec![ApprovalStage::Manager];
    if target == TargetKind::VirtualMachine {
        let group_id = team_approver_group_id.ok_or_else(|| {
            ProvisionError::prerequisite(
                "VM team approver group",
                "Set vm_team_approver_group_id in the configuration or pass --vm-team-approver.",
            )
        })?;
        approval_stages.push(ApprovalStage::Team {
            group_id: group_id.to_string(),
        });
    }

    let policies = durations
        .iter()
        .map(|duration| PolicySpec {
            name: policy_name(role, *duration),
            duration: *duration,
            membership,
            approval_stages: approval_stages.clone(),
            extensible,
        })
        .collect();

    Ok(AccessPackageSpec {
        name: access_package_name(resource, role),
        description: format!("Request {} access to {}", role, resource),
        role,
        membership,
        policies,
    })
}

pub async fn ensure_catalog<D: DirectoryProvider>(
    directory: &D,
    name: &str,
) -> ProvisionResult<Upserted<CatalogRecord>> {
    upsert(
        "catalog",
        name,
        directory.find_catalogs_by_name(name),
        || directory.create_catalog(name, "Role-based access packages"),
    )
    .await
}

/// Add the group to the catalog's resources if it is not there yet.
pub async fn ensure_catalog_resource<D: DirectoryProvider>(
    directory: &D,
    catalog: &CatalogRecord,
    group_id: &str,
) -> ProvisionResult<Outcome> {
    let present = directory
        .catalog_has_group(&catalog.id, group_id)
        .await
        .map_err(|e| {
            ProvisionError::remote(format!("read resources of catalog '{}'", catalog.display_name), e)
        })?;
    if present {
        return Ok(Outcome::Reused);
    }

    directory
        .add_group_to_catalog(&catalog.id, group_id)
        .await
        .map_err(|e| {
            ProvisionError::remote(format!("add group to catalog '{}'", catalog.display_name), e)
        })?;
    Ok(Outcome::Created)
}

pub async fn ensure_access_package<D: DirectoryProvider>(
    directory: &D,
    catalog: &CatalogRecord,
    spec: &AccessPackageSpec,
) -> ProvisionResult<Upserted<AccessPackageRecord>> {
    upsert(
        "access package",
        &spec.name,
        directory.find_access_packages_by_name(&catalog.id, &spec.name),
        || {
            directory.create_access_package(NewAccessPackage {
                display_name: spec.name.clone(),
                description: spec.description.clone(),
                catalog_id: catalog.id.clone(),
            })
        },
    )
    .await
}

/// Bind the group to the package with exactly `membership`.
///
/// A binding with a different membership type is left in place and reported
/// in the returned detail; it is never removed.
pub async fn ensure_role_scope<D: DirectoryProvider>(
    directory: &D,
    package: &AccessPackageRecord,
    catalog: &CatalogRecord,
    group_id: &str,
    membership: MembershipType,
) -> ProvisionResult<(Outcome, String)> {
    let bound = directory
        .package_role_scopes(&package.id, group_id)
        .await
        .map_err(|e| {
            ProvisionError::remote(format!("read role scopes of '{}'", package.display_name), e)
        })?;

    if bound.contains(&membership) {
        return Ok((Outcome::Reused, membership.as_str().to_string()));
    }

    directory
        .add_package_role_scope(&package.id, &catalog.id, group_id, membership)
        .await
        .map_err(|e| {
            ProvisionError::remote(
                format!("bind {} role to '{}'", membership.as_str(), package.display_name),
                e,
            )
        })?;

    let detail = match bound.first() {
        Some(other) => {
            log::warn!(
                "'{}' also grants {} membership; left in place",
                package.display_name,
                other.as_str()
            );
            format!("{} (existing {} binding left in place)", membership.as_str(), other.as_str())
        }
        None => membership.as_str().to_string(),
    };
    Ok((Outcome::Created, detail))
}

pub async fn ensure_policy<D: DirectoryProvider>(
    directory: &D,
    package: &AccessPackageRecord,
    policy: &PolicySpec,
) -> ProvisionResult<Upserted<PolicyRecord>> {
    upsert(
        "assignment policy",
        &policy.name,
        directory.find_policies_by_name(&package.id, &policy.name),
        || directory.create_policy(&package.id, policy),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{InMemoryDirectory, NewGroup};

    fn durations(spec: &AccessPackageSpec) -> Vec<AccessDuration> {
        spec.policies.iter().map(|p| p.duration).collect()
    }

    #[test]
    fn test_contributor_membership_follows_tier() {
        let dev = compose(
            "sub-work-dev-01",
            TargetKind::Subscription,
            Some(EnvironmentTier::Dev),
            RoleKind::Contributor,
            None,
        )
        .unwrap();
        assert_eq!(dev.membership, MembershipType::Member);
        assert_eq!(durations(&dev), ONE_THREE_SIX_MONTHS.to_vec());

        let prod = compose(
            "sub-work-prod-01",
            TargetKind::Subscription,
            Some(EnvironmentTier::Prod),
            RoleKind::Contributor,
            None,
        )
        .unwrap();
        assert_eq!(prod.membership, MembershipType::EligibleMember);
        assert_eq!(durations(&prod), ONE_THREE_SIX_MONTHS.to_vec());
        assert_eq!(prod.name, "AP-sub-work-prod-01-Contributor");
    }

    #[test]
    fn test_subscription_table_for_every_tier() {
        use AccessDuration::{Hours, Months};
        use EnvironmentTier::{Dev, Prod, Stg};
        use MembershipType::{EligibleMember, Member};

        let months = vec![Months(1), Months(3), Months(6)];
        let expected = [
            (Dev, RoleKind::Reader, Member, months.clone()),
            (Dev, RoleKind::Contributor, Member, months.clone()),
            (Dev, RoleKind::Owner, EligibleMember, vec![Hours(8)]),
            (Stg, RoleKind::Reader, Member, months.clone()),
            (Stg, RoleKind::Contributor, Member, months.clone()),
            (Stg, RoleKind::Owner, EligibleMember, vec![Hours(8)]),
            (Prod, RoleKind::Reader, Member, months.clone()),
            (Prod, RoleKind::Contributor, EligibleMember, months.clone()),
            (Prod, RoleKind::Owner, EligibleMember, vec![Hours(8)]),
        ];
        assert_eq!(expected.len(), EnvironmentTier::ALL.len() * 3);

        for (tier, role, membership, expected_durations) in expected {
            let spec = compose("sub-x", TargetKind::Subscription, Some(tier), role, None)
                .unwrap();
            assert_eq!(spec.membership, membership, "{tier:?} {role:?}");
            assert_eq!(durations(&spec), expected_durations, "{tier:?} {role:?}");
            assert!(
                spec.policies.iter().all(|p| p.membership == membership
                    && p.extensible
                    && p.approval_stages == vec![ApprovalStage::Manager]),
                "{tier:?} {role:?}"
            );
        }
    }

    #[test]
    fn test_owner_is_eight_hours_in_every_tier() {
        for tier in EnvironmentTier::ALL {
            let spec = compose(
                "sub-x",
                TargetKind::Subscription,
                Some(tier),
                RoleKind::Owner,
                None,
            )
            .unwrap();
            assert_eq!(spec.membership, MembershipType::EligibleMember);
            assert_eq!(durations(&spec), vec![AccessDuration::Hours(8)]);
            assert_eq!(spec.policies[0].name, "Owner - 8 hours");
            assert_eq!(spec.policies[0].approval_stages, vec![ApprovalStage::Manager]);
        }
    }

    #[test]
    fn test_vm_policies_have_team_stage() {
        let users = compose(
            "vm-webapp-01",
            TargetKind::VirtualMachine,
            None,
            RoleKind::Users,
            Some("team"),
        )
        .unwrap();
        assert_eq!(durations(&users), ONE_SIX_TWELVE_MONTHS.to_vec());
        assert!(users.policies.iter().all(|p| p.extensible));

        let admins = compose(
            "vm-webapp-01",
            TargetKind::VirtualMachine,
            None,
            RoleKind::Admins,
            Some("team"),
        )
        .unwrap();
        assert_eq!(admins.policies.len(), 1);
        assert_eq!(admins.policies[0].duration, AccessDuration::Months(1));
        assert!(!admins.policies[0].extensible);
        assert_eq!(
            admins.policies[0].approval_stages,
            vec![
                ApprovalStage::Manager,
                ApprovalStage::Team {
                    group_id: "team".to_string()
                }
            ]
        );
    }

    #[test]
    fn test_vm_without_team_approver_is_prerequisite() {
        let err = compose(
            "vm-webapp-01",
            TargetKind::VirtualMachine,
            None,
            RoleKind::Users,
            None,
        )
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_role_must_match_target() {
        let err = compose("vm-a", TargetKind::VirtualMachine, None, RoleKind::Owner, Some("t"))
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_package_reconciliation_is_idempotent() {
        let directory = InMemoryDirectory::new();
        let group = directory
            .create_group(NewGroup::new("SG-sub-a-dev-01-Reader", "", false))
            .await
            .unwrap();
        let spec = compose(
            "sub-a-dev-01",
            TargetKind::Subscription,
            Some(EnvironmentTier::Dev),
            RoleKind::Reader,
            None,
        )
        .unwrap();

        for round in 0..2 {
            let catalog = ensure_catalog(&directory, "RBAC Access").await.unwrap().into_inner();
            let resource = ensure_catalog_resource(&directory, &catalog, &group.id)
                .await
                .unwrap();
            let package = ensure_access_package(&directory, &catalog, &spec).await.unwrap();
            let (scope, _) = ensure_role_scope(
                &directory,
                package.get(),
                &catalog,
                &group.id,
                spec.membership,
            )
            .await
            .unwrap();
            for policy in &spec.policies {
                let upserted = ensure_policy(&directory, package.get(), policy).await.unwrap();
                assert_eq!(upserted.was_created(), round == 0);
            }

            let expected = if round == 0 { Outcome::Created } else { Outcome::Reused };
            assert_eq!(resource, expected);
            assert_eq!(scope, expected);
            assert_eq!(package.outcome(), expected);
        }

        let stats = directory.stats().await;
        assert_eq!(stats.catalogs, 1);
        assert_eq!(stats.access_packages, 1);
        assert_eq!(stats.policies, 3);
    }
}
