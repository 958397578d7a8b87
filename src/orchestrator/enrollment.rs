//! Enrollment workflow and membership import.

use super::core::{Orchestrator, record_dependent, record_failure};
use crate::confirm::ConfirmationProvider;
use crate::directory::DirectoryProvider;
use crate::enrollment::{
    EnrollmentMembers, MembershipImport, ensure_enrollment_group, ensure_enrollment_policy,
    ensure_passkey_targets, policy_spec, resolve_authentication_strength,
};
use crate::error::{ProvisionError, ProvisionResult};
use crate::model::Platform;
use crate::prerequisites::{Workflow, ensure_scopes};
use crate::report::{Outcome, ProvisionReport, ResourceKind};
use log::info;
use std::collections::HashMap;

/// Report name of the passkey method configuration.
pub const PASSKEY_METHOD: &str = "passkey (FIDO2)";

impl<D: DirectoryProvider, C: ConfirmationProvider> Orchestrator<D, C> {
    /// Create or reuse the enrollment group and report-only policy of every
    /// platform, then open the passkey method to those groups.
    ///
    /// A missing authentication-strength policy halts the run before any
    /// group is created.
    pub async fn provision_enrollment(&self) -> ProvisionResult<ProvisionReport> {
        ensure_scopes(&self.directory, Workflow::Enrollment).await?;
        let strength =
            resolve_authentication_strength(&self.directory, &self.context.authentication_strength)
                .await?;
        info!(
            "Enrollment policies will require '{}' ({})",
            strength.display_name, strength.id
        );

        let mut report = ProvisionReport::new();
        let mut group_ids = Vec::new();

        for platform in Platform::ALL {
            let group_name = platform.enrollment_group_name();
            let policy_name = platform.enrollment_policy_name();

            let group = match ensure_enrollment_group(&self.directory, platform).await {
                Ok(group) => {
                    report.record(
                        ResourceKind::Group,
                        group_name.as_str(),
                        Some(group.get().id.clone()),
                        group.outcome(),
                        "",
                    );
                    group.into_inner()
                }
                Err(e) => {
                    record_failure(&mut report, ResourceKind::Group, group_name.as_str(), &e);
                    let cause = format!("group '{}' was not provisioned", group_name);
                    record_dependent(
                        &mut report,
                        ResourceKind::ConditionalAccessPolicy,
                        policy_name,
                        &cause,
                    );
                    continue;
                }
            };
            group_ids.push(group.id.clone());

            let spec = policy_spec(platform, &group.id, &strength.id);
            match ensure_enrollment_policy(&self.directory, &spec).await {
                Ok(policy) => {
                    let detail = format!("state {}", policy.get().state.as_str());
                    report.record(
                        ResourceKind::ConditionalAccessPolicy,
                        policy_name,
                        Some(policy.get().id.clone()),
                        policy.outcome(),
                        detail,
                    );
                }
                Err(e) => record_failure(
                    &mut report,
                    ResourceKind::ConditionalAccessPolicy,
                    policy_name,
                    &e,
                ),
            }
        }

        if group_ids.is_empty() {
            record_dependent(
                &mut report,
                ResourceKind::AuthenticationMethod,
                PASSKEY_METHOD,
                "no enrollment group was provisioned",
            );
        } else {
            match ensure_passkey_targets(&self.directory, &group_ids).await {
                Ok(added) => {
                    let outcome = if added.is_empty() {
                        Outcome::Reused
                    } else {
                        Outcome::Updated
                    };
                    report.record(
                        ResourceKind::AuthenticationMethod,
                        PASSKEY_METHOD,
                        None,
                        outcome,
                        format!("{} group(s) added to include targets", added.len()),
                    );
                }
                Err(e) => record_failure(
                    &mut report,
                    ResourceKind::AuthenticationMethod,
                    PASSKEY_METHOD,
                    &e,
                ),
            }
        }

        info!("Enrollment: {}", report.summary());
        Ok(report)
    }

    /// Add the users of a parsed membership CSV to their enrollment groups.
    ///
    /// Groups are looked up, never created; run [`Self::provision_enrollment`]
    /// first.
    pub async fn import_enrollment_membership(
        &self,
        import: &MembershipImport,
    ) -> ProvisionResult<ProvisionReport> {
        ensure_scopes(&self.directory, Workflow::MembershipImport).await?;

        let mut report = ProvisionReport::new();
        for rejected in &import.rejected {
            report.record(
                ResourceKind::GroupMembership,
                format!("line {}: {}", rejected.line, rejected.value),
                None,
                Outcome::Failed,
                rejected.reason.as_str(),
            );
        }
        if import.duplicates > 0 {
            info!("Dropped {} duplicate membership row(s)", import.duplicates);
        }

        let mut groups: HashMap<Platform, Result<EnrollmentMembers, String>> = HashMap::new();
        for row in &import.rows {
            let label = row.label();

            if !groups.contains_key(&row.platform) {
                let resolved = self.resolve_enrollment_group(row.platform).await;
                groups.insert(row.platform, resolved);
            }
            let group = match groups.get_mut(&row.platform) {
                Some(Ok(group)) => group,
                Some(Err(cause)) => {
                    record_dependent(&mut report, ResourceKind::GroupMembership, label, cause);
                    continue;
                }
                None => continue,
            };

            let user = match self.directory.find_user_by_upn(&row.upn).await {
                Ok(Some(user)) => user,
                Ok(None) => {
                    report.record(
                        ResourceKind::GroupMembership,
                        label,
                        None,
                        Outcome::Failed,
                        format!("user '{}' not found", row.upn),
                    );
                    continue;
                }
                Err(e) => {
                    let error =
                        ProvisionError::remote(format!("look up user '{}'", row.upn), e);
                    record_failure(&mut report, ResourceKind::GroupMembership, label, &error);
                    continue;
                }
            };

            match group.ensure_member(&self.directory, &user.id).await {
                Ok(outcome) => report.record(
                    ResourceKind::GroupMembership,
                    label,
                    Some(user.id.clone()),
                    outcome,
                    "",
                ),
                Err(e) => record_failure(&mut report, ResourceKind::GroupMembership, label, &e),
            }
        }

        info!("Membership import: {}", report.summary());
        Ok(report)
    }

    async fn resolve_enrollment_group(&self, platform: Platform) -> Result<EnrollmentMembers, String> {
        let name = platform.enrollment_group_name();
        match self.directory.find_groups_by_name(&name).await {
            Ok(mut found) if !found.is_empty() => {
                EnrollmentMembers::load(&self.directory, found.swap_remove(0))
                    .await
                    .map_err(|e| e.to_string())
            }
            Ok(_) => Err(format!(
                "enrollment group '{}' does not exist; run enrollment first",
                name
            )),
            Err(e) => Err(format!("look up enrollment group '{}': {}", name, e)),
        }
    }
}
