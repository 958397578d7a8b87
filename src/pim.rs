//! Role-eligibility (PIM) registration for privileged groups.

use crate::directory::{DirectoryProvider, GroupRecord, PimRegistration};
use crate::error::{ProvisionError, ProvisionResult};
use crate::model::RoleGroupSpec;
use crate::report::Outcome;

/// Register `group` for PIM when its spec is privileged.
///
/// Returns `None` for non-privileged groups, which are never registered.
/// A group that was registered before comes back as [`Outcome::Reused`].
pub async fn register_if_privileged<D: DirectoryProvider>(
    directory: &D,
    spec: &RoleGroupSpec,
    group: &GroupRecord,
) -> ProvisionResult<Option<Outcome>> {
    if !spec.privileged {
        log::debug!("'{}' is not privileged; skipping PIM registration", spec.name);
        return Ok(None);
    }

    let registration = directory
        .register_group_for_pim(&group.id)
        .await
        .map_err(|e| ProvisionError::remote(format!("register '{}' for PIM", spec.name), e))?;

    Ok(Some(match registration {
        PimRegistration::Registered => Outcome::Created,
        PimRegistration::AlreadyRegistered => Outcome::Reused,
    }))
}
