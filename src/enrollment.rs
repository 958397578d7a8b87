//! Phishing-resistant MFA enrollment.
//!
//! For each sign-in platform the rollout needs one enrollment group and one
//! conditional-access policy that requires the configured authentication
//! strength for members of that group on that platform. Policies start in
//! report-only state; enforcing them is a manual decision.
//!
//! Operators then fill the groups from a CSV of `upn,platform` rows, and the
//! passkey (FIDO2) authentication method is opened to every enrollment group.
//!
//! # Example Usage
//!
//! ```rust
//! use identity_provisioner::enrollment::parse_membership_csv;
//! use identity_provisioner::model::Platform;
//!
//! let csv = "upn,platform\nada@example.com,Windows\nADA@example.com, windows\n";
//! let import = parse_membership_csv(csv.as_bytes()).unwrap();
//! assert_eq!(import.rows.len(), 1);
//! assert_eq!(import.rows[0].platform, Platform::Windows);
//! assert_eq!(import.duplicates, 1);
//! ```

use crate::directory::{
    AuthStrengthRecord, ConditionalAccessRecord, DirectoryProvider, GroupRecord, NewGroup,
};
use crate::error::{ProvisionError, ProvisionResult};
use crate::model::{ConditionalAccessSpec, Platform, PolicyState};
use crate::report::Outcome;
use crate::upsert::{Upserted, upsert};
use serde::Deserialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

/// Look up the authentication-strength policy the enrollment policies require.
///
/// The policy is never created here; its absence halts the run.
pub async fn resolve_authentication_strength<D: DirectoryProvider>(
    directory: &D,
    name: &str,
) -> ProvisionResult<AuthStrengthRecord> {
    let mut found = directory
        .find_authentication_strengths(name)
        .await
        .map_err(|e| ProvisionError::remote(format!("look up authentication strength '{}'", name), e))?;

    if found.is_empty() {
        return Err(ProvisionError::prerequisite(
            format!("authentication strength '{}'", name),
            "Create the authentication-strength policy in the tenant or set \
             authentication_strength to an existing one.",
        ));
    }
    Ok(found.swap_remove(0))
}

/// Desired conditional-access policy for one platform.
pub fn policy_spec(platform: Platform, group_id: &str, authentication_strength_id: &str) -> ConditionalAccessSpec {
    ConditionalAccessSpec {
        name: platform.enrollment_policy_name(),
        group_id: group_id.to_string(),
        platform,
        authentication_strength_id: authentication_strength_id.to_string(),
        state: PolicyState::ReportOnly,
    }
}

pub async fn ensure_enrollment_group<D: DirectoryProvider>(
    directory: &D,
    platform: Platform,
) -> ProvisionResult<Upserted<GroupRecord>> {
    let name = platform.enrollment_group_name();
    let description = format!("Phishing-resistant MFA enrollment for {}", platform);
    upsert(
        "group",
        &name,
        directory.find_groups_by_name(&name),
        || directory.create_group(NewGroup::new(&name, description, false)),
    )
    .await
}

/// Create or reuse the policy. An existing policy keeps its state.
pub async fn ensure_enrollment_policy<D: DirectoryProvider>(
    directory: &D,
    spec: &ConditionalAccessSpec,
) -> ProvisionResult<Upserted<ConditionalAccessRecord>> {
    upsert(
        "conditional access policy",
        &spec.name,
        directory.find_conditional_access_policies(&spec.name),
        || directory.create_conditional_access_policy(spec),
    )
    .await
}

/// Add every group in `group_ids` to the passkey method's include targets.
///
/// Returns the groups that were added; an empty list means nothing changed.
pub async fn ensure_passkey_targets<D: DirectoryProvider>(
    directory: &D,
    group_ids: &[String],
) -> ProvisionResult<Vec<String>> {
    let current = directory
        .passkey_method_targets()
        .await
        .map_err(|e| ProvisionError::remote("read passkey method configuration", e))?;

    let missing: Vec<String> = group_ids
        .iter()
        .filter(|id| !current.include_group_ids.contains(id))
        .cloned()
        .collect();
    if missing.is_empty() {
        return Ok(missing);
    }

    directory
        .add_passkey_method_targets(&missing)
        .await
        .map_err(|e| ProvisionError::remote("update passkey method targets", e))?;
    Ok(missing)
}

/// One membership the operator asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MembershipRow {
    pub upn: String,
    pub platform: Platform,
}

impl MembershipRow {
    /// Report name of the membership, e.g. `ada@example.com -> SG-MFA-...`.
    pub fn label(&self) -> String {
        format!("{} -> {}", self.upn, self.platform.enrollment_group_name())
    }
}

/// A CSV row that could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    pub line: usize,
    pub value: String,
    pub reason: String,
}

/// Parsed membership CSV.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipImport {
    pub rows: Vec<MembershipRow>,
    pub rejected: Vec<RejectedRow>,
    /// Rows dropped because an earlier row asked for the same membership.
    pub duplicates: usize,
}

#[derive(Debug, Deserialize)]
struct RawMembershipRow {
    upn: String,
    platform: String,
}

/// Parse `upn,platform` rows.
///
/// Values are trimmed and platforms parsed case-insensitively. Duplicates
/// (same UPN ignoring case, same platform) are dropped here, before any
/// directory lookup.
pub fn parse_membership_csv<R: Read>(input: R) -> ProvisionResult<MembershipImport> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input);

    let mut import = MembershipImport::default();
    let mut seen = HashSet::new();

    for (index, result) in reader.deserialize::<RawMembershipRow>().enumerate() {
        // Header is line 1.
        let line = index + 2;
        let raw = match result {
            Ok(raw) => raw,
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                import.rejected.push(RejectedRow {
                    line,
                    value: String::new(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if raw.upn.is_empty() || !raw.upn.contains('@') {
            import.rejected.push(RejectedRow {
                line,
                value: raw.upn,
                reason: "not a user principal name".to_string(),
            });
            continue;
        }
        let platform = match raw.platform.parse::<Platform>() {
            Ok(platform) => platform,
            Err(reason) => {
                import.rejected.push(RejectedRow {
                    line,
                    value: raw.upn,
                    reason,
                });
                continue;
            }
        };

        if !seen.insert((raw.upn.to_ascii_lowercase(), platform)) {
            log::debug!("Dropping duplicate row {} for {}", line, raw.upn);
            import.duplicates += 1;
            continue;
        }
        import.rows.push(MembershipRow {
            upn: raw.upn,
            platform,
        });
    }

    Ok(import)
}

pub fn read_membership_csv(path: &Path) -> ProvisionResult<MembershipImport> {
    let file = std::fs::File::open(path)?;
    parse_membership_csv(file)
}

/// An enrollment group together with the members it had when loaded.
///
/// Membership import checks this set before calling the directory, so a
/// re-import of the same CSV issues no writes.
#[derive(Debug, Clone)]
pub struct EnrollmentMembers {
    pub group: GroupRecord,
    members: HashSet<String>,
}

impl EnrollmentMembers {
    pub async fn load<D: DirectoryProvider>(directory: &D, group: GroupRecord) -> ProvisionResult<Self> {
        let members = directory
            .list_group_member_ids(&group.id)
            .await
            .map_err(|e| ProvisionError::remote(format!("list members of '{}'", group.display_name), e))?;
        Ok(Self {
            group,
            members: members.into_iter().collect(),
        })
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.members.contains(user_id)
    }

    /// Add `user_id` to the group unless it already is a member.
    pub async fn ensure_member<D: DirectoryProvider>(
        &mut self,
        directory: &D,
        user_id: &str,
    ) -> ProvisionResult<Outcome> {
        if self.contains(user_id) {
            return Ok(Outcome::Reused);
        }
        let added = directory
            .add_group_member(&self.group.id, user_id)
            .await
            .map_err(|e| {
                ProvisionError::remote(format!("add member to '{}'", self.group.display_name), e)
            })?;
        self.members.insert(user_id.to_string());
        Ok(if added { Outcome::Created } else { Outcome::Reused })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;

    #[tokio::test]
    async fn test_members_are_loaded_before_adding() {
        let directory = InMemoryDirectory::new();
        let group = ensure_enrollment_group(&directory, Platform::Ios)
            .await
            .unwrap()
            .into_inner();
        let ada = directory.seed_user("ada@example.com", true).await;
        let grace = directory.seed_user("grace@example.com", true).await;
        directory.add_group_member(&group.id, &ada.id).await.unwrap();
        let writes = directory.journal().await.len();

        let mut members = EnrollmentMembers::load(&directory, group).await.unwrap();
        assert!(members.contains(&ada.id));
        assert!(!members.contains(&grace.id));

        assert_eq!(
            members.ensure_member(&directory, &ada.id).await.unwrap(),
            Outcome::Reused
        );
        assert_eq!(directory.journal().await.len(), writes);

        assert_eq!(
            members.ensure_member(&directory, &grace.id).await.unwrap(),
            Outcome::Created
        );
        assert!(members.contains(&grace.id));
        assert_eq!(
            members.ensure_member(&directory, &grace.id).await.unwrap(),
            Outcome::Reused
        );
    }

    #[test]
    fn test_parse_rejects_bad_rows() {
        let csv = "upn,platform\n\
                   ada@example.com,windows\n\
                   grace@example.com,android\n\
                   not-a-upn,ios\n\
                   linus@example.com,MAC\n";
        let import = parse_membership_csv(csv.as_bytes()).unwrap();

        assert_eq!(import.rows.len(), 2);
        assert_eq!(import.rows[1].platform, Platform::MacOs);
        assert_eq!(import.rejected.len(), 2);
        assert_eq!(import.rejected[0].line, 3);
        assert!(import.rejected[0].reason.contains("android"));
        assert_eq!(import.rejected[1].value, "not-a-upn");
    }

    #[test]
    fn test_parse_dedups_before_lookup() {
        let csv = "upn,platform\n\
                   ada@example.com,Windows\n\
                   ada@example.com,iOS\n\
                   Ada@Example.com ,windows\n";
        let import = parse_membership_csv(csv.as_bytes()).unwrap();
        assert_eq!(import.rows.len(), 2);
        assert_eq!(import.duplicates, 1);
    }

    #[test]
    fn test_read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("members.csv");
        std::fs::write(&path, "upn,platform\nada@example.com,ios\n").unwrap();
        let import = read_membership_csv(&path).unwrap();
        assert_eq!(import.rows[0].label(), "ada@example.com -> SG-MFA-PhishingResistant-iOS");

        assert!(read_membership_csv(&dir.path().join("missing.csv")).is_err());
    }

    #[tokio::test]
    async fn test_missing_strength_is_fatal() {
        let directory = InMemoryDirectory::new();
        let err = resolve_authentication_strength(&directory, "Phishing-resistant MFA")
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_policy_created_report_only_and_reused() {
        let directory = InMemoryDirectory::new();
        let strength = directory
            .seed_authentication_strength("Phishing-resistant MFA")
            .await;
        let group = ensure_enrollment_group(&directory, Platform::Windows)
            .await
            .unwrap()
            .into_inner();
        let spec = policy_spec(Platform::Windows, &group.id, &strength);

        let first = ensure_enrollment_policy(&directory, &spec).await.unwrap();
        let second = ensure_enrollment_policy(&directory, &spec).await.unwrap();

        assert!(first.was_created());
        assert!(!second.was_created());
        assert_eq!(first.get().state, PolicyState::ReportOnly);
        assert_eq!(
            directory
                .conditional_access_spec("CA-PhishingResistant-Windows")
                .await
                .unwrap()
                .group_id,
            group.id
        );
    }

    #[tokio::test]
    async fn test_passkey_targets_only_add_missing() {
        let directory = InMemoryDirectory::new();
        directory
            .add_passkey_method_targets(&["existing".to_string()])
            .await
            .unwrap();

        let ids = vec!["existing".to_string(), "g1".to_string()];
        assert_eq!(
            ensure_passkey_targets(&directory, &ids).await.unwrap(),
            vec!["g1".to_string()]
        );
        assert!(ensure_passkey_targets(&directory, &ids).await.unwrap().is_empty());
        assert_eq!(
            directory.passkey_method_targets().await.unwrap().include_group_ids,
            ids
        );
    }
}
