//! Desired-state model for provisioned resources.
//!
//! These types describe what a workflow wants to exist in the directory. They
//! carry no identifiers; identifiers come back from the directory backend and
//! are recorded in the [`crate::report::ProvisionReport`].
//!
//! # Naming
//!
//! Every resource name is derived from a fixed template so that re-runs look
//! up exactly the same names:
//!
//! | Resource | Template |
//! |---|---|
//! | Role group | `SG-<resource>-<Role>` |
//! | Access package | `AP-<resource>-<Role>` |
//! | Enrollment group | `SG-MFA-PhishingResistant-<Platform>` |
//! | Enrollment policy | `CA-PhishingResistant-<Platform>` |

use crate::environment::EnvironmentTier;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Azure built-in role definition IDs used by the workflows.
pub mod role_definitions {
    pub const READER: &str = "acdd72a7-3385-48ef-bd42-f606fba81ae7";
    pub const CONTRIBUTOR: &str = "b24988ac-6180-42a0-ab88-20f7382dd24c";
    pub const OWNER: &str = "8e3af657-a8ff-443c-a75c-2fe8c4bcb635";
    pub const USER_ACCESS_ADMINISTRATOR: &str = "18d7d88d-d35e-4fb5-a5c3-7773c20a72d9";
    pub const RBAC_ADMINISTRATOR: &str = "f58310d9-a9f6-439a-9e8d-f62e7b41a168";
    pub const VM_USER_LOGIN: &str = "fb879df8-f326-4884-b1cf-06f3ad86be52";
    pub const VM_ADMINISTRATOR_LOGIN: &str = "1c0163c0-47e6-4577-8991-ea5c82e286e4";
}

/// The kind of resource a role group grants access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    Subscription,
    VirtualMachine,
}

/// Privilege level bound to a role group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleKind {
    Reader,
    Contributor,
    Owner,
    /// VM login as a standard user.
    Users,
    /// VM login as a local administrator.
    Admins,
}

impl RoleKind {
    /// Roles provisioned for a target kind, in provisioning order.
    pub fn for_target(target: TargetKind) -> &'static [RoleKind] {
        match target {
            TargetKind::Subscription => &[RoleKind::Reader, RoleKind::Contributor, RoleKind::Owner],
            TargetKind::VirtualMachine => &[RoleKind::Users, RoleKind::Admins],
        }
    }

    /// Azure RBAC role definition bound to this role.
    pub fn role_definition_id(&self) -> &'static str {
        match self {
            RoleKind::Reader => role_definitions::READER,
            RoleKind::Contributor => role_definitions::CONTRIBUTOR,
            RoleKind::Owner => role_definitions::OWNER,
            RoleKind::Users => role_definitions::VM_USER_LOGIN,
            RoleKind::Admins => role_definitions::VM_ADMINISTRATOR_LOGIN,
        }
    }

    /// Whether the group for this role is privileged in the given tier.
    ///
    /// Privileged groups are created role-assignable and registered for PIM.
    pub fn is_privileged(&self, tier: Option<EnvironmentTier>) -> bool {
        match self {
            RoleKind::Owner | RoleKind::Admins => true,
            RoleKind::Contributor => tier == Some(EnvironmentTier::Prod),
            RoleKind::Reader | RoleKind::Users => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKind::Reader => "Reader",
            RoleKind::Contributor => "Contributor",
            RoleKind::Owner => "Owner",
            RoleKind::Users => "Users",
            RoleKind::Admins => "Admins",
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A security group bound to one role on one target resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGroupSpec {
    pub name: String,
    pub description: String,
    pub role: RoleKind,
    pub privileged: bool,
}

impl RoleGroupSpec {
    pub fn new(resource: &str, role: RoleKind, tier: Option<EnvironmentTier>) -> Self {
        Self {
            name: role_group_name(resource, role),
            description: format!("{} access to {}", role, resource),
            role,
            privileged: role.is_privileged(tier),
        }
    }
}

/// Role group name for a target resource.
pub fn role_group_name(resource: &str, role: RoleKind) -> String {
    format!("SG-{}-{}", resource, role)
}

/// Access package name for a target resource.
pub fn access_package_name(resource: &str, role: RoleKind) -> String {
    format!("AP-{}-{}", resource, role)
}

/// How a package grants membership in its role group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MembershipType {
    /// Always-active membership.
    Member,
    /// Membership that must be activated through PIM.
    EligibleMember,
}

impl MembershipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipType::Member => "Member",
            MembershipType::EligibleMember => "Eligible Member",
        }
    }
}

/// Lifetime of an access package assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessDuration {
    Months(u32),
    Hours(u32),
}

impl AccessDuration {
    /// ISO 8601 duration, as expected by entitlement-management policies.
    pub fn iso8601(&self) -> String {
        match self {
            AccessDuration::Months(m) => format!("P{}M", m),
            AccessDuration::Hours(h) => format!("PT{}H", h),
        }
    }
}

impl fmt::Display for AccessDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessDuration::Months(1) => f.write_str("1 month"),
            AccessDuration::Months(m) => write!(f, "{} months", m),
            AccessDuration::Hours(1) => f.write_str("1 hour"),
            AccessDuration::Hours(h) => write!(f, "{} hours", h),
        }
    }
}

/// One approval stage of a request policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ApprovalStage {
    /// The requestor's manager approves.
    Manager,
    /// Any member of the given group approves.
    Team { group_id: String },
}

/// A request policy attached to an access package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySpec {
    pub name: String,
    pub duration: AccessDuration,
    pub membership: MembershipType,
    pub approval_stages: Vec<ApprovalStage>,
    pub extensible: bool,
}

/// A requestable bundle granting membership in one role group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPackageSpec {
    pub name: String,
    pub description: String,
    pub role: RoleKind,
    pub membership: MembershipType,
    pub policies: Vec<PolicySpec>,
}

/// Sign-in platform targeted by an enrollment policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    Windows,
    #[serde(rename = "iOS")]
    Ios,
    #[serde(rename = "macOS")]
    MacOs,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Windows, Platform::Ios, Platform::MacOs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "Windows",
            Platform::Ios => "iOS",
            Platform::MacOs => "macOS",
        }
    }

    /// Platform value used by conditional-access conditions.
    pub fn device_platform(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Ios => "iOS",
            Platform::MacOs => "macOS",
        }
    }

    pub fn enrollment_group_name(&self) -> String {
        format!("SG-MFA-PhishingResistant-{}", self.as_str())
    }

    pub fn enrollment_policy_name(&self) -> String {
        format!("CA-PhishingResistant-{}", self.as_str())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "windows" => Ok(Platform::Windows),
            "ios" => Ok(Platform::Ios),
            "macos" | "mac" => Ok(Platform::MacOs),
            other => Err(format!("unknown platform '{}'", other)),
        }
    }
}

/// Conditional-access policy state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyState {
    #[serde(rename = "enabledForReportingButNotEnforced")]
    ReportOnly,
    #[serde(rename = "enabled")]
    Enforced,
    #[serde(rename = "disabled")]
    Disabled,
}

impl PolicyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyState::ReportOnly => "enabledForReportingButNotEnforced",
            PolicyState::Enforced => "enabled",
            PolicyState::Disabled => "disabled",
        }
    }
}

/// A conditional-access policy gating sign-in for one enrollment group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalAccessSpec {
    pub name: String,
    pub group_id: String,
    pub platform: Platform,
    pub authentication_strength_id: String,
    pub state: PolicyState,
}
