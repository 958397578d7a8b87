//! Identity-platform provisioning for Rust.
//!
//! Idempotent RBAC group, access-package and phishing-resistant MFA
//! provisioning against a cloud identity directory, plus HR-driven account
//! onboarding and offboarding.
//!
//! # Core Components
//!
//! - [`Orchestrator`] - Runs the workflows and produces a [`ProvisionReport`]
//! - [`DirectoryProvider`] - Trait for directory backends
//! - [`ConfirmationProvider`] - Operator consent for security-sensitive changes
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use identity_provisioner::{Orchestrator, ProvisionContext};
//! use identity_provisioner::confirm::AutoDecline;
//! use identity_provisioner::directory::InMemoryDirectory;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::new(
//!     InMemoryDirectory::new(),
//!     AutoDecline,
//!     ProvisionContext::default(),
//! );
//! let report = orchestrator
//!     .provision_subscription("sub-work-prod-01", "/subscriptions/00000000-0000-0000-0000-000000000002")
//!     .await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod abac;
pub mod access_package;
pub mod config;
pub mod confirm;
pub mod context;
pub mod directory;
pub mod enrollment;
pub mod environment;
pub mod error;
pub mod hr_sync;
pub mod model;
pub mod orchestrator;
pub mod pim;
pub mod prerequisites;
pub mod report;
pub mod upsert;

// Re-export commonly used types for convenience
pub use config::Config;
pub use confirm::ConfirmationProvider;
pub use context::ProvisionContext;
pub use directory::{DirectoryError, DirectoryProvider};
pub use environment::{EnvironmentTier, UnmatchedEnvironment, classify};
pub use error::{ProvisionError, ProvisionResult};
pub use orchestrator::Orchestrator;
pub use report::{Outcome, ProvisionReport, ReportEntry, ResourceKind};
pub use upsert::{Upserted, upsert};
