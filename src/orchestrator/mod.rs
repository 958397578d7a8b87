//! Provisioning orchestrator.
//!
//! The orchestrator runs the workflows against one directory backend, asking
//! one [`ConfirmationProvider`] before security-sensitive changes, and returns
//! a [`ProvisionReport`] describing every step.
//!
//! # Module Organization
//!
//! * [`core`] - The [`Orchestrator`] struct and shared recording helpers
//! * [`rbac`] - Subscription and virtual-machine role provisioning
//! * [`enrollment`] - Enrollment groups, policies and membership import
//! * [`hr`] - HR onboarding and offboarding
//!
//! # Failure handling
//!
//! Fatal errors (missing prerequisites, unrecognized environments) are
//! returned as `Err` before anything is created. Every other failure is
//! recorded as [`Outcome::Failed`](crate::report::Outcome::Failed) and the
//! run continues with the next independent resource; steps that depend on a
//! failed one are recorded as failed too, with the cause.
//!
//! # Example Usage
//!
//! ```rust
//! use identity_provisioner::confirm::AutoDecline;
//! use identity_provisioner::context::ProvisionContext;
//! use identity_provisioner::directory::InMemoryDirectory;
//! use identity_provisioner::orchestrator::Orchestrator;
//! use identity_provisioner::report::Outcome;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::new(
//!     InMemoryDirectory::new(),
//!     AutoDecline,
//!     ProvisionContext::default(),
//! );
//! let report = orchestrator
//!     .provision_subscription("sub-work-dev-01", "/subscriptions/00000000-0000-0000-0000-000000000001")
//!     .await?;
//! assert_eq!(report.count(Outcome::Failed), 0);
//! # Ok(())
//! # }
//! ```
//!
//! [`ConfirmationProvider`]: crate::confirm::ConfirmationProvider
//! [`ProvisionReport`]: crate::report::ProvisionReport

pub mod core;
pub mod enrollment;
pub mod hr;
pub mod rbac;

#[cfg(test)]
mod tests;

pub use self::core::Orchestrator;
