//! Environment tier classification.
//!
//! Resource names follow a naming convention that embeds the environment as a
//! hyphen-delimited token, e.g. `sub-work-dev-01` or `sub-payments-prod`.
//! [`classify`] turns such a name into a closed [`EnvironmentTier`].
//!
//! # Examples
//!
//! ```rust
//! use identity_provisioner::environment::{EnvironmentTier, classify};
//!
//! assert_eq!(classify("sub-work-dev-01").unwrap(), EnvironmentTier::Dev);
//! assert_eq!(classify("sub-work-prod-01").unwrap(), EnvironmentTier::Prod);
//! assert!(classify("sub-work-01").is_err());
//! ```

use crate::error::{ProvisionError, ProvisionResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Environment tier of a provisioned resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentTier {
    Dev,
    Stg,
    Prod,
}

impl EnvironmentTier {
    /// All tiers, least to most restrictive.
    pub const ALL: [EnvironmentTier; 3] = [
        EnvironmentTier::Dev,
        EnvironmentTier::Stg,
        EnvironmentTier::Prod,
    ];

    /// The token that identifies this tier inside a resource name.
    pub fn token(&self) -> &'static str {
        match self {
            EnvironmentTier::Dev => "dev",
            EnvironmentTier::Stg => "stg",
            EnvironmentTier::Prod => "prod",
        }
    }

    /// The tier used when a name is unmatched and the fallback is restrictive.
    pub fn most_restrictive() -> Self {
        EnvironmentTier::Prod
    }
}

impl fmt::Display for EnvironmentTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// What to do with a name that carries no tier token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnmatchedEnvironment {
    /// Reject the name with [`ProvisionError::UnrecognizedEnvironment`].
    #[default]
    Fail,
    /// Treat the name as production.
    MostRestrictive,
}

/// Tiers whose token appears in `name`, in [`EnvironmentTier::ALL`] order.
fn matching_tiers(name: &str) -> Vec<EnvironmentTier> {
    let lowered = name.to_ascii_lowercase();
    let segments: Vec<&str> = lowered.split('-').collect();

    // The first segment is a resource prefix ("sub", "vm"), never a tier.
    EnvironmentTier::ALL
        .into_iter()
        .filter(|tier| segments.iter().skip(1).any(|s| *s == tier.token()))
        .collect()
}

fn resolve(
    name: &str,
    matched: &[EnvironmentTier],
    fallback: UnmatchedEnvironment,
) -> ProvisionResult<EnvironmentTier> {
    match matched {
        [tier] => Ok(*tier),
        [] if fallback == UnmatchedEnvironment::MostRestrictive => {
            log::warn!(
                "No tier token in '{}', falling back to '{}'",
                name,
                EnvironmentTier::most_restrictive()
            );
            Ok(EnvironmentTier::most_restrictive())
        }
        [] => Err(ProvisionError::UnrecognizedEnvironment {
            name: name.to_string(),
            reason: "expected one of the tokens -dev-, -stg-, -prod-".to_string(),
        }),
        many => Err(ProvisionError::UnrecognizedEnvironment {
            name: name.to_string(),
            reason: format!(
                "ambiguous tier tokens: {}",
                many.iter()
                    .map(|t| t.token())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }),
    }
}

/// Classify a resource name into exactly one tier.
///
/// A tier token matches when it appears between hyphens (`-dev-`) or as the
/// final hyphen-delimited segment (`-dev`). Matching is case-insensitive on
/// the token only. A name containing tokens of two different tiers is
/// rejected because it cannot be assigned exactly one tier.
pub fn classify(name: &str) -> ProvisionResult<EnvironmentTier> {
    resolve(name, &matching_tiers(name), UnmatchedEnvironment::Fail)
}

/// Classify with the configured fallback for unmatched names.
///
/// Ambiguous names are always rejected regardless of the fallback.
pub fn classify_with_fallback(
    name: &str,
    fallback: UnmatchedEnvironment,
) -> ProvisionResult<EnvironmentTier> {
    resolve(name, &matching_tiers(name), fallback)
}
