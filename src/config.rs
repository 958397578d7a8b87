//! Configuration file loading.
//!
//! Configuration is a TOML file where every key is optional:
//!
//! ```toml
//! tenant_id = "00000000-0000-0000-0000-000000000000"
//! catalog_name = "RBAC Access"
//! vm_team_approver_group_id = "11111111-1111-1111-1111-111111111111"
//! authentication_strength = "Phishing-resistant MFA"
//! output_dir = "./output"
//! unmatched_environment = "fail"
//! hr_onboarding_window_days = 14
//! ```
//!
//! CLI flags override file values; see `src/bin/idprov.rs`.

use crate::directory::GraphEndpoints;
use crate::environment::UnmatchedEnvironment;
use crate::error::{ProvisionError, ProvisionResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable holding the Microsoft Graph bearer token.
pub const GRAPH_TOKEN_ENV: &str = "IDPROV_GRAPH_TOKEN";
/// Environment variable holding the Azure Resource Manager bearer token.
pub const ARM_TOKEN_ENV: &str = "IDPROV_ARM_TOKEN";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub tenant_id: Option<String>,
    pub graph_base_url: String,
    pub graph_beta_base_url: String,
    pub arm_base_url: String,
    pub catalog_name: String,
    pub vm_team_approver_group_id: Option<String>,
    pub authentication_strength: String,
    pub output_dir: PathBuf,
    pub unmatched_environment: UnmatchedEnvironment,
    pub hr_onboarding_window_days: u32,
    /// Report these scopes instead of reading them from the token.
    pub granted_scopes: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        let endpoints = GraphEndpoints::default();
        Self {
            tenant_id: None,
            graph_base_url: endpoints.graph,
            graph_beta_base_url: endpoints.graph_beta,
            arm_base_url: endpoints.arm,
            catalog_name: "RBAC Access".to_string(),
            vm_team_approver_group_id: None,
            authentication_strength: "Phishing-resistant MFA".to_string(),
            output_dir: PathBuf::from("output"),
            unmatched_environment: UnmatchedEnvironment::Fail,
            hr_onboarding_window_days: 14,
            granted_scopes: None,
        }
    }
}

impl Config {
    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> ProvisionResult<Self> {
        toml::from_str(text).map_err(|e| ProvisionError::Config {
            message: e.to_string(),
        })
    }

    /// Load configuration from a file.
    pub fn load(path: &Path) -> ProvisionResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ProvisionError::Config {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        Self::from_toml(&text)
    }

    /// Load `path` if given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> ProvisionResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn endpoints(&self) -> GraphEndpoints {
        GraphEndpoints {
            graph: self.graph_base_url.trim_end_matches('/').to_string(),
            graph_beta: self.graph_beta_base_url.trim_end_matches('/').to_string(),
            arm: self.arm_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.unmatched_environment, UnmatchedEnvironment::Fail);
        assert_eq!(config.hr_onboarding_window_days, 14);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_toml(
            r#"
            catalog_name = "Platform Access"
            unmatched_environment = "most-restrictive"
            hr_onboarding_window_days = 7
            vm_team_approver_group_id = "team-1"
            arm_base_url = "http://localhost:8080/"
            "#,
        )
        .unwrap();
        assert_eq!(config.catalog_name, "Platform Access");
        assert_eq!(
            config.unmatched_environment,
            UnmatchedEnvironment::MostRestrictive
        );
        assert_eq!(config.hr_onboarding_window_days, 7);
        assert_eq!(config.vm_team_approver_group_id.as_deref(), Some("team-1"));
        assert_eq!(config.endpoints().arm, "http://localhost:8080");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Config::from_toml("catalogue = \"typo\"").unwrap_err();
        assert!(matches!(err, ProvisionError::Config { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idprov.toml");
        std::fs::write(&path, "tenant_id = \"t1\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.tenant_id.as_deref(), Some("t1"));

        let missing = Config::load(&dir.path().join("missing.toml"));
        assert!(missing.is_err());
    }
}
