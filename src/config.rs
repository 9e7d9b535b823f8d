//! Configuration management
//!
//! Ambient state is read exactly once, at process start, into an explicit
//! record that is passed down by value. Nothing below `main` touches
//! environment variables; mode resolution and the access client only ever
//! see this record, which keeps them deterministic and testable.

use crate::agent::openai;

/// Environment variable holding the forced access mode.
pub const AUTH_MODE_VAR: &str = "AZURE_AUTH_MODE";

/// Runtime configuration. Environment first, CLI flags override.
#[derive(Debug, Clone)]
pub struct Config {
    /// Subscription the client operates on.
    pub subscription_id: String,
    /// Tenant for service-principal authentication.
    pub tenant_id: Option<String>,
    /// Application id for service-principal authentication.
    pub client_id: Option<String>,
    /// Secret for service-principal authentication.
    pub client_secret: Option<String>,
    /// Raw forced-mode literal (offline, delegated, noninteractive, auto).
    pub forced_mode: Option<String>,
    /// Reasoning backend API key. Absent is fine for offline runs.
    pub openai_api_key: Option<String>,
    /// Reasoning backend model name.
    pub openai_model: String,
    /// Resource group the pipeline inspects.
    pub resource_group: String,
    /// Network security group the pipeline inspects.
    pub security_group: String,
    /// Port the metrics exposition server binds to.
    pub metrics_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            subscription_id: "demo-subscription-12345".to_string(),
            tenant_id: None,
            client_id: None,
            client_secret: None,
            forced_mode: None,
            openai_api_key: None,
            openai_model: openai::DEFAULT_MODEL.to_string(),
            resource_group: "rg-demo".to_string(),
            security_group: "vm-web-01-nsg".to_string(),
            metrics_port: 8000,
        }
    }
}

impl Config {
    /// Read the environment once. Empty or whitespace values count as unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_nonempty("AZURE_SUBSCRIPTION_ID") {
            config.subscription_id = v;
        }
        config.tenant_id = env_nonempty("AZURE_TENANT_ID");
        config.client_id = env_nonempty("AZURE_CLIENT_ID");
        config.client_secret = env_nonempty("AZURE_CLIENT_SECRET");
        config.forced_mode = env_nonempty(AUTH_MODE_VAR);
        config.openai_api_key = env_nonempty("OPENAI_API_KEY");
        if let Some(v) = env_nonempty("OPENAI_MODEL") {
            config.openai_model = v;
        }
        if let Some(v) = env_nonempty("AZURE_RESOURCE_GROUP") {
            config.resource_group = v;
        }
        if let Some(v) = env_nonempty("AZURE_NSG_NAME") {
            config.security_group = v;
        }
        config
    }

    /// True when all three service-principal fields are present.
    pub fn has_service_principal(&self) -> bool {
        [&self.tenant_id, &self.client_id, &self.client_secret]
            .iter()
            .all(|field| field.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_principal_config() -> Config {
        Config {
            tenant_id: Some("tenant-123".to_string()),
            client_id: Some("client-456".to_string()),
            client_secret: Some("secret-789".to_string()),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.subscription_id, "demo-subscription-12345");
        assert_eq!(config.resource_group, "rg-demo");
        assert_eq!(config.security_group, "vm-web-01-nsg");
        assert_eq!(config.metrics_port, 8000);
        assert!(config.forced_mode.is_none());
        assert!(!config.has_service_principal());
    }

    #[test]
    fn test_service_principal_requires_all_three_fields() {
        let full = service_principal_config();
        assert!(full.has_service_principal());

        let mut missing_secret = service_principal_config();
        missing_secret.client_secret = None;
        assert!(!missing_secret.has_service_principal());

        let mut blank_tenant = service_principal_config();
        blank_tenant.tenant_id = Some("   ".to_string());
        assert!(!blank_tenant.has_service_principal());
    }
}
