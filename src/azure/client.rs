//! Azure resource access client
//!
//! One client per process, combining mode resolution, authentication and
//! HTTP into uniform data operations. The access mode is resolved once at
//! construction; a live mode that fails its liveness check downgrades the
//! instance to offline simulation for its whole lifetime. Data operations
//! never return `Err` - every outcome is an envelope.

use anyhow::Result;
use serde_json::{json, Value};
use std::time::Instant;

use crate::config::Config;
use crate::metrics::AgentMetrics;

use super::auth::{self, AccessMode, Credential};
use super::envelope::{
    ConnectionInfo, ConnectionStatus, EnvelopeError, MutationResult, ResourceEnvelope,
};
use super::http::{ManagementHttp, MUTATION_TIMEOUT, READ_TIMEOUT};
use super::sim;

/// Default management-plane endpoint.
pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";

/// Compute inventory reads are pinned to this API version.
const COMPUTE_API_VERSION: &str = "2023-09-01";
/// Network security group reads and rule writes are pinned to this version.
const NETWORK_API_VERSION: &str = "2023-05-01";
/// Resource group listing is pinned to this version.
const RESOURCE_GROUPS_API_VERSION: &str = "2021-04-01";

/// The remote-desktop port this agent exists to unblock.
pub const RDP_PORT: u16 = 3389;
/// Name of the rule the agent writes. Re-running the fix overwrites the
/// same rule instead of accumulating copies.
pub const RDP_RULE_NAME: &str = "Allow-RDP-3389";
/// Priority of the written rule; low enough to win against the defaults.
const RDP_RULE_PRIORITY: u16 = 100;

/// Azure resource access client.
pub struct AzureClient {
    mode: AccessMode,
    /// Set when construction committed to a live mode and then had to
    /// fall back. Never cleared.
    downgraded: bool,
    credential: Option<Credential>,
    http: ManagementHttp,
    management_endpoint: String,
    subscription_id: String,
    tenant_id: Option<String>,
    metrics: AgentMetrics,
}

impl AzureClient {
    /// Resolve an access mode from the configuration and run the one-time
    /// liveness check. Credential problems never surface as `Err`; they
    /// downgrade the instance to offline simulation.
    pub async fn connect(config: &Config, metrics: AgentMetrics) -> Result<Self> {
        Self::connect_to(
            config,
            metrics,
            DEFAULT_MANAGEMENT_ENDPOINT,
            auth::DEFAULT_LOGIN_ENDPOINT,
        )
        .await
    }

    /// [`AzureClient::connect`] against explicit endpoints.
    pub async fn connect_to(
        config: &Config,
        metrics: AgentMetrics,
        management_endpoint: &str,
        login_endpoint: &str,
    ) -> Result<Self> {
        let resolved = auth::resolve_mode(config).await;
        tracing::info!("Initializing Azure client in {} mode", resolved);

        let mut mode = resolved;
        let mut downgraded = false;
        let mut credential =
            Credential::for_mode(resolved, config).map(|c| c.with_login_endpoint(login_endpoint));

        if resolved.is_live() {
            let live = match credential.as_ref() {
                Some(cred) => match cred.token().await {
                    Ok(_) => {
                        tracing::info!(
                            "{} authentication succeeded",
                            auth::auth_method_label(resolved)
                        );
                        true
                    }
                    Err(e) => {
                        tracing::error!(
                            "{} authentication failed: {:#}",
                            auth::auth_method_label(resolved),
                            e
                        );
                        false
                    }
                },
                None => {
                    tracing::error!("{} mode selected but its credentials are incomplete", resolved);
                    false
                }
            };

            if !live {
                tracing::warn!("Falling back to offline simulation for the lifetime of this client");
                mode = AccessMode::Offline;
                downgraded = true;
                credential = None;
            }
        }

        Ok(Self {
            mode,
            downgraded,
            credential,
            http: ManagementHttp::new()?,
            management_endpoint: management_endpoint.trim_end_matches('/').to_string(),
            subscription_id: config.subscription_id.clone(),
            tenant_id: config.tenant_id.clone(),
            metrics,
        })
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// True when data operations answer from the embedded fixtures.
    pub fn is_simulating(&self) -> bool {
        !self.mode.is_live()
    }

    /// True when construction fell back from a live mode.
    pub fn downgraded(&self) -> bool {
        self.downgraded
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    // =========================================================================
    // Data operations
    // =========================================================================

    /// List the subscription's virtual machines.
    pub async fn list_virtual_machines(&self) -> ResourceEnvelope {
        if !self.mode.is_live() {
            tracing::info!("Returning simulated VM inventory");
            return ResourceEnvelope::simulated(sim::virtual_machines().to_vec());
        }

        tracing::info!("Fetching virtual machines for {}", self.subscription_id);
        self.live_read("list_virtual_machines", &self.vms_url(), &["value"])
            .await
    }

    /// List the rules of one network security group.
    pub async fn list_network_rules(&self, group: &str, nsg: &str) -> ResourceEnvelope {
        if !self.mode.is_live() {
            tracing::info!("Returning simulated rule set for '{}'", nsg);
            return ResourceEnvelope::simulated(sim::network_rules().to_vec());
        }

        tracing::info!("Fetching rules of '{}' in '{}'", nsg, group);
        self.live_read(
            "list_network_rules",
            &self.nsg_url(group, nsg),
            &["properties", "securityRules"],
        )
        .await
    }

    /// List the subscription's resource groups.
    pub async fn list_resource_groups(&self) -> ResourceEnvelope {
        if !self.mode.is_live() {
            tracing::info!("Returning simulated resource groups");
            return ResourceEnvelope::simulated(sim::resource_groups().to_vec());
        }

        tracing::info!("Fetching resource groups for {}", self.subscription_id);
        self.live_read("list_resource_groups", &self.resource_groups_url(), &["value"])
            .await
    }

    /// Write the inbound RDP allow rule to a network security group.
    ///
    /// The write is an idempotent upsert: the rule name is fixed, so
    /// repeating the fix replaces the rule rather than duplicating it.
    pub async fn add_remote_desktop_rule(&self, group: &str, nsg: &str) -> MutationResult {
        if !self.mode.is_live() {
            tracing::info!("Simulating RDP rule write for '{}'", nsg);
            return MutationResult::simulated_success(RDP_RULE_NAME, RDP_PORT, RDP_RULE_PRIORITY);
        }

        let Some(credential) = self.credential.as_ref() else {
            return MutationResult::failed(
                self.mode,
                RDP_RULE_NAME,
                RDP_PORT,
                RDP_RULE_PRIORITY,
                EnvelopeError::unauthenticated(),
            );
        };

        let token = match credential.token().await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!("Token acquisition failed: {:#}", e);
                return MutationResult::failed(
                    self.mode,
                    RDP_RULE_NAME,
                    RDP_PORT,
                    RDP_RULE_PRIORITY,
                    EnvelopeError::authentication(format!("{e:#}")),
                );
            }
        };

        let url = self.nsg_rule_url(group, nsg, RDP_RULE_NAME);
        tracing::info!("Writing rule '{}' to '{}' in '{}'", RDP_RULE_NAME, nsg, group);

        let started = Instant::now();
        let result = match self
            .http
            .put_json(&url, &token, &rdp_rule_payload(), MUTATION_TIMEOUT)
            .await
        {
            Ok(response) if matches!(response.status.as_u16(), 200 | 201) => {
                MutationResult::applied(self.mode, RDP_RULE_NAME, RDP_PORT, RDP_RULE_PRIORITY)
            }
            Ok(response) => MutationResult::failed(
                self.mode,
                RDP_RULE_NAME,
                RDP_PORT,
                RDP_RULE_PRIORITY,
                EnvelopeError::provider(response.status.as_u16(), response.body),
            ),
            Err(e) => MutationResult::failed(
                self.mode,
                RDP_RULE_NAME,
                RDP_PORT,
                RDP_RULE_PRIORITY,
                EnvelopeError::transport(format!("{e:#}")),
            ),
        };

        let outcome = result.error.as_ref().map(|e| e.kind.label()).unwrap_or("ok");
        self.metrics
            .record_provider_call("add_remote_desktop_rule", outcome, started.elapsed());
        result
    }

    /// Identity and mode summary. No I/O.
    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            subscription_id: self.subscription_id.clone(),
            tenant_id: self.tenant_id.clone(),
            auth_method: auth::auth_method_label(self.mode),
            mode: self.mode,
            authenticated: self.credential.is_some(),
        }
    }

    /// One token-liveness probe. Never changes the resolved mode or the
    /// cached credential state, so a failed probe here does not downgrade
    /// the client.
    pub async fn test_connection(&self) -> ConnectionStatus {
        if !self.mode.is_live() {
            let message = if self.downgraded {
                "offline simulation (downgraded after a failed liveness check)".to_string()
            } else {
                "offline simulation, no provider connection required".to_string()
            };
            return ConnectionStatus {
                ok: true,
                mode: self.mode,
                authenticated: false,
                message,
            };
        }

        match self.credential.as_ref() {
            None => ConnectionStatus {
                ok: false,
                mode: self.mode,
                authenticated: false,
                message: EnvelopeError::unauthenticated().message,
            },
            Some(credential) => match credential.probe().await {
                Ok(()) => ConnectionStatus {
                    ok: true,
                    mode: self.mode,
                    authenticated: true,
                    message: format!("connected via {}", auth::auth_method_label(self.mode)),
                },
                Err(e) => ConnectionStatus {
                    ok: false,
                    mode: self.mode,
                    authenticated: false,
                    message: format!("token probe failed: {e:#}"),
                },
            },
        }
    }

    /// Shared live-read path: token, GET, map the outcome into an envelope.
    async fn live_read(
        &self,
        operation: &'static str,
        url: &str,
        items_path: &[&str],
    ) -> ResourceEnvelope {
        let Some(credential) = self.credential.as_ref() else {
            // Unreachable through the public constructors; degrade into
            // the error taxonomy instead of panicking.
            return ResourceEnvelope::failed(EnvelopeError::unauthenticated(), self.mode);
        };

        let token = match credential.token().await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!("Token acquisition failed: {:#}", e);
                return ResourceEnvelope::failed(
                    EnvelopeError::authentication(format!("{e:#}")),
                    self.mode,
                );
            }
        };

        let started = Instant::now();
        let envelope = match self.http.get(url, &token, READ_TIMEOUT).await {
            Ok(response) if response.is_success() => match response.json() {
                Ok(payload) => {
                    ResourceEnvelope::live(extract_items(&payload, items_path), self.mode)
                }
                Err(e) => {
                    ResourceEnvelope::failed(EnvelopeError::transport(format!("{e:#}")), self.mode)
                }
            },
            Ok(response) => ResourceEnvelope::failed(
                EnvelopeError::provider(response.status.as_u16(), response.body),
                self.mode,
            ),
            Err(e) => {
                ResourceEnvelope::failed(EnvelopeError::transport(format!("{e:#}")), self.mode)
            }
        };

        let outcome = envelope
            .error
            .as_ref()
            .map(|e| e.kind.label())
            .unwrap_or("ok");
        self.metrics
            .record_provider_call(operation, outcome, started.elapsed());
        envelope
    }

    // =========================================================================
    // Management API URL helpers
    // =========================================================================

    /// Build a subscription-scoped management API URL
    fn subscription_url(&self, path: &str, api_version: &str) -> String {
        format!(
            "{}/subscriptions/{}/{}?api-version={}",
            self.management_endpoint,
            urlencoding::encode(&self.subscription_id),
            path,
            api_version
        )
    }

    fn vms_url(&self) -> String {
        self.subscription_url(
            "providers/Microsoft.Compute/virtualMachines",
            COMPUTE_API_VERSION,
        )
    }

    fn nsg_url(&self, group: &str, nsg: &str) -> String {
        self.subscription_url(
            &format!(
                "resourceGroups/{}/providers/Microsoft.Network/networkSecurityGroups/{}",
                urlencoding::encode(group),
                urlencoding::encode(nsg)
            ),
            NETWORK_API_VERSION,
        )
    }

    fn nsg_rule_url(&self, group: &str, nsg: &str, rule: &str) -> String {
        self.subscription_url(
            &format!(
                "resourceGroups/{}/providers/Microsoft.Network/networkSecurityGroups/{}/securityRules/{}",
                urlencoding::encode(group),
                urlencoding::encode(nsg),
                urlencoding::encode(rule)
            ),
            NETWORK_API_VERSION,
        )
    }

    fn resource_groups_url(&self) -> String {
        self.subscription_url("resourcegroups", RESOURCE_GROUPS_API_VERSION)
    }
}

/// Body of the inbound RDP allow rule.
fn rdp_rule_payload() -> Value {
    json!({
        "properties": {
            "priority": RDP_RULE_PRIORITY,
            "direction": "Inbound",
            "access": "Allow",
            "protocol": "TCP",
            "sourcePortRange": "*",
            "destinationPortRange": RDP_PORT.to_string(),
            "sourceAddressPrefix": "*",
            "destinationAddressPrefix": "*",
            "description": "Allow RDP (added by azdiag)"
        }
    })
}

/// Pull the collection out of a management API response. Top-level lists
/// arrive under "value"; NSG reads nest rules under "properties".
fn extract_items(payload: &Value, path: &[&str]) -> Vec<Value> {
    let mut current = payload;
    for key in path {
        match current.get(key) {
            Some(value) => current = value,
            None => return Vec::new(),
        }
    }
    current.as_array().cloned().unwrap_or_default()
}

/// True when any rule in `items` targets `port` on its destination side.
/// Understands exact ports, `*`, and `low-high` ranges.
pub fn has_rule_for_port(items: &[Value], port: u16) -> bool {
    items.iter().any(|rule| {
        rule.get("properties")
            .and_then(|p| p.get("destinationPortRange"))
            .and_then(|v| v.as_str())
            .map(|range| port_range_matches(range, port))
            .unwrap_or(false)
    })
}

fn port_range_matches(range: &str, port: u16) -> bool {
    let range = range.trim();
    if range == "*" {
        return true;
    }
    if let Ok(single) = range.parse::<u16>() {
        return single == port;
    }
    if let Some((low, high)) = range.split_once('-') {
        if let (Ok(low), Ok(high)) = (low.trim().parse::<u16>(), high.trim().parse::<u16>()) {
            return low <= port && port <= high;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::envelope::ErrorKind;

    fn test_client(mode: AccessMode) -> AzureClient {
        AzureClient {
            mode,
            downgraded: false,
            credential: None,
            http: ManagementHttp::new().unwrap(),
            management_endpoint: DEFAULT_MANAGEMENT_ENDPOINT.to_string(),
            subscription_id: "sub-123".to_string(),
            tenant_id: None,
            metrics: AgentMetrics::new().unwrap(),
        }
    }

    #[test]
    fn test_urls_pin_api_versions() {
        let client = test_client(AccessMode::Offline);
        assert_eq!(
            client.vms_url(),
            "https://management.azure.com/subscriptions/sub-123/providers/Microsoft.Compute/virtualMachines?api-version=2023-09-01"
        );
        assert!(client
            .nsg_url("rg-demo", "vm-web-01-nsg")
            .ends_with("networkSecurityGroups/vm-web-01-nsg?api-version=2023-05-01"));
        assert!(client
            .resource_groups_url()
            .ends_with("resourcegroups?api-version=2021-04-01"));
    }

    #[test]
    fn test_urls_encode_path_segments() {
        let client = test_client(AccessMode::Offline);
        let url = client.nsg_rule_url("rg with space", "nsg/odd", RDP_RULE_NAME);
        assert!(url.contains("rg%20with%20space"));
        assert!(url.contains("nsg%2Fodd"));
        assert!(url.ends_with("securityRules/Allow-RDP-3389?api-version=2023-05-01"));
    }

    #[test]
    fn test_rdp_rule_payload_shape() {
        let payload = rdp_rule_payload();
        let properties = payload.get("properties").unwrap();
        assert_eq!(properties["destinationPortRange"], "3389");
        assert_eq!(properties["direction"], "Inbound");
        assert_eq!(properties["access"], "Allow");
        assert_eq!(properties["priority"], 100);
    }

    #[test]
    fn test_port_range_matching() {
        assert!(port_range_matches("3389", 3389));
        assert!(port_range_matches("*", 3389));
        assert!(port_range_matches("3000-4000", 3389));
        assert!(!port_range_matches("22", 3389));
        assert!(!port_range_matches("3390-4000", 3389));
        assert!(!port_range_matches("garbage", 3389));
    }

    #[test]
    fn test_simulated_rules_never_allow_rdp() {
        assert!(!has_rule_for_port(sim::network_rules(), RDP_PORT));
        assert!(has_rule_for_port(sim::network_rules(), 22));
        assert!(has_rule_for_port(sim::network_rules(), 443));
    }

    #[test]
    fn test_extract_items_walks_nested_paths() {
        let payload = serde_json::json!({
            "properties": {"securityRules": [{"name": "a"}, {"name": "b"}]}
        });
        assert_eq!(
            extract_items(&payload, &["properties", "securityRules"]).len(),
            2
        );
        assert!(extract_items(&payload, &["value"]).is_empty());
    }

    #[tokio::test]
    async fn test_offline_operations_answer_from_fixtures() {
        let client = test_client(AccessMode::Offline);

        let inventory = client.list_virtual_machines().await;
        assert!(inventory.simulated);
        assert_eq!(inventory.items.len(), 2);
        assert!(inventory.error.is_none());

        let written = client.add_remote_desktop_rule("rg-demo", "vm-web-01-nsg").await;
        assert!(written.succeeded);
        assert!(written.simulated);
        assert_eq!(written.rule_name, RDP_RULE_NAME);

        let status = client.test_connection().await;
        assert!(status.ok);
        assert!(!status.authenticated);
    }

    #[tokio::test]
    async fn test_live_mode_without_credential_degrades_to_unauthenticated() {
        // Not constructible through connect(); the defensive path still
        // has to answer in the taxonomy.
        let client = test_client(AccessMode::Delegated);

        let envelope = client.list_virtual_machines().await;
        assert_eq!(
            envelope.error.as_ref().map(|e| e.kind.clone()),
            Some(ErrorKind::Unauthenticated)
        );
        assert!(envelope.items.is_empty());

        let written = client.add_remote_desktop_rule("rg-demo", "nsg").await;
        assert!(!written.succeeded);
        assert_eq!(
            written.error.map(|e| e.kind),
            Some(ErrorKind::Unauthenticated)
        );
    }
}
