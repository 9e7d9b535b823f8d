//! Uniform result envelopes for resource access
//!
//! Every read operation on the access client answers with a
//! [`ResourceEnvelope`] and every write with a [`MutationResult`], no
//! matter which access mode fulfilled the call. Failures never surface as
//! `Err` from data operations; they ride inside the envelope so callers
//! can always consume the same shape.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

use super::auth::AccessMode;

/// Classification of a failed access operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ErrorKind {
    /// Token acquisition failed after the client committed to a live mode.
    AuthenticationFailed,
    /// The provider answered with a non-2xx status.
    Provider { status: u16 },
    /// The request never completed (timeout, connection failure).
    Transport,
    /// A live call was attempted with no credential present. The mode
    /// state machine makes this unreachable in practice.
    Unauthenticated,
}

impl ErrorKind {
    /// Short label used in metrics and structured log fields.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::AuthenticationFailed => "authentication_failed",
            ErrorKind::Provider { .. } => "provider_error",
            ErrorKind::Transport => "transport_error",
            ErrorKind::Unauthenticated => "unauthenticated",
        }
    }
}

/// Error payload carried inside envelopes and mutation results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeError {
    pub kind: ErrorKind,
    /// Cause detail; for provider errors this is the response body.
    pub message: String,
}

impl EnvelopeError {
    pub fn authentication(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::AuthenticationFailed,
            message: message.into(),
        }
    }

    pub fn provider(status: u16, body: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Provider { status },
            message: body.into(),
        }
    }

    pub fn transport(cause: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transport,
            message: cause.into(),
        }
    }

    pub fn unauthenticated() -> Self {
        Self {
            kind: ErrorKind::Unauthenticated,
            message: "no credential available for a live call".to_string(),
        }
    }

    /// Map the error to a display message with an actionable hint where
    /// the status conventions of the management API allow one.
    pub fn user_message(&self) -> String {
        match &self.kind {
            ErrorKind::AuthenticationFailed => format!(
                "Authentication failed: {}. Run 'az login' or check the service principal credentials.",
                self.message
            ),
            ErrorKind::Provider { status: 401 } => {
                "Authentication rejected by the provider. The token may have expired.".to_string()
            }
            ErrorKind::Provider { status: 403 } => {
                "Permission denied. Check the role assignments on the subscription.".to_string()
            }
            ErrorKind::Provider { status: 404 } => {
                "Resource not found. Check the resource group and NSG names.".to_string()
            }
            ErrorKind::Provider { status: 429 } => {
                "Rate limit exceeded. Try again in a few minutes.".to_string()
            }
            ErrorKind::Provider { status } => {
                format!("Provider returned {}: {}", status, self.message)
            }
            ErrorKind::Transport => format!(
                "Request did not complete: {}. Check the network connection.",
                self.message
            ),
            ErrorKind::Unauthenticated => self.message.clone(),
        }
    }
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}

/// Result of a read operation.
///
/// `items` always holds zero or more provider-shaped JSON records; when
/// `error` is set the items are empty. `simulated` is true whenever the
/// data did not come from a live provider call.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceEnvelope {
    pub items: Vec<Value>,
    pub simulated: bool,
    pub mode: AccessMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
}

impl ResourceEnvelope {
    /// Envelope around data synthesized offline. Simulated reads cannot
    /// fail, so there is no error variant of this constructor.
    pub fn simulated(items: Vec<Value>) -> Self {
        Self {
            items,
            simulated: true,
            mode: AccessMode::Offline,
            error: None,
        }
    }

    /// Envelope around data fetched from the provider.
    pub fn live(items: Vec<Value>, mode: AccessMode) -> Self {
        Self {
            items,
            simulated: false,
            mode,
            error: None,
        }
    }

    /// Envelope for a failed live call. Items are always empty.
    pub fn failed(error: EnvelopeError, mode: AccessMode) -> Self {
        Self {
            items: Vec::new(),
            simulated: false,
            mode,
            error: Some(error),
        }
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

/// Result of a write operation.
#[derive(Debug, Clone, Serialize)]
pub struct MutationResult {
    pub succeeded: bool,
    pub simulated: bool,
    pub mode: AccessMode,
    /// Name of the rule that was (or would have been) written.
    pub rule_name: String,
    pub port: u16,
    pub priority: u16,
    /// Human-readable description of the outcome.
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
}

impl MutationResult {
    /// A mutation acknowledged without touching the provider.
    pub fn simulated_success(rule_name: &str, port: u16, priority: u16) -> Self {
        Self {
            succeeded: true,
            simulated: true,
            mode: AccessMode::Offline,
            rule_name: rule_name.to_string(),
            port,
            priority,
            detail: format!(
                "simulated: rule '{}' allowing TCP {} would be added with priority {}",
                rule_name, port, priority
            ),
            error: None,
        }
    }

    /// A mutation the provider accepted.
    pub fn applied(mode: AccessMode, rule_name: &str, port: u16, priority: u16) -> Self {
        Self {
            succeeded: true,
            simulated: false,
            mode,
            rule_name: rule_name.to_string(),
            port,
            priority,
            detail: format!(
                "rule '{}' allowing TCP {} written with priority {}",
                rule_name, port, priority
            ),
            error: None,
        }
    }

    /// A mutation that failed; the error says how.
    pub fn failed(mode: AccessMode, rule_name: &str, port: u16, priority: u16, error: EnvelopeError) -> Self {
        Self {
            succeeded: false,
            simulated: false,
            mode,
            rule_name: rule_name.to_string(),
            port,
            priority,
            detail: format!("rule '{}' was not written", rule_name),
            error: Some(error),
        }
    }
}

/// Identity and mode summary for a client instance. No I/O behind it.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub subscription_id: String,
    pub tenant_id: Option<String>,
    pub auth_method: &'static str,
    pub mode: AccessMode,
    pub authenticated: bool,
}

/// Outcome of an explicit connection probe.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub ok: bool,
    pub mode: AccessMode,
    pub authenticated: bool,
    pub message: String,
}

/// Extract a value from a JSON record using a dot-separated path, with
/// numeric segments indexing into arrays. Returns `-` for anything
/// missing so report rows stay aligned.
pub fn json_path_str(record: &Value, path: &str) -> String {
    let mut current = record;
    for segment in path.split('.') {
        current = if let Ok(index) = segment.parse::<usize>() {
            match current.get(index) {
                Some(value) => value,
                None => return "-".to_string(),
            }
        } else {
            match current.get(segment) {
                Some(value) => value,
                None => return "-".to_string(),
            }
        };
    }
    match current {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failed_envelope_has_empty_items() {
        let envelope = ResourceEnvelope::failed(
            EnvelopeError::provider(503, "upstream unavailable"),
            AccessMode::Delegated,
        );
        assert!(envelope.items.is_empty());
        assert!(!envelope.simulated);
        assert!(envelope.is_err());
        assert_eq!(
            envelope.error.unwrap().kind,
            ErrorKind::Provider { status: 503 }
        );
    }

    #[test]
    fn test_simulated_envelope_never_carries_an_error() {
        let envelope = ResourceEnvelope::simulated(vec![json!({"name": "vm-web-01"})]);
        assert!(envelope.simulated);
        assert_eq!(envelope.mode, AccessMode::Offline);
        assert!(envelope.error.is_none());
    }

    #[test]
    fn test_error_kind_serializes_with_camel_case_tag() {
        let serialized = serde_json::to_value(ErrorKind::Provider { status: 403 }).unwrap();
        assert_eq!(serialized, json!({"kind": "provider", "status": 403}));
        let serialized = serde_json::to_value(ErrorKind::AuthenticationFailed).unwrap();
        assert_eq!(serialized, json!({"kind": "authenticationFailed"}));
    }

    #[test]
    fn test_user_message_hints_on_permission_denied() {
        let error = EnvelopeError::provider(403, "AuthorizationFailed");
        assert!(error.user_message().contains("role assignments"));
    }

    #[test]
    fn test_json_path_str_walks_objects_and_arrays() {
        let record = json!({
            "name": "vm-web-01",
            "properties": {
                "hardwareProfile": {"vmSize": "Standard_DS2_v2"},
                "networkProfile": {"networkInterfaces": [{"id": "nic-0"}]}
            }
        });
        assert_eq!(json_path_str(&record, "name"), "vm-web-01");
        assert_eq!(
            json_path_str(&record, "properties.hardwareProfile.vmSize"),
            "Standard_DS2_v2"
        );
        assert_eq!(
            json_path_str(&record, "properties.networkProfile.networkInterfaces.0.id"),
            "nic-0"
        );
        assert_eq!(json_path_str(&record, "properties.missing"), "-");
    }
}
