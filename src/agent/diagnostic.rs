//! Diagnostic agent
//!
//! Turns a resource envelope into a diagnostic report. Two layers: a
//! heuristic health check that needs no backend at all, and a full
//! analysis produced by the reasoning backend. Backend failures come back
//! as report text, never as errors.

use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Instant;

use crate::azure::envelope::{json_path_str, ResourceEnvelope};
use crate::metrics::AgentMetrics;

use super::openai::ChatClient;

const SYSTEM_PROMPT: &str = "You are an expert Azure cloud architect specializing in \
infrastructure diagnostics, performance optimization, and security.";

const ANALYSIS_TEMPERATURE: f32 = 0.7;
const ANALYSIS_MAX_TOKENS: u32 = 1500;

/// Backend-free summary of an inventory envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSummary {
    pub total: usize,
    pub running: usize,
    pub stopped: usize,
    pub locations: Vec<String>,
    pub issues: Vec<String>,
}

pub struct DiagnosticAgent {
    chat: ChatClient,
    metrics: AgentMetrics,
}

impl DiagnosticAgent {
    pub fn new(chat: ChatClient, metrics: AgentMetrics) -> Self {
        Self { chat, metrics }
    }

    /// Produce the diagnostic analysis for an inventory envelope.
    pub async fn analyze(&self, envelope: &ResourceEnvelope) -> String {
        tracing::info!(
            resources = envelope.items.len(),
            simulated = envelope.simulated,
            "Starting diagnostic analysis"
        );

        let prompt = analysis_prompt(envelope);
        let started = Instant::now();

        match self
            .chat
            .complete(SYSTEM_PROMPT, &prompt, ANALYSIS_TEMPERATURE, ANALYSIS_MAX_TOKENS)
            .await
        {
            Ok(completion) => {
                self.metrics.record_backend_call(
                    &completion.model,
                    "diagnosis",
                    completion.total_tokens,
                    started.elapsed(),
                );
                completion.text
            }
            Err(e) => {
                tracing::error!("Diagnostic analysis failed: {:#}", e);
                self.metrics.record_error();
                format!("Analysis failed: {e:#}")
            }
        }
    }
}

fn analysis_prompt(envelope: &ResourceEnvelope) -> String {
    format!(
        "You are an expert Azure Cloud Architect and Site Reliability Engineer.\n\
         Analyze the following Azure infrastructure data and provide a comprehensive diagnostic report.\n\n\
         Azure Resource Data:\n{}\n\n\
         Please provide:\n\
         1. Health Assessment: overall health of the infrastructure\n\
         2. Identified Issues: problems or concerns found in the data\n\
         3. Root Cause Analysis: likely causes of any issues\n\
         4. Security Considerations: risks or misconfigurations\n\
         5. Performance Optimization: recommendations for better performance\n\
         6. Action Items: a prioritized list of recommended actions\n\n\
         Format the response in a clear, structured manner suitable for both technical and non-technical stakeholders.",
        summarize_envelope(envelope)
    )
}

/// Flatten an envelope into the text consumed by the prompt and the
/// console report: a count line plus name, location, size, power state
/// and tags per record. Only documented envelope fields are read.
pub fn summarize_envelope(envelope: &ResourceEnvelope) -> String {
    if let Some(error) = &envelope.error {
        return format!("Error fetching resources: {}", error.user_message());
    }

    let mut parts = Vec::new();
    if envelope.simulated {
        parts.push("Running in SIMULATION MODE (offline data)".to_string());
    }
    parts.push(format!("Total VMs: {}", envelope.items.len()));

    for (idx, vm) in envelope.items.iter().enumerate() {
        parts.push(format!(
            "VM {}: {}\n- Location: {}\n- Size: {}\n- State: {}\n- Tags: {}",
            idx + 1,
            json_path_str(vm, "name"),
            json_path_str(vm, "location"),
            json_path_str(vm, "properties.hardwareProfile.vmSize"),
            json_path_str(vm, "properties.powerState"),
            vm.get("tags")
                .map(Value::to_string)
                .unwrap_or_else(|| "-".to_string()),
        ));
    }

    parts.join("\n")
}

/// Heuristic health check over an inventory envelope. Works without any
/// reasoning backend.
pub fn quick_health_check(envelope: &ResourceEnvelope) -> HealthSummary {
    let mut running = 0;
    let mut stopped = 0;
    let mut locations = BTreeSet::new();

    for vm in &envelope.items {
        match json_path_str(vm, "properties.powerState").as_str() {
            "running" => running += 1,
            _ => stopped += 1,
        }
        let location = json_path_str(vm, "location");
        if location != "-" {
            locations.insert(location);
        }
    }

    let mut issues = Vec::new();
    if stopped > 0 {
        issues.push(format!("{} VMs are not running", stopped));
    }
    if locations.len() > 3 {
        issues.push(format!(
            "Resources spread across {} regions, consider consolidating",
            locations.len()
        ));
    }

    HealthSummary {
        total: envelope.items.len(),
        running,
        stopped,
        locations: locations.into_iter().collect(),
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::auth::AccessMode;
    use crate::azure::envelope::EnvelopeError;
    use crate::azure::sim;

    fn fixture_envelope() -> ResourceEnvelope {
        ResourceEnvelope::simulated(sim::virtual_machines().to_vec())
    }

    #[test]
    fn test_quick_health_check_counts_power_states() {
        let summary = quick_health_check(&fixture_envelope());
        assert_eq!(summary.total, 2);
        assert_eq!(summary.running, 1);
        assert_eq!(summary.stopped, 1);
        assert_eq!(summary.locations, vec!["eastus".to_string()]);
        assert_eq!(summary.issues, vec!["1 VMs are not running".to_string()]);
    }

    #[test]
    fn test_quick_health_check_flags_region_sprawl() {
        let vms: Vec<Value> = ["eastus", "westus", "northeurope", "japaneast"]
            .iter()
            .enumerate()
            .map(|(i, location)| {
                serde_json::json!({
                    "name": format!("vm-{i}"),
                    "location": location,
                    "properties": {"powerState": "running"}
                })
            })
            .collect();
        let summary = quick_health_check(&ResourceEnvelope::simulated(vms));
        assert_eq!(summary.stopped, 0);
        assert!(summary
            .issues
            .iter()
            .any(|issue| issue.contains("4 regions")));
    }

    #[test]
    fn test_summary_contains_every_vm_name() {
        let summary = summarize_envelope(&fixture_envelope());
        assert!(summary.contains("Total VMs: 2"));
        assert!(summary.contains("vm-web-01"));
        assert!(summary.contains("vm-db-01"));
        assert!(summary.contains("SIMULATION MODE"));
        assert!(summary.contains("Standard_DS2_v2"));
    }

    #[test]
    fn test_summary_of_failed_envelope_reports_the_error() {
        let envelope = ResourceEnvelope::failed(
            EnvelopeError::transport("connection refused"),
            AccessMode::Delegated,
        );
        let summary = summarize_envelope(&envelope);
        assert!(summary.starts_with("Error fetching resources:"));
        assert!(summary.contains("connection refused"));
    }
}
