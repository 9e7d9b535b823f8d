//! Diagnostic pipeline
//!
//! One pass from resource fetch to optional fix: inventory and rule
//! reads, the heuristic health check, backend analysis and remediation
//! steps, then the RDP rule write plus verification when fixes were
//! requested. The pipeline only consumes documented envelope fields and
//! renders every failure as report text instead of aborting.

use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::agent::diagnostic::{self, DiagnosticAgent, HealthSummary};
use crate::agent::resolution::ResolutionAgent;
use crate::azure::auth::AccessMode;
use crate::azure::client::{has_rule_for_port, AzureClient, RDP_PORT};
use crate::azure::envelope::MutationResult;
use crate::config::Config;
use crate::metrics::AgentMetrics;

/// Root-cause label recorded when the RDP allow rule is missing.
const RDP_RULE_MISSING: &str = "rdp_rule_missing";
/// Fix-type label for the rule write.
const FIX_ADD_RDP_RULE: &str = "add_rdp_rule";

/// Canned report text used when no reasoning backend is configured.
const SIMULATED_ANALYSIS: &str = "Simulated analysis: one VM (vm-db-01) is stopped, and the \
network security group has no inbound allow rule for RDP (port 3389), so remote desktop \
connections to vm-web-01 will time out at the network layer.";

const SIMULATED_RESOLUTION: &str = "Simulated resolution steps:\n\
1. Add an inbound allow rule for TCP 3389 to the network security group (re-run with --apply).\n\
2. Start vm-db-01 if it is meant to be serving.\n\
3. Re-test the RDP connection once the rule has propagated.";

/// Everything one pipeline pass produced.
#[derive(Debug)]
pub struct RunReport {
    pub mode: AccessMode,
    pub simulated: bool,
    pub vm_count: usize,
    /// `None` when the resource-group read failed.
    pub resource_group_count: Option<usize>,
    pub health: HealthSummary,
    /// `None` when the rule read failed and presence is unknown.
    pub rdp_rule_present: Option<bool>,
    /// Incident id minted when the RDP rule was found missing.
    pub incident: Option<Uuid>,
    pub diagnosis: String,
    pub remediation: String,
    /// Outcome of the rule write, when fixes were requested and needed.
    pub applied: Option<MutationResult>,
    pub duration: Duration,
}

pub struct Pipeline {
    client: AzureClient,
    diagnostic: Option<DiagnosticAgent>,
    resolution: Option<ResolutionAgent>,
    metrics: AgentMetrics,
    resource_group: String,
    security_group: String,
    apply_fixes: bool,
}

impl Pipeline {
    pub fn new(
        client: AzureClient,
        diagnostic: Option<DiagnosticAgent>,
        resolution: Option<ResolutionAgent>,
        metrics: AgentMetrics,
        config: &Config,
        apply_fixes: bool,
    ) -> Self {
        Self {
            client,
            diagnostic,
            resolution,
            metrics,
            resource_group: config.resource_group.clone(),
            security_group: config.security_group.clone(),
            apply_fixes,
        }
    }

    /// Execute one diagnostic pass.
    pub async fn run(&self) -> RunReport {
        let started = Instant::now();
        self.metrics.record_run();

        let info = self.client.connection_info();
        print_section("Connection");
        println!("  Mode:         {}", info.mode);
        println!("  Auth method:  {}", info.auth_method);
        println!("  Subscription: {}", info.subscription_id);

        print_section("Resource data");
        let fetch_started = Instant::now();
        let (inventory, rules, groups) = futures::join!(
            self.client.list_virtual_machines(),
            self.client
                .list_network_rules(&self.resource_group, &self.security_group),
            self.client.list_resource_groups(),
        );

        if let Some(error) = &inventory.error {
            self.metrics.record_error();
            tracing::error!(kind = error.kind.label(), "Inventory fetch failed");
            println!("  {}", error.user_message());
        } else {
            let tag = if inventory.simulated { "SIMULATED" } else { "LIVE" };
            println!(
                "  [{}] {} VMs fetched in {:.2}s",
                tag,
                inventory.items.len(),
                fetch_started.elapsed().as_secs_f64()
            );
            self.metrics.set_vms_monitored(inventory.items.len());
        }

        let resource_group_count = match &groups.error {
            Some(error) => {
                self.metrics.record_error();
                println!("  Resource group read failed: {}", error.user_message());
                None
            }
            None => {
                println!("  Resource groups: {}", groups.items.len());
                Some(groups.items.len())
            }
        };

        let health = diagnostic::quick_health_check(&inventory);
        println!(
            "  Health: {} total, {} running, {} stopped",
            health.total, health.running, health.stopped
        );
        for issue in &health.issues {
            println!("  Issue: {}", issue);
        }

        let rdp_rule_present = match &rules.error {
            Some(error) => {
                self.metrics.record_error();
                println!("  Rule read failed: {}", error.user_message());
                None
            }
            None => Some(has_rule_for_port(&rules.items, RDP_PORT)),
        };

        let mut incident = None;
        if rdp_rule_present == Some(false) {
            let id = Uuid::new_v4();
            tracing::warn!(
                incident = %id,
                nsg = %self.security_group,
                "No inbound rule allows RDP"
            );
            println!(
                "  Issue: no inbound rule allows RDP (port {}) on '{}' [incident {}]",
                RDP_PORT, self.security_group, id
            );
            self.metrics
                .record_issue_detected(RDP_RULE_MISSING, &self.security_group, &self.resource_group);
            incident = Some(id);
        }

        print_section("Diagnostic analysis");
        let analysis_started = Instant::now();
        let diagnosis = match &self.diagnostic {
            Some(agent) => agent.analyze(&inventory).await,
            None => {
                println!("  (no reasoning backend configured, using canned analysis)");
                SIMULATED_ANALYSIS.to_string()
            }
        };
        self.metrics.observe_analysis(analysis_started.elapsed());
        print_block(&diagnosis);

        print_section("Suggested resolution");
        let remediation_started = Instant::now();
        let remediation = match &self.resolution {
            Some(agent) => agent.suggest_fixes(&diagnosis).await,
            None => SIMULATED_RESOLUTION.to_string(),
        };
        self.metrics
            .observe_remediation(remediation_started.elapsed());
        print_block(&remediation);

        let applied = if rdp_rule_present == Some(false) {
            if self.apply_fixes {
                Some(self.apply_rdp_fix(incident).await)
            } else {
                println!("\n  The RDP rule fix was not applied; re-run with --apply to write it.");
                None
            }
        } else {
            None
        };

        let duration = started.elapsed();
        print_section("Summary");
        println!("  Mode:      {}", info.mode);
        println!("  VMs:       {}", health.total);
        match rdp_rule_present {
            Some(true) => println!("  RDP rule:  present"),
            Some(false) => println!("  RDP rule:  missing"),
            None => println!("  RDP rule:  unknown (rule read failed)"),
        }
        if let Some(result) = &applied {
            println!(
                "  Fix:       {}",
                if result.succeeded {
                    result.detail.as_str()
                } else {
                    "failed"
                }
            );
        }
        println!("  Duration:  {:.2}s", duration.as_secs_f64());

        RunReport {
            mode: info.mode,
            simulated: inventory.simulated,
            vm_count: inventory.items.len(),
            resource_group_count,
            health,
            rdp_rule_present,
            incident,
            diagnosis,
            remediation,
            applied,
            duration,
        }
    }

    /// Write the RDP rule and, for live changes, re-read the rule set to
    /// confirm the write is visible.
    async fn apply_rdp_fix(&self, incident: Option<Uuid>) -> MutationResult {
        print_section("Applying fix");
        let fix_started = Instant::now();
        let result = self
            .client
            .add_remote_desktop_rule(&self.resource_group, &self.security_group)
            .await;

        if result.succeeded {
            self.metrics.record_resolution_success(
                FIX_ADD_RDP_RULE,
                &self.security_group,
                fix_started.elapsed(),
            );
            println!("  {}", result.detail);
            if result.simulated {
                tracing::info!("Simulated change, skipping verification");
            } else {
                self.verify_rdp_rule().await;
            }
        } else {
            let reason = result
                .error
                .as_ref()
                .map(|e| e.kind.label())
                .unwrap_or("unknown");
            self.metrics.record_resolution_failure(FIX_ADD_RDP_RULE, reason);
            self.metrics.record_escalation(reason, &self.security_group);
            if let Some(error) = &result.error {
                println!("  Fix failed: {}", error.user_message());
            }
            tracing::error!(incident = ?incident, reason, "Remediation failed, escalating");
            println!("  Escalating to a human operator.");
        }

        result
    }

    async fn verify_rdp_rule(&self) {
        let started = Instant::now();
        let rules = self
            .client
            .list_network_rules(&self.resource_group, &self.security_group)
            .await;
        self.metrics.observe_verification(started.elapsed());

        match &rules.error {
            Some(error) => println!("  Verification inconclusive: {}", error.user_message()),
            None if has_rule_for_port(&rules.items, RDP_PORT) => {
                println!("  Verified: the RDP rule is visible on '{}'", self.security_group);
            }
            None => println!("  Verification failed: the RDP rule is not visible yet"),
        }
    }
}

fn print_section(title: &str) {
    println!("\n=== {} ===", title);
}

fn print_block(text: &str) {
    for line in text.lines() {
        println!("  {}", line);
    }
}
