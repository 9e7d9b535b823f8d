//! Resolution agent
//!
//! Generates remediation steps from a diagnostic report, plus the keyword
//! heuristics used to rank suggested fixes without any backend involved.

use std::fmt;
use std::time::Instant;

use crate::metrics::AgentMetrics;

use super::openai::ChatClient;

const SYSTEM_PROMPT: &str = "You are an expert DevOps engineer specializing in Azure \
infrastructure automation, remediation, and optimization.";

const RESOLUTION_TEMPERATURE: f32 = 0.7;
const RESOLUTION_MAX_TOKENS: u32 = 2000;

/// Priority rank for a suggested fix, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FixPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl FixPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixPriority::Critical => "critical",
            FixPriority::High => "high",
            FixPriority::Medium => "medium",
            FixPriority::Low => "low",
        }
    }
}

impl fmt::Display for FixPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrioritizedFix {
    pub fix: String,
    pub priority: FixPriority,
}

pub struct ResolutionAgent {
    chat: ChatClient,
    metrics: AgentMetrics,
}

impl ResolutionAgent {
    pub fn new(chat: ChatClient, metrics: AgentMetrics) -> Self {
        Self { chat, metrics }
    }

    /// Generate remediation steps for a diagnostic report.
    pub async fn suggest_fixes(&self, diagnosis: &str) -> String {
        tracing::info!("Generating resolution steps");

        let prompt = resolution_prompt(diagnosis);
        let started = Instant::now();

        match self
            .chat
            .complete(
                SYSTEM_PROMPT,
                &prompt,
                RESOLUTION_TEMPERATURE,
                RESOLUTION_MAX_TOKENS,
            )
            .await
        {
            Ok(completion) => {
                self.metrics.record_backend_call(
                    &completion.model,
                    "remediation",
                    completion.total_tokens,
                    started.elapsed(),
                );
                completion.text
            }
            Err(e) => {
                tracing::error!("Resolution generation failed: {:#}", e);
                self.metrics.record_error();
                format!("Resolution generation failed: {e:#}")
            }
        }
    }
}

fn resolution_prompt(diagnosis: &str) -> String {
    format!(
        "You are an expert DevOps Engineer and Azure Solutions Architect.\n\
         Based on the following diagnostic analysis, provide detailed, actionable resolution steps.\n\n\
         Diagnostic Analysis:\n{}\n\n\
         Please provide:\n\
         1. Immediate Actions: steps to take right now for critical issues\n\
         2. Short-term Improvements: changes to make this week\n\
         3. Long-term Strategy: architectural improvements for the next quarter\n\
         4. Automation Opportunities: tasks that could be automated\n\
         5. Implementation Guide: az CLI commands or portal steps where applicable\n\n\
         Be specific and include concrete commands where possible.",
        diagnosis
    )
}

/// Rank fixes by keyword heuristics, most urgent first. Ordering is
/// stable within a priority level.
pub fn prioritize_fixes(fixes: Vec<String>) -> Vec<PrioritizedFix> {
    fn classify(fix: &str) -> FixPriority {
        let lower = fix.to_lowercase();
        let contains_any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if contains_any(&["critical", "security", "down", "failed"]) {
            FixPriority::Critical
        } else if contains_any(&["performance", "slow", "timeout"]) {
            FixPriority::High
        } else if contains_any(&["cost", "optimize", "unused"]) {
            FixPriority::Low
        } else {
            FixPriority::Medium
        }
    }

    let mut ranked: Vec<PrioritizedFix> = fixes
        .into_iter()
        .map(|fix| PrioritizedFix {
            priority: classify(&fix),
            fix,
        })
        .collect();
    ranked.sort_by_key(|entry| entry.priority);
    ranked
}
