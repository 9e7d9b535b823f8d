//! Property-based tests for mode parsing, envelopes and rule matching
//!
//! These pin the invariants that the rest of the agent leans on: the
//! forced-mode literals parse the same under any casing, failed envelopes
//! never smuggle items, and port matching treats ranges consistently.

use proptest::prelude::*;
use serde_json::{json, Value};

use azdiag::agent::diagnostic::summarize_envelope;
use azdiag::agent::resolution::{prioritize_fixes, FixPriority};
use azdiag::azure::auth::{AccessMode, ForcedMode};
use azdiag::azure::client::has_rule_for_port;
use azdiag::azure::envelope::{json_path_str, EnvelopeError, ResourceEnvelope};

/// One of the four accepted mode literals with randomized casing, paired
/// with the mode it must parse to.
fn arb_valid_mode_literal() -> impl Strategy<Value = (String, ForcedMode)> {
    (
        prop::sample::select(vec![
            ("auto", ForcedMode::Auto),
            ("offline", ForcedMode::Mode(AccessMode::Offline)),
            ("delegated", ForcedMode::Mode(AccessMode::Delegated)),
            ("noninteractive", ForcedMode::Mode(AccessMode::NonInteractive)),
        ]),
        any::<u32>(),
    )
        .prop_map(|((base, expected), case_mask)| {
            let mixed = base
                .chars()
                .enumerate()
                .map(|(i, c)| {
                    if (case_mask >> (i % 32)) & 1 == 1 {
                        c.to_ascii_uppercase()
                    } else {
                        c
                    }
                })
                .collect::<String>();
            (mixed, expected)
        })
}

/// Strings that are not a mode literal under any casing or padding.
fn arb_invalid_mode_literal() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 _-]{0,16}".prop_filter("must not be an accepted literal", |s| {
        !matches!(
            s.trim().to_ascii_uppercase().as_str(),
            "AUTO" | "OFFLINE" | "DELEGATED" | "NONINTERACTIVE"
        )
    })
}

fn arb_resource_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,12}"
}

fn arb_items() -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec(
        arb_resource_name().prop_map(|name| json!({"name": name})),
        0..8,
    )
}

fn rule_with_range(range: &str) -> Value {
    json!({
        "name": "rule-under-test",
        "properties": {"destinationPortRange": range}
    })
}

/// Filler text that cannot accidentally form a priority keyword.
fn arb_keyword_free_filler() -> impl Strategy<Value = String> {
    "[xq ]{0,8}"
}

mod mode_literal_tests {
    use super::*;

    proptest! {
        /// Accepted literals parse to their mode under any casing
        #[test]
        fn parse_accepts_any_casing((mixed, expected) in arb_valid_mode_literal()) {
            prop_assert_eq!(ForcedMode::parse(&mixed), Some(expected));
        }

        /// Surrounding whitespace never changes the parse result
        #[test]
        fn parse_ignores_padding((mixed, expected) in arb_valid_mode_literal()) {
            let padded = format!("  {}\t", mixed);
            prop_assert_eq!(ForcedMode::parse(&padded), Some(expected));
        }

        /// Anything outside the four literals is rejected
        #[test]
        fn parse_rejects_everything_else(raw in arb_invalid_mode_literal()) {
            prop_assert_eq!(ForcedMode::parse(&raw), None);
        }
    }
}

mod envelope_tests {
    use super::*;

    proptest! {
        /// Failed envelopes never carry items and never claim simulation
        #[test]
        fn failed_envelopes_are_empty(status in 400u16..600) {
            let envelope = ResourceEnvelope::failed(
                EnvelopeError::provider(status, "body"),
                AccessMode::Delegated,
            );
            prop_assert!(envelope.items.is_empty());
            prop_assert!(!envelope.simulated);
            prop_assert!(envelope.is_err());
        }

        /// Simulated envelopes preserve items and never carry an error
        #[test]
        fn simulated_envelopes_preserve_items(items in arb_items()) {
            let envelope = ResourceEnvelope::simulated(items.clone());
            prop_assert_eq!(&envelope.items, &items);
            prop_assert!(envelope.simulated);
            prop_assert_eq!(envelope.mode, AccessMode::Offline);
            prop_assert!(envelope.error.is_none());
        }

        /// Live envelopes preserve items under any live mode
        #[test]
        fn live_envelopes_preserve_items(items in arb_items(), delegated in any::<bool>()) {
            let mode = if delegated { AccessMode::Delegated } else { AccessMode::NonInteractive };
            let envelope = ResourceEnvelope::live(items.clone(), mode);
            prop_assert_eq!(&envelope.items, &items);
            prop_assert!(!envelope.simulated);
            prop_assert!(envelope.error.is_none());
        }
    }
}

mod port_matching_tests {
    use super::*;

    proptest! {
        /// An exact-port rule matches that port and only that port
        #[test]
        fn exact_rule_matches_its_own_port(port in 1u16..=65535, other in 1u16..=65535) {
            let rules = vec![rule_with_range(&port.to_string())];
            prop_assert!(has_rule_for_port(&rules, port));
            if other != port {
                prop_assert!(!has_rule_for_port(&rules, other));
            }
        }

        /// A wildcard rule matches every port
        #[test]
        fn wildcard_rule_matches_everything(port in 1u16..=65535) {
            let rules = vec![rule_with_range("*")];
            prop_assert!(has_rule_for_port(&rules, port));
        }

        /// A range rule matches exactly the ports inside its bounds
        #[test]
        fn range_rule_matches_interior(a in 1u16..=65535, b in 1u16..=65535, port in 1u16..=65535) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            let rules = vec![rule_with_range(&format!("{}-{}", low, high))];
            prop_assert_eq!(
                has_rule_for_port(&rules, port),
                low <= port && port <= high
            );
        }

        /// Rules without a parseable range never match
        #[test]
        fn unparseable_ranges_never_match(range in "[a-z]{1,8}", port in 1u16..=65535) {
            let rules = vec![rule_with_range(&range)];
            prop_assert!(!has_rule_for_port(&rules, port));
        }
    }
}

mod fix_ranking_tests {
    use super::*;

    proptest! {
        /// Ranking preserves every fix and orders by priority
        #[test]
        fn ranking_is_a_sorted_permutation(fixes in prop::collection::vec("[a-z ]{0,20}", 0..12)) {
            let ranked = prioritize_fixes(fixes.clone());
            prop_assert_eq!(ranked.len(), fixes.len());
            prop_assert!(ranked.windows(2).all(|w| w[0].priority <= w[1].priority));
            for entry in &ranked {
                prop_assert!(fixes.contains(&entry.fix));
            }
        }

        /// Security wording always ranks critical
        #[test]
        fn security_fixes_rank_critical(
            before in arb_keyword_free_filler(),
            after in arb_keyword_free_filler(),
        ) {
            let fix = format!("{}security{}", before, after);
            let ranked = prioritize_fixes(vec![fix]);
            prop_assert_eq!(ranked[0].priority, FixPriority::Critical);
        }

        /// Cost wording ranks low when nothing more urgent appears
        #[test]
        fn cost_fixes_rank_low(
            before in arb_keyword_free_filler(),
            after in arb_keyword_free_filler(),
        ) {
            let fix = format!("{}cost{}", before, after);
            let ranked = prioritize_fixes(vec![fix]);
            prop_assert_eq!(ranked[0].priority, FixPriority::Low);
        }

        /// Keyword-free fixes default to medium
        #[test]
        fn plain_fixes_rank_medium(fix in arb_keyword_free_filler()) {
            let ranked = prioritize_fixes(vec![fix]);
            prop_assert_eq!(ranked[0].priority, FixPriority::Medium);
        }
    }
}

mod summary_tests {
    use super::*;

    proptest! {
        /// The text summary names every resource in the envelope
        #[test]
        fn summary_names_every_resource(names in prop::collection::vec(arb_resource_name(), 0..8)) {
            let items: Vec<Value> = names
                .iter()
                .map(|name| json!({"name": name, "location": "eastus"}))
                .collect();
            let summary = summarize_envelope(&ResourceEnvelope::simulated(items));
            for name in &names {
                prop_assert!(summary.contains(name.as_str()));
            }
        }

        /// Path extraction round-trips plain string leaves
        #[test]
        fn json_path_extracts_string_leaves(
            key in "[a-z]{1,8}",
            value in "[a-zA-Z0-9 ]{0,16}",
        ) {
            let record = json!({"wrapper": {(key.clone()): value.clone()}});
            let path = format!("wrapper.{}", key);
            prop_assert_eq!(json_path_str(&record, &path), value);
        }

        /// Missing paths answer with the placeholder instead of panicking
        #[test]
        fn json_path_defaults_missing_segments(path in "[a-z]{1,6}(\\.[a-z]{1,6}){0,3}") {
            let record = json!({"only": "this"});
            let extracted = json_path_str(&record, &path);
            if path != "only" {
                prop_assert_eq!(extracted, "-");
            }
        }
    }
}
