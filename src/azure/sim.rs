//! Simulated datasets for offline mode
//!
//! Fixed fixtures embedded at compile time, parsed once on first access.
//! The inventory always holds exactly two VMs, one running and one
//! stopped, and the rule set deliberately lacks an RDP (port 3389) allow
//! rule so the misconfiguration the agent exists to detect is always
//! reproducible offline.

use serde_json::Value;
use std::sync::OnceLock;

const VMS_JSON: &str = include_str!("simdata/vms.json");
const NSG_RULES_JSON: &str = include_str!("simdata/nsg_rules.json");
const RESOURCE_GROUPS_JSON: &str = include_str!("simdata/resource_groups.json");

fn parse_items(raw: &str, what: &str) -> Vec<Value> {
    serde_json::from_str(raw)
        .unwrap_or_else(|e| panic!("Failed to parse embedded {} fixture: {}", what, e))
}

/// The fixed two-VM inventory.
pub fn virtual_machines() -> &'static [Value] {
    static CELL: OnceLock<Vec<Value>> = OnceLock::new();
    CELL.get_or_init(|| parse_items(VMS_JSON, "vms"))
}

/// Inbound rules of the simulated network security group. Never contains
/// a rule for the RDP port.
pub fn network_rules() -> &'static [Value] {
    static CELL: OnceLock<Vec<Value>> = OnceLock::new();
    CELL.get_or_init(|| parse_items(NSG_RULES_JSON, "nsg_rules"))
}

/// The fixed resource group listing.
pub fn resource_groups() -> &'static [Value] {
    static CELL: OnceLock<Vec<Value>> = OnceLock::new();
    CELL.get_or_init(|| parse_items(RESOURCE_GROUPS_JSON, "resource_groups"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::envelope::json_path_str;

    #[test]
    fn test_inventory_holds_one_running_and_one_stopped_vm() {
        let vms = virtual_machines();
        assert_eq!(vms.len(), 2);

        let states: Vec<String> = vms
            .iter()
            .map(|vm| json_path_str(vm, "properties.powerState"))
            .collect();
        assert!(states.contains(&"running".to_string()));
        assert!(states.contains(&"stopped".to_string()));
    }

    #[test]
    fn test_inventory_records_are_fully_shaped() {
        for vm in virtual_machines() {
            assert_ne!(json_path_str(vm, "name"), "-");
            assert_ne!(json_path_str(vm, "location"), "-");
            assert_ne!(json_path_str(vm, "properties.hardwareProfile.vmSize"), "-");
            assert_ne!(json_path_str(vm, "tags.environment"), "-");
        }
    }

    #[test]
    fn test_rule_set_never_allows_rdp() {
        let rules = network_rules();
        assert!(!rules.is_empty());
        for rule in rules {
            assert_ne!(
                json_path_str(rule, "properties.destinationPortRange"),
                "3389"
            );
        }
    }

    #[test]
    fn test_resource_groups_cover_two_regions() {
        let groups = resource_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(json_path_str(&groups[0], "name"), "rg-production");
        assert_eq!(json_path_str(&groups[1], "location"), "westus");
    }
}
