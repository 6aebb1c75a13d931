use crate::merge::{self, MergeReport};
use crate::models::{ClusterState, LogEvent, NodeState, StateChange, StructureNode};
use std::collections::HashSet;
use tracing::error;

/// Everything one subscription knows about the cluster.
#[derive(Debug, Clone, Default)]
pub struct ClusterStore {
    structure: StructureNode,
    state: ClusterState,
    logs: Vec<LogEvent>,
    machines: HashSet<String>,
}

impl ClusterStore {
    pub fn new(structure: StructureNode, state: ClusterState) -> Self {
        let mut store = Self::default();
        store.replace(structure, state);
        store
    }

    /// Swaps in a new structure and state and clears the cumulative log.
    pub fn replace(&mut self, structure: StructureNode, state: ClusterState) {
        self.structure = structure;
        self.state = state;
        self.logs.clear();
        self.machines = self.structure.machines().map(|(_, machine)| machine.to_string()).collect();
        self.attach_racks();
    }

    // Machines carry their rack name; a machine the server left out gets an empty entry.
    fn attach_racks(&mut self) {
        for rack in &self.structure.children {
            for machine in &rack.children {
                match self.state.get_mut(&machine.name) {
                    Some(node) => node.rack = Some(rack.name.clone()),
                    None => {
                        error!("[store] no state for machine '{}' in rack '{}'", machine.name, rack.name);
                        self.state.insert(
                            machine.name.clone(),
                            NodeState { rack: Some(rack.name.clone()), ..NodeState::default() },
                        );
                    }
                }
            }
        }
    }

    /// Records the update's log events, then merges its state change.
    pub fn apply_update(&mut self, events: Vec<LogEvent>, delta: StateChange) -> MergeReport {
        let (recorded, dropped) = merge::record_logs(&mut self.logs, &self.state, events);
        let mut report = merge::merge(&mut self.state, delta);
        report.logs_recorded = recorded;
        report.logs_dropped = dropped;
        report
    }

    pub fn structure(&self) -> &StructureNode {
        &self.structure
    }

    pub fn state(&self) -> &ClusterState {
        &self.state
    }

    pub fn node(&self, name: &str) -> Option<&NodeState> {
        self.state.get(name)
    }

    pub fn logs(&self) -> &[LogEvent] {
        &self.logs
    }

    pub fn is_machine(&self, name: &str) -> bool {
        self.machines.contains(name)
    }

    /// Machine entries, in no particular order.
    pub fn machines(&self) -> impl Iterator<Item = (&str, &NodeState)> + '_ {
        self.state
            .iter()
            .filter(|(name, _)| self.machines.contains(name.as_str()))
            .map(|(name, node)| (name.as_str(), node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn structure() -> StructureNode {
        serde_json::from_value(json!({
            "name": "root",
            "children": [{"name": "rack1", "children": [{"name": "machine1"}, {"name": "machine2"}]}]
        }))
        .unwrap()
    }

    fn state() -> ClusterState {
        serde_json::from_value(json!({
            "rack1": {"health": 0.7, "events": []},
            "machine1": {"health": 0.9, "events": []},
            "machine2": {"health": 0.4, "events": []}
        }))
        .unwrap()
    }

    #[test]
    fn test_racks_attached_to_machines() {
        let store = ClusterStore::new(structure(), state());
        assert_eq!(store.node("machine1").unwrap().rack.as_deref(), Some("rack1"));
        assert_eq!(store.node("rack1").unwrap().rack, None);
        assert!(store.is_machine("machine2"));
        assert!(!store.is_machine("rack1"));
        assert_eq!(store.machines().count(), 2);
    }

    #[test]
    fn test_missing_machine_gets_entry() {
        let mut partial = state();
        partial.remove("machine2");
        let store = ClusterStore::new(structure(), partial);

        let node = store.node("machine2").unwrap();
        assert_eq!(node.rack.as_deref(), Some("rack1"));
        assert_eq!(node.health, None);
    }

    #[test]
    fn test_replace_resets_logs() {
        let mut store = ClusterStore::new(structure(), state());
        let events = serde_json::from_value(json!([{"severity": "INFO", "location": "machine1", "message": "x"}])).unwrap();
        let report = store.apply_update(events, StateChange::new());
        assert_eq!(report.logs_recorded, 1);
        assert_eq!(store.logs().len(), 1);

        store.replace(structure(), state());
        assert!(store.logs().is_empty());
    }
}
