/*!
Fixtures de cluster pour les tests

Construction rapide de structures racks → machines, d'états, de réponses
subscribe/update et d'événements de log.
*/

use clusterviz_client::models::{
    ClusterState, LogEvent, NodeState, Severity, StateChange, StructureNode, SubscribeResponse, Timestamp,
    UpdateResponse,
};
use serde_json::Value;

/// Root → racks → machines.
pub fn structure(racks: &[(&str, &[&str])]) -> StructureNode {
    StructureNode {
        name: "root".into(),
        children: racks
            .iter()
            .map(|(rack, machines)| StructureNode {
                name: rack.to_string(),
                children: machines
                    .iter()
                    .map(|m| StructureNode {
                        name: m.to_string(),
                        children: Vec::new(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// One node per `(name, health)`, other metrics unset.
pub fn state(nodes: &[(&str, f64)]) -> ClusterState {
    nodes
        .iter()
        .map(|(name, health)| {
            (
                name.to_string(),
                NodeState {
                    health: Some(*health),
                    ..Default::default()
                },
            )
        })
        .collect()
}

pub fn log_event(severity: Severity, location: &str, message: &str) -> LogEvent {
    LogEvent {
        id: None,
        timestamp: Some(Timestamp::Millis(chrono::Utc::now().timestamp_millis() as f64)),
        severity,
        facility: Some("kernel".into()),
        location: Some(location.into()),
        message: message.into(),
    }
}

pub fn subscribe_ok(client_id: &str, structure: StructureNode, state: ClusterState) -> SubscribeResponse {
    SubscribeResponse {
        successful: true,
        client_id: Some(client_id.into()),
        current_state: Some(state),
        structure: Some(structure),
        message: None,
    }
}

pub fn subscribe_declined(message: &str) -> SubscribeResponse {
    SubscribeResponse {
        successful: false,
        message: Some(message.into()),
        ..Default::default()
    }
}

/// Successful update; `delta` is the JSON `stateChange` object.
pub fn update_ok(events: Vec<LogEvent>, delta: Value) -> UpdateResponse {
    let state_change: StateChange = serde_json::from_value(delta).unwrap_or_else(|e| panic!("invalid stateChange fixture: {}", e));
    UpdateResponse {
        successful: true,
        events,
        state_change,
        message: None,
    }
}

pub fn update_empty() -> UpdateResponse {
    UpdateResponse {
        successful: true,
        ..Default::default()
    }
}

pub fn update_declined(message: &str) -> UpdateResponse {
    UpdateResponse {
        successful: false,
        message: Some(message.into()),
        ..Default::default()
    }
}

/// rack1 with machine1 (health 0.9) and machine2 (health 0.4).
pub fn example_cluster() -> (StructureNode, ClusterState) {
    (
        structure(&[("rack1", &["machine1", "machine2"])]),
        state(&[("machine1", 0.9), ("machine2", 0.4)]),
    )
}

/// machine1 drops to 0.85 and receives one warning, which is also logged.
pub fn example_update() -> UpdateResponse {
    let event = log_event(Severity::Warn, "machine1", "fan speed low");
    update_ok(
        vec![event.clone()],
        serde_json::json!({
            "machine1": {"health": 0.85, "events": [event]}
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_builder() {
        let tree = structure(&[("r1", &["a", "b"]), ("r2", &["c"])]);
        assert_eq!(tree.machine_count(), 3);
        let pairs: Vec<_> = tree.machines().collect();
        assert_eq!(pairs, vec![("r1", "a"), ("r1", "b"), ("r2", "c")]);
    }

    #[test]
    fn test_example_update_shape() {
        let update = example_update();
        assert_eq!(update.events.len(), 1);
        let delta = &update.state_change["machine1"];
        assert_eq!(delta.health, Some(Some(0.85)));
        assert_eq!(delta.events.as_ref().map(Vec::len), Some(1));
        assert!(delta.unknown.is_empty());
    }
}
