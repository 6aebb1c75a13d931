//! State merge engine: applies sparse node deltas and records log events.

use crate::models::{ClusterState, LogEvent, NodeDelta, NodeState, Patch, StateChange};
use tracing::{error, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub nodes_updated: usize,
    pub node_events_appended: usize,
    pub logs_recorded: usize,
    pub logs_dropped: usize,
    /// Delta keys naming nodes absent from the state, sorted.
    pub unknown_nodes: Vec<String>,
}

/// Applies `delta` in place. Nodes are never created; unknown names are skipped.
pub fn merge(state: &mut ClusterState, delta: StateChange) -> MergeReport {
    let mut report = MergeReport::default();

    for (name, changes) in delta {
        let Some(node) = state.get_mut(&name) else {
            error!("[merge] state change for unknown node '{}' dropped", name);
            report.unknown_nodes.push(name);
            continue;
        };
        report.node_events_appended += apply_node_delta(&name, node, changes);
        report.nodes_updated += 1;
    }

    report.unknown_nodes.sort();
    report
}

fn apply_node_delta(name: &str, node: &mut NodeState, delta: NodeDelta) -> usize {
    let NodeDelta {
        cpu_usage,
        memory_usage,
        context_switch_rate,
        health,
        last_failure_time,
        predicted_failure_time,
        average_minutes_between_failures,
        predicted_severity_probabilities,
        rack,
        events,
        unknown,
    } = delta;

    overwrite(&mut node.cpu_usage, cpu_usage);
    overwrite(&mut node.memory_usage, memory_usage);
    overwrite(&mut node.context_switch_rate, context_switch_rate);
    overwrite(&mut node.health, health);
    overwrite(&mut node.last_failure_time, last_failure_time);
    overwrite(&mut node.predicted_failure_time, predicted_failure_time);
    overwrite(&mut node.average_minutes_between_failures, average_minutes_between_failures);
    overwrite(&mut node.predicted_severity_probabilities, predicted_severity_probabilities);
    overwrite(&mut node.rack, rack);

    for key in unknown.keys() {
        warn!("[merge] ignoring unknown attribute '{}' on node '{}'", key, name);
    }

    match events {
        Some(events) => {
            let appended = events.len();
            node.events.extend(events);
            appended
        }
        None => 0,
    }
}

fn overwrite<T>(slot: &mut Option<T>, patch: Patch<T>) {
    if let Some(value) = patch {
        *slot = value;
    }
}

/// Assigns `id = logs.len()` to each event and appends it.
///
/// Events located on a node the state doesn't know are dropped before an id
/// is handed out, so ids stay contiguous. Returns `(recorded, dropped)`.
pub fn record_logs(logs: &mut Vec<LogEvent>, state: &ClusterState, events: Vec<LogEvent>) -> (usize, usize) {
    let mut recorded = 0;
    let mut dropped = 0;

    for mut event in events {
        if let Some(location) = event.location.as_deref() {
            if !state.contains_key(location) {
                error!("[merge] log event references unknown node '{}', dropped", location);
                dropped += 1;
                continue;
            }
        }
        event.id = Some(logs.len() as u64);
        logs.push(event);
        recorded += 1;
    }

    (recorded, dropped)
}
