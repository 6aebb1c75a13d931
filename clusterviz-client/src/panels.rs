//! Side panels: rankings, event feed and summary, recomputed from the store on every tick.

use crate::models::{LogEvent, MetricKey};
use crate::store::ClusterStore;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

impl SortDirection {
    pub fn toggled(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PanelSettings {
    pub ranking_metric: MetricKey,
    pub ranking_direction: SortDirection,
    pub ranking_size: usize,
    pub feed_size: usize,
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            ranking_metric: MetricKey::Health,
            ranking_direction: SortDirection::Ascending,
            ranking_size: 10,
            feed_size: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingEntry {
    pub name: String,
    pub rack: Option<String>,
    pub value: Option<f64>,
}

/// Machines ordered by `metric`, ties by ascending name, valueless entries last.
pub fn rankings(store: &ClusterStore, metric: MetricKey, direction: SortDirection, limit: usize) -> Vec<RankingEntry> {
    let mut entries: Vec<RankingEntry> = store
        .machines()
        .map(|(name, node)| RankingEntry {
            name: name.to_string(),
            rack: node.rack.clone(),
            value: node.metric(metric),
        })
        .collect();

    entries.sort_by(|a, b| compare_values(a.value, b.value, direction).then_with(|| a.name.cmp(&b.name)));
    entries.truncate(limit);
    entries
}

fn compare_values(a: Option<f64>, b: Option<f64>, direction: SortDirection) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match direction {
            SortDirection::Ascending => a.total_cmp(&b),
            SortDirection::Descending => b.total_cmp(&a),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Newest first.
pub fn recent_events(logs: &[LogEvent], limit: usize) -> Vec<LogEvent> {
    logs.iter().rev().take(limit).cloned().collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub node_count: usize,
    pub mean_health: Option<f64>,
    pub min_health: Option<f64>,
    pub max_health: Option<f64>,
    pub mean_cpu: Option<f64>,
    pub mean_memory: Option<f64>,
    /// Sum of per-node event lists.
    pub total_events: usize,
    /// Length of the cumulative log; diverges from `total_events` after a data-source change.
    pub logged_events: usize,
}

pub fn summarize(store: &ClusterStore) -> Summary {
    let nodes = store.state().values();
    let mut health = Vec::new();
    let mut cpu = Vec::new();
    let mut memory = Vec::new();
    let mut total_events = 0;

    for node in nodes {
        health.extend(node.health);
        cpu.extend(node.cpu_usage);
        memory.extend(node.memory_usage);
        total_events += node.events.len();
    }

    Summary {
        node_count: store.state().len(),
        mean_health: mean(&health),
        min_health: health.iter().copied().reduce(f64::min),
        max_health: health.iter().copied().reduce(f64::max),
        mean_cpu: mean(&cpu),
        mean_memory: mean(&memory),
        total_events,
        logged_events: store.logs().len(),
    }
}

impl Summary {
    /// One-line digest; node events and logged events are counted apart.
    pub fn headline(&self) -> String {
        let fmt = |v: Option<f64>| v.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into());
        format!(
            "{} nodes | health mean {} min {} | cpu {} | mem {} | {} node events, {} logged",
            self.node_count,
            fmt(self.mean_health),
            fmt(self.min_health),
            fmt(self.mean_cpu),
            fmt(self.mean_memory),
            self.total_events,
            self.logged_events
        )
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Panels {
    pub rankings: Vec<RankingEntry>,
    pub feed: Vec<LogEvent>,
    pub summary: Summary,
}

impl Panels {
    pub fn compute(store: &ClusterStore, settings: &PanelSettings) -> Self {
        Self {
            rankings: rankings(store, settings.ranking_metric, settings.ranking_direction, settings.ranking_size),
            feed: recent_events(store.logs(), settings.feed_size),
            summary: summarize(store),
        }
    }

    pub fn ranked_names(&self) -> Vec<&str> {
        self.rankings.iter().map(|entry| entry.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClusterState, StateChange, StructureNode};
    use serde_json::json;

    fn store(machines: &[(&str, Option<f64>)]) -> ClusterStore {
        let children: Vec<_> = machines.iter().map(|(name, _)| json!({"name": name})).collect();
        let structure: StructureNode =
            serde_json::from_value(json!({"name": "root", "children": [{"name": "rack1", "children": children}]})).unwrap();
        let mut state = ClusterState::new();
        state.insert("rack1".into(), serde_json::from_value(json!({"health": 0.5, "cpuUsage": 0.5})).unwrap());
        for (name, health) in machines {
            state.insert(name.to_string(), serde_json::from_value(json!({"health": health, "cpuUsage": 0.1})).unwrap());
        }
        ClusterStore::new(structure, state)
    }

    #[test]
    fn test_rankings_ascending_and_descending() {
        let s = store(&[("machine1", Some(0.85)), ("machine2", Some(0.4)), ("machine3", Some(0.6))]);

        let asc = rankings(&s, MetricKey::Health, SortDirection::Ascending, 10);
        let names: Vec<_> = asc.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["machine2", "machine3", "machine1"]);

        let desc = rankings(&s, MetricKey::Health, SortDirection::Ascending.toggled(), 10);
        let names: Vec<_> = desc.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["machine1", "machine3", "machine2"]);
    }

    #[test]
    fn test_rankings_ties_by_name_and_missing_last() {
        let s = store(&[("b", Some(0.5)), ("a", Some(0.5)), ("c", None), ("d", Some(0.9))]);

        for direction in [SortDirection::Ascending, SortDirection::Descending] {
            let ranked = rankings(&s, MetricKey::Health, direction, 10);
            let names: Vec<_> = ranked.iter().map(|e| e.name.as_str()).collect();
            assert_eq!(names.last(), Some(&"c"));
            let a = names.iter().position(|n| *n == "a").unwrap();
            let b = names.iter().position(|n| *n == "b").unwrap();
            assert!(a < b);
        }
    }

    #[test]
    fn test_rankings_only_machines_and_truncated() {
        let machines: Vec<(String, Option<f64>)> = (0..14).map(|i| (format!("m{:02}", i), Some(i as f64 / 20.0))).collect();
        let borrowed: Vec<(&str, Option<f64>)> = machines.iter().map(|(n, h)| (n.as_str(), *h)).collect();
        let s = store(&borrowed);

        let ranked = rankings(&s, MetricKey::Health, SortDirection::Ascending, 10);
        assert_eq!(ranked.len(), 10);
        assert!(ranked.iter().all(|e| e.name != "rack1"));
        assert_eq!(ranked[0].name, "m00");
        assert_eq!(ranked[0].rack.as_deref(), Some("rack1"));

        let small = store(&[("x", Some(0.1)), ("y", Some(0.2))]);
        assert_eq!(rankings(&small, MetricKey::Health, SortDirection::Ascending, 10).len(), 2);
    }

    #[test]
    fn test_recent_events_newest_first() {
        let mut s = store(&[("machine1", Some(0.5))]);
        let events: Vec<_> = (0..25)
            .map(|i| serde_json::from_value(json!({"severity": "INFO", "message": format!("e{}", i)})).unwrap())
            .collect();
        s.apply_update(events, StateChange::new());

        let feed = recent_events(s.logs(), 20);
        assert_eq!(feed.len(), 20);
        assert_eq!(feed[0].id, Some(24));
        assert_eq!(feed[19].id, Some(5));
    }

    #[test]
    fn test_summary_counts_node_events() {
        let mut s = store(&[("machine1", Some(0.9)), ("machine2", Some(0.3))]);
        let delta: StateChange = serde_json::from_value(json!({
            "machine1": {"events": [{"severity": "WARN", "message": "a"}, {"severity": "WARN", "message": "b"}]}
        }))
        .unwrap();
        s.apply_update(Vec::new(), delta);

        let summary = summarize(&s);
        assert_eq!(summary.node_count, 3);
        assert_eq!(summary.total_events, 2);
        assert_eq!(summary.logged_events, 0);
        assert_eq!(summary.min_health, Some(0.3));
        assert_eq!(summary.max_health, Some(0.9));
        assert!((summary.mean_health.unwrap() - (0.9 + 0.3 + 0.5) / 3.0).abs() < 1e-9);
        assert!((summary.mean_cpu.unwrap() - (0.1 + 0.1 + 0.5) / 3.0).abs() < 1e-9);
        assert_eq!(summary.mean_memory, None);
        assert_eq!(
            summary.headline(),
            "3 nodes | health mean 0.57 min 0.30 | cpu 0.23 | mem - | 2 node events, 0 logged"
        );
    }
}
