//! Headless text visualization used by the `clusterviz` binary.
//!
//! Renders one line per rack with the color metric aggregated over its
//! machines. Every kind shares the renderer; they differ by title and by
//! whether a data-source change can be absorbed in place.

use crate::models::{ClusterState, LogEvent, MetricKey, NodeState, StructureNode};
use crate::store::ClusterStore;
use crate::visualization::{Visualization, VisualizationKind, VisualizationRegistry};
use std::collections::BTreeMap;
use std::fmt::Write as _;

pub struct ConsoleVisualization {
    kind: VisualizationKind,
    color_key: MetricKey,
    size_key: Option<MetricKey>,
    echo: bool,
    frames: usize,
    last_frame: String,
    notes: BTreeMap<String, String>,
}

impl ConsoleVisualization {
    pub fn new(kind: VisualizationKind, echo: bool) -> Self {
        Self {
            kind,
            color_key: MetricKey::Health,
            size_key: None,
            echo,
            frames: 0,
            last_frame: String::new(),
            notes: BTreeMap::new(),
        }
    }

    pub fn last_frame(&self) -> &str {
        &self.last_frame
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    fn render(&self, store: &ClusterStore, events: &[LogEvent]) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "== {} [{}] ==", self.title(), self.color_key);

        for rack in store.structure().racks() {
            let values: Vec<(&str, f64)> = rack
                .children
                .iter()
                .filter_map(|m| {
                    store
                        .node(&m.name)
                        .and_then(|node| node.metric(self.color_key))
                        .map(|v| (m.name.as_str(), v))
                })
                .collect();

            let _ = write!(out, "{:<12} {:>3} machines", rack.name, rack.children.len());
            if let Some((name, lowest)) = values.iter().copied().min_by(|a, b| a.1.total_cmp(&b.1)) {
                let mean = values.iter().map(|(_, v)| v).sum::<f64>() / values.len() as f64;
                let _ = write!(out, "  mean={:.2}  min={:.2} ({})", mean, lowest, name);
            }
            out.push('\n');
        }

        for (name, note) in &self.notes {
            let _ = writeln!(out, "  * {}: {}", name, note);
        }
        for event in events {
            let _ = writeln!(
                out,
                "  ! #{} {} {} {}",
                event.id.unwrap_or_default(),
                event.severity,
                event.location.as_deref().unwrap_or("-"),
                event.display_text()
            );
        }
        out
    }
}

fn describe(node: &NodeState) -> String {
    let fmt = |v: Option<f64>| v.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into());
    format!(
        "health={} cpu={} mem={} events={}",
        fmt(node.health),
        fmt(node.cpu_usage),
        fmt(node.memory_usage),
        node.events.len()
    )
}

impl Visualization for ConsoleVisualization {
    fn kind(&self) -> VisualizationKind {
        self.kind
    }

    fn initialize(&mut self, store: &ClusterStore) {
        self.frames = 0;
        self.last_frame.clear();
        if self.echo {
            println!(
                "[viz] {}: {} racks, {} machines",
                self.title(),
                store.structure().racks().len(),
                store.structure().machine_count()
            );
        }
    }

    fn update(&mut self, store: &ClusterStore, events: &[LogEvent]) {
        self.last_frame = self.render(store, events);
        self.frames += 1;
        if self.echo {
            print!("{}", self.last_frame);
        }
    }

    fn title(&self) -> String {
        match self.kind {
            VisualizationKind::Tree => "Cluster tree",
            VisualizationKind::Treemap => "Cluster treemap",
            VisualizationKind::Chord => "Rack interactions",
            VisualizationKind::ScatterplotMatrix => "Metric correlations",
            VisualizationKind::CirclePacking => "Cluster circles",
            VisualizationKind::Pie => "Severity distribution",
            VisualizationKind::Stream => "Event stream",
        }
        .to_string()
    }

    fn legend(&self) -> Option<String> {
        let mut legend = format!("color: {}", self.color_key);
        if let Some(size) = self.size_key {
            let _ = write!(legend, ", size: {}", size);
        }
        Some(legend)
    }

    fn set_color_data_set(&mut self, key: MetricKey) {
        self.color_key = key;
    }

    fn set_size_data_set(&mut self, key: MetricKey) {
        self.size_key = Some(key);
    }

    // Chord and scatterplot layouts depend on node cardinality.
    fn supports_live_swap(&self) -> bool {
        !matches!(self.kind, VisualizationKind::Chord | VisualizationKind::ScatterplotMatrix)
    }

    fn set_structure(&mut self, _structure: &StructureNode) {
        self.frames = 0;
    }

    fn set_state(&mut self, state: &ClusterState) {
        self.notes.retain(|name, _| state.contains_key(name));
    }

    fn show_node_info(&mut self, name: &str, node: &NodeState) {
        self.notes.insert(name.to_string(), describe(node));
    }

    fn hide_node_info(&mut self, name: &str) {
        self.notes.remove(name);
    }

    fn deconstruct(&mut self) {
        self.notes.clear();
        self.last_frame.clear();
    }
}

/// Registry with a console visualization for every kind.
pub fn console_registry(echo: bool) -> VisualizationRegistry {
    let mut registry = VisualizationRegistry::new();
    for kind in VisualizationKind::ALL {
        registry.register(kind, move || Box::new(ConsoleVisualization::new(kind, echo)));
    }
    registry
}
