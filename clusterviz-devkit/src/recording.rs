/*!
Visualisation d'enregistrement

Chaque instance créée par le registre reçoit un numéro ; tous les appels du
sélecteur sont journalisés avec ce numéro, ce qui permet de vérifier qu'une
visualisation détruite ne reçoit plus rien.
*/

use clusterviz_client::models::{ClusterState, LogEvent, MetricKey, NodeState, StructureNode};
use clusterviz_client::{ClusterStore, Visualization, VisualizationKind, VisualizationRegistry};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub struct VizCall {
    pub instance: usize,
    pub kind: VisualizationKind,
    pub method: &'static str,
    /// Event ids for `update`, node name for node info, metric for data sets.
    pub detail: String,
}

/// Shared journal plus instance counter, handed to every visualization it creates.
#[derive(Clone, Default)]
pub struct VizRecorder {
    calls: Arc<Mutex<Vec<VizCall>>>,
    next_instance: Arc<AtomicUsize>,
}

impl VizRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for every kind; kinds in `rebuild_only` refuse live swaps.
    pub fn registry(&self, rebuild_only: &[VisualizationKind]) -> VisualizationRegistry {
        let rebuild_only: HashSet<VisualizationKind> = rebuild_only.iter().copied().collect();
        let mut registry = VisualizationRegistry::new();
        for kind in VisualizationKind::ALL {
            let recorder = self.clone();
            let live_swap = !rebuild_only.contains(&kind);
            registry.register(kind, move || Box::new(recorder.create(kind, live_swap)));
        }
        registry
    }

    /// Registry containing only `kinds`.
    pub fn partial_registry(&self, kinds: &[VisualizationKind]) -> VisualizationRegistry {
        let mut registry = VisualizationRegistry::new();
        for &kind in kinds {
            let recorder = self.clone();
            registry.register(kind, move || Box::new(recorder.create(kind, true)));
        }
        registry
    }

    fn create(&self, kind: VisualizationKind, live_swap: bool) -> RecordingVisualization {
        RecordingVisualization {
            kind,
            instance: self.next_instance.fetch_add(1, Ordering::SeqCst),
            live_swap,
            recorder: self.clone(),
        }
    }

    pub fn calls(&self) -> Vec<VizCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, instance: usize) -> Vec<VizCall> {
        self.calls().into_iter().filter(|call| call.instance == instance).collect()
    }

    /// `method` names of `instance`, in call order.
    pub fn methods_of(&self, instance: usize) -> Vec<&'static str> {
        self.calls_for(instance).into_iter().map(|call| call.method).collect()
    }

    /// Instances created so far, in creation order, with their kind.
    pub fn instances(&self) -> Vec<(usize, VisualizationKind)> {
        let mut seen = Vec::new();
        for call in self.calls() {
            if !seen.iter().any(|(instance, _)| *instance == call.instance) {
                seen.push((call.instance, call.kind));
            }
        }
        seen
    }

    pub fn count(&self, instance: usize, method: &str) -> usize {
        self.calls_for(instance).iter().filter(|call| call.method == method).count()
    }

    /// Every event id passed to `update`, across instances.
    pub fn updated_event_ids(&self) -> Vec<u64> {
        self.calls()
            .iter()
            .filter(|call| call.method == "update" && !call.detail.is_empty())
            .flat_map(|call| call.detail.split(',').filter_map(|id| id.parse().ok()).collect::<Vec<u64>>())
            .collect()
    }

    fn push(&self, call: VizCall) {
        log::debug!("[viz-recorder] #{} {} {}", call.instance, call.method, call.detail);
        self.calls.lock().unwrap().push(call);
    }
}

pub struct RecordingVisualization {
    kind: VisualizationKind,
    instance: usize,
    live_swap: bool,
    recorder: VizRecorder,
}

impl RecordingVisualization {
    fn record(&self, method: &'static str, detail: impl Into<String>) {
        self.recorder.push(VizCall {
            instance: self.instance,
            kind: self.kind,
            method,
            detail: detail.into(),
        });
    }
}

impl Visualization for RecordingVisualization {
    fn kind(&self) -> VisualizationKind {
        self.kind
    }

    fn initialize(&mut self, store: &ClusterStore) {
        self.record("initialize", store.structure().machine_count().to_string());
    }

    fn update(&mut self, _store: &ClusterStore, events: &[LogEvent]) {
        let ids: Vec<String> = events
            .iter()
            .filter_map(|event| event.id)
            .map(|id| id.to_string())
            .collect();
        self.record("update", ids.join(","));
    }

    fn title(&self) -> String {
        format!("recording {}", self.kind)
    }

    fn legend(&self) -> Option<String> {
        Some(format!("instance {}", self.instance))
    }

    fn set_color_data_set(&mut self, key: MetricKey) {
        self.record("set_color_data_set", key.to_string());
    }

    fn set_size_data_set(&mut self, key: MetricKey) {
        self.record("set_size_data_set", key.to_string());
    }

    fn supports_live_swap(&self) -> bool {
        self.live_swap
    }

    fn set_structure(&mut self, structure: &StructureNode) {
        self.record("set_structure", structure.machine_count().to_string());
    }

    fn set_state(&mut self, state: &ClusterState) {
        self.record("set_state", state.len().to_string());
    }

    fn show_node_info(&mut self, name: &str, _node: &NodeState) {
        self.record("show_node_info", name);
    }

    fn hide_node_info(&mut self, name: &str) {
        self.record("hide_node_info", name);
    }

    fn deconstruct(&mut self) {
        self.record("deconstruct", "");
    }
}
