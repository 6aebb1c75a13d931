/**
 * VISUALIZATION SELECTOR - Visualisation active unique du tableau de bord
 *
 * RÔLE : Contrat commun des visualisations (trait), registre kind → constructeur,
 * et sélecteur qui garantit qu'une seule visualisation est liée au store.
 *
 * FONCTIONNEMENT : activate() démonte l'ancienne (deconstruct), passe en Loading,
 * initialise la nouvelle, rend une base vide, puis lit titre et légende.
 * Un kind sans constructeur mène à l'état Error, sans visualisation.
 */

use crate::models::{ClusterState, LogEvent, MetricKey, NodeState, StructureNode};
use crate::store::ClusterStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VisualizationKind {
    Tree,
    Treemap,
    Chord,
    ScatterplotMatrix,
    CirclePacking,
    Pie,
    Stream,
}

impl VisualizationKind {
    pub const ALL: [VisualizationKind; 7] = [
        VisualizationKind::Tree,
        VisualizationKind::Treemap,
        VisualizationKind::Chord,
        VisualizationKind::ScatterplotMatrix,
        VisualizationKind::CirclePacking,
        VisualizationKind::Pie,
        VisualizationKind::Stream,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VisualizationKind::Tree => "tree",
            VisualizationKind::Treemap => "treemap",
            VisualizationKind::Chord => "chord",
            VisualizationKind::ScatterplotMatrix => "scatterplot-matrix",
            VisualizationKind::CirclePacking => "circle-packing",
            VisualizationKind::Pie => "pie",
            VisualizationKind::Stream => "stream",
        }
    }
}

impl fmt::Display for VisualizationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VisualizationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VisualizationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown visualization '{}'", s))
    }
}

/// Capability set every chart implements. Rendering is up to the implementor.
pub trait Visualization: Send {
    fn kind(&self) -> VisualizationKind;

    fn initialize(&mut self, store: &ClusterStore);

    /// Called after every merge with the log events recorded by it (empty for a plain refresh).
    fn update(&mut self, store: &ClusterStore, events: &[LogEvent]);

    fn title(&self) -> String;

    fn legend(&self) -> Option<String> {
        None
    }

    fn set_color_data_set(&mut self, _key: MetricKey) {}

    fn set_size_data_set(&mut self, _key: MetricKey) {}

    /// Whether `set_structure` / `set_state` can absorb a data-source change in place.
    fn supports_live_swap(&self) -> bool {
        false
    }

    fn set_structure(&mut self, _structure: &StructureNode) {}

    fn set_state(&mut self, _state: &ClusterState) {}

    fn show_node_info(&mut self, _name: &str, _node: &NodeState) {}

    fn hide_node_info(&mut self, _name: &str) {}

    fn deconstruct(&mut self) {}
}

type Constructor = Box<dyn Fn() -> Box<dyn Visualization> + Send + Sync>;

#[derive(Default)]
pub struct VisualizationRegistry {
    constructors: HashMap<VisualizationKind, Constructor>,
}

impl VisualizationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(mut self, kind: VisualizationKind, constructor: F) -> Self
    where
        F: Fn() -> Box<dyn Visualization> + Send + Sync + 'static,
    {
        self.register(kind, constructor);
        self
    }

    pub fn register<F>(&mut self, kind: VisualizationKind, constructor: F)
    where
        F: Fn() -> Box<dyn Visualization> + Send + Sync + 'static,
    {
        self.constructors.insert(kind, Box::new(constructor));
    }

    pub fn create(&self, kind: VisualizationKind) -> Option<Box<dyn Visualization>> {
        self.constructors.get(&kind).map(|constructor| constructor())
    }

    pub fn kinds(&self) -> Vec<VisualizationKind> {
        let mut kinds: Vec<_> = self.constructors.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("visualization '{0}' is not available")]
    Unavailable(VisualizationKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SelectorPhase {
    Inactive,
    Loading,
    Active(VisualizationKind),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Activation {
    pub kind: VisualizationKind,
    pub title: String,
    pub legend: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SwapOutcome {
    /// No visualization was active.
    Untouched,
    LiveUpdated,
    Rebuilt(Activation),
}

pub struct VisualizationSelector {
    current: Option<Box<dyn Visualization>>,
    phase: SelectorPhase,
    activation: Option<Activation>,
    pinned: BTreeSet<String>,
    color_key: Option<MetricKey>,
    size_key: Option<MetricKey>,
}

impl Default for VisualizationSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl VisualizationSelector {
    pub fn new() -> Self {
        Self {
            current: None,
            phase: SelectorPhase::Inactive,
            activation: None,
            pinned: BTreeSet::new(),
            color_key: None,
            size_key: None,
        }
    }

    pub fn phase(&self) -> &SelectorPhase {
        &self.phase
    }

    pub fn activation(&self) -> Option<&Activation> {
        self.activation.as_ref()
    }

    pub fn active_kind(&self) -> Option<VisualizationKind> {
        self.current.as_ref().map(|viz| viz.kind())
    }

    /// Replaces the active visualization with `next`.
    pub fn activate(
        &mut self,
        requested: VisualizationKind,
        next: Option<Box<dyn Visualization>>,
        store: &ClusterStore,
    ) -> Result<Activation, SelectorError> {
        self.teardown();
        self.phase = SelectorPhase::Loading;

        let Some(mut viz) = next else {
            error!("[viz] no visualization available for '{}'", requested);
            self.phase = SelectorPhase::Error(format!("visualization '{}' is not available", requested));
            return Err(SelectorError::Unavailable(requested));
        };

        if let Some(key) = self.color_key {
            viz.set_color_data_set(key);
        }
        if let Some(key) = self.size_key {
            viz.set_size_data_set(key);
        }
        viz.initialize(store);
        viz.update(store, &[]);

        let activation = Activation {
            kind: viz.kind(),
            title: viz.title(),
            legend: viz.legend(),
        };
        self.current = Some(viz);
        self.show_pinned(store);

        info!("[viz] activated {} ({})", activation.kind, activation.title);
        self.phase = SelectorPhase::Active(activation.kind);
        self.activation = Some(activation.clone());
        Ok(activation)
    }

    /// Deconstructs the active visualization, if any, and goes back to Inactive.
    pub fn deactivate(&mut self) {
        self.teardown();
        self.phase = SelectorPhase::Inactive;
    }

    fn teardown(&mut self) {
        if let Some(mut old) = self.current.take() {
            debug!("[viz] deconstructing {}", old.kind());
            old.deconstruct();
        }
        self.activation = None;
    }

    /// Redraws after a merge and re-shows the info of pinned nodes in `changed`.
    pub fn refresh(&mut self, store: &ClusterStore, events: &[LogEvent], changed: &[String]) {
        let Some(viz) = self.current.as_mut() else { return };
        viz.update(store, events);
        for name in changed.iter().filter(|name| self.pinned.contains(*name)) {
            if let Some(node) = store.node(name) {
                viz.show_node_info(name, node);
            }
        }
    }

    pub fn set_color_data_set(&mut self, key: MetricKey, store: &ClusterStore) {
        self.color_key = Some(key);
        if let Some(viz) = self.current.as_mut() {
            viz.set_color_data_set(key);
            viz.update(store, &[]);
            if let Some(activation) = self.activation.as_mut() {
                activation.legend = viz.legend();
            }
        }
    }

    pub fn set_size_data_set(&mut self, key: MetricKey, store: &ClusterStore) {
        self.size_key = Some(key);
        if let Some(viz) = self.current.as_mut() {
            viz.set_size_data_set(key);
            viz.update(store, &[]);
            if let Some(activation) = self.activation.as_mut() {
                activation.legend = viz.legend();
            }
        }
    }

    pub fn pin(&mut self, name: &str, store: &ClusterStore) {
        self.pinned.insert(name.to_string());
        if let (Some(viz), Some(node)) = (self.current.as_mut(), store.node(name)) {
            viz.show_node_info(name, node);
        }
    }

    pub fn unpin(&mut self, name: &str) {
        if self.pinned.remove(name) {
            if let Some(viz) = self.current.as_mut() {
                viz.hide_node_info(name);
            }
        }
    }

    pub fn pinned(&self) -> impl Iterator<Item = &str> {
        self.pinned.iter().map(String::as_str)
    }

    fn show_pinned(&mut self, store: &ClusterStore) {
        let Some(viz) = self.current.as_mut() else { return };
        for name in &self.pinned {
            if let Some(node) = store.node(name) {
                viz.show_node_info(name, node);
            }
        }
    }

    /// Applies a data-source change that already replaced the store's contents.
    ///
    /// A topology change always rebuilds the visualization; otherwise a
    /// visualization supporting live swaps is fed the new structure and state.
    pub fn swap_data_source(
        &mut self,
        topology_changed: bool,
        store: &ClusterStore,
        registry: &VisualizationRegistry,
    ) -> Result<SwapOutcome, SelectorError> {
        let Some(viz) = self.current.as_mut() else {
            return Ok(SwapOutcome::Untouched);
        };

        if !topology_changed && viz.supports_live_swap() {
            viz.set_structure(store.structure());
            viz.set_state(store.state());
            viz.update(store, &[]);
            self.show_pinned(store);
            debug!("[viz] live data-source swap");
            return Ok(SwapOutcome::LiveUpdated);
        }

        let kind = viz.kind();
        self.activate(kind, registry.create(kind), store).map(SwapOutcome::Rebuilt)
    }
}
