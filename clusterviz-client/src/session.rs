/**
 * SESSION - Cycle de vie subscribe → polling → unsubscribe
 *
 * RÔLE :
 * Possède le clientId, le store du cluster et la visualisation active.
 * Toutes les mutations passent par une seule tâche (acteur) : réponses de
 * polling, changement de visualisation, changement de source de données.
 *
 * FONCTIONNEMENT :
 * - Un seul poll en vol à la fois, exécuté dans sa propre tâche, étiqueté avec
 *   l'epoch de la source de données ; une réponse d'un epoch périmé est ignorée
 * - Erreur réseau ou refus transitoire : retry avec backoff exponentiel borné,
 *   puis arrêt du polling
 * - Refus définitif du serveur : arrêt du polling
 * - unsubscribe() annule le token : le poll en vol est abandonné
 * - En pause, le merge et la numérotation des logs continuent mais la
 *   visualisation et les panneaux ne sont plus rafraîchis ; la reprise
 *   rattrape tout en un seul rafraîchissement
 *
 * Les panneaux (rankings, events, résumé) et le statut sont publiés via
 * des canaux watch après chaque tick.
 */

use crate::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::models::{ClusterState, MetricKey, StructureNode, SubscribeResponse, UpdateResponse};
use crate::panels::{PanelSettings, Panels, SortDirection};
use crate::store::ClusterStore;
use crate::transport::{Transport, TransportError};
use crate::visualization::{
    Activation, SelectorError, SelectorPhase, SwapOutcome, VisualizationKind, VisualizationRegistry,
    VisualizationSelector,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Markers that make a declined update worth retrying.
const TRANSIENT_MARKERS: [&str; 4] = ["try again", "temporarily", "busy", "retry"];

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("server declined {operation}: {message}")]
    Rejected { operation: &'static str, message: String },
    #[error("{operation} response is missing '{field}'")]
    Incomplete { operation: &'static str, field: &'static str },
    #[error(transparent)]
    Visualization(#[from] SelectorError),
    #[error("session is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    pub default_visualization: VisualizationKind,
    pub panels: PanelSettings,
    pub retry: RetryPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_visualization: VisualizationKind::Tree,
            panels: PanelSettings::default(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub client_id: String,
    pub poll_active: bool,
    pub playing: bool,
    pub data_source_epoch: u64,
    pub phase: SelectorPhase,
    pub title: Option<String>,
    pub legend: Option<String>,
}

pub fn is_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

type Inspector = Box<dyn FnOnce(&ClusterStore) + Send>;

enum Command {
    ChangeDataSource {
        simulator: String,
        reply: oneshot::Sender<Result<SwapOutcome, SessionError>>,
    },
    Activate {
        kind: VisualizationKind,
        reply: oneshot::Sender<Result<Activation, SessionError>>,
    },
    SetColorDataSet(MetricKey),
    SetSizeDataSet(MetricKey),
    SetRanking {
        metric: MetricKey,
        direction: SortDirection,
    },
    Pin(String),
    Unpin(String),
    SetPlaying(bool),
    Inspect(Inspector),
}

struct PollOutcome {
    epoch: u64,
    result: Result<UpdateResponse, TransportError>,
}

pub struct SessionManager<T: Transport> {
    transport: Arc<T>,
    settings: SessionSettings,
}

impl<T: Transport> SessionManager<T> {
    pub fn new(transport: T, settings: SessionSettings) -> Self {
        Self {
            transport: Arc::new(transport),
            settings,
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Subscribes, activates the default visualization and starts polling.
    pub async fn subscribe(&self, registry: VisualizationRegistry) -> Result<SessionHandle, SessionError> {
        let response = self.transport.subscribe().await.inspect_err(|e| {
            error!("[session] subscribe failed: {}", e);
        })?;
        let snapshot = accept_snapshot("subscribe", response).inspect_err(|e| {
            error!("[session] {}", e);
        })?;
        let client_id = snapshot.client_id.ok_or(SessionError::Incomplete {
            operation: "subscribe",
            field: "clientId",
        })?;
        let store = ClusterStore::new(snapshot.structure, snapshot.state);
        info!(
            "[session] subscribed as {} ({} nodes, {} machines)",
            client_id,
            store.state().len(),
            store.structure().machine_count()
        );

        let cancel = CancellationToken::new();
        let diagnostics = Diagnostics::new();
        let (command_tx, command_rx) = mpsc::channel(32);
        let (poll_tx, poll_rx) = mpsc::channel(1);
        let settings = self.settings;
        let (panels_tx, panels_rx) = watch::channel(Panels::compute(&store, &settings.panels));
        let (status_tx, status_rx) = watch::channel(SessionStatus {
            client_id: client_id.clone(),
            poll_active: false,
            playing: true,
            data_source_epoch: 0,
            phase: SelectorPhase::Inactive,
            title: None,
            legend: None,
        });

        let mut actor = SessionActor {
            transport: Arc::clone(&self.transport),
            client_id: client_id.clone(),
            store,
            selector: VisualizationSelector::new(),
            registry,
            panel_settings: settings.panels,
            retry: settings.retry,
            epoch: 0,
            poll_in_flight: false,
            poll_active: false,
            consecutive_failures: 0,
            playing: true,
            held_from: 0,
            held_nodes: BTreeSet::new(),
            diagnostics: diagnostics.clone(),
            cancel: cancel.clone(),
            poll_tx,
            panels_tx,
            status_tx,
        };

        let kind = settings.default_visualization;
        if let Err(e) = actor.selector.activate(kind, actor.registry.create(kind), &actor.store) {
            warn!("[session] default visualization unavailable: {}", e);
        }
        actor.issue_poll(Duration::ZERO);
        actor.diagnostics.mark_polling();
        actor.publish_status();

        let task = tokio::spawn(actor.run(command_rx, poll_rx));

        Ok(SessionHandle {
            client_id,
            commands: command_tx,
            panels: panels_rx,
            status: status_rx,
            diagnostics,
            cancel,
            task: Some(task),
        })
    }
}

struct Snapshot {
    client_id: Option<String>,
    structure: StructureNode,
    state: ClusterState,
}

fn accept_snapshot(operation: &'static str, response: SubscribeResponse) -> Result<Snapshot, SessionError> {
    if !response.successful {
        return Err(SessionError::Rejected {
            operation,
            message: response.message.unwrap_or_else(|| "no message".to_string()),
        });
    }
    let structure = response
        .structure
        .ok_or(SessionError::Incomplete { operation, field: "structure" })?;
    let state = response
        .current_state
        .ok_or(SessionError::Incomplete { operation, field: "currentState" })?;
    Ok(Snapshot {
        client_id: response.client_id,
        structure,
        state,
    })
}

/// Handle to a running session. Dropping it cancels the session.
pub struct SessionHandle {
    client_id: String,
    commands: mpsc::Sender<Command>,
    panels: watch::Receiver<Panels>,
    status: watch::Receiver<SessionStatus>,
    diagnostics: Diagnostics,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Panels as of the latest tick.
    pub fn panels(&self) -> watch::Receiver<Panels> {
        self.panels.clone()
    }

    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).await.map_err(|_| SessionError::Closed)
    }

    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R, SessionError> {
        let (reply, response) = oneshot::channel();
        self.send(make(reply)).await?;
        response.await.map_err(|_| SessionError::Closed)
    }

    pub async fn change_data_source(&self, simulator: &str) -> Result<SwapOutcome, SessionError> {
        let simulator = simulator.to_string();
        self.request(|reply| Command::ChangeDataSource { simulator, reply }).await?
    }

    pub async fn activate(&self, kind: VisualizationKind) -> Result<Activation, SessionError> {
        self.request(|reply| Command::Activate { kind, reply }).await?
    }

    pub async fn set_color_data_set(&self, key: MetricKey) -> Result<(), SessionError> {
        self.send(Command::SetColorDataSet(key)).await
    }

    pub async fn set_size_data_set(&self, key: MetricKey) -> Result<(), SessionError> {
        self.send(Command::SetSizeDataSet(key)).await
    }

    pub async fn set_ranking(&self, metric: MetricKey, direction: SortDirection) -> Result<(), SessionError> {
        self.send(Command::SetRanking { metric, direction }).await
    }

    pub async fn pin_node(&self, name: &str) -> Result<(), SessionError> {
        self.send(Command::Pin(name.to_string())).await
    }

    pub async fn unpin_node(&self, name: &str) -> Result<(), SessionError> {
        self.send(Command::Unpin(name.to_string())).await
    }

    /// Freezes the visualization and panels; polling and merging go on.
    pub async fn pause(&self) -> Result<(), SessionError> {
        self.send(Command::SetPlaying(false)).await
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.send(Command::SetPlaying(true)).await
    }

    /// Runs `f` against the store between two ticks.
    pub async fn inspect<R, F>(&self, f: F) -> Result<R, SessionError>
    where
        R: Send + 'static,
        F: FnOnce(&ClusterStore) -> R + Send + 'static,
    {
        self.request(|reply| {
            Command::Inspect(Box::new(move |store: &ClusterStore| {
                let _ = reply.send(f(store));
            }))
        })
        .await
    }

    /// Stops polling, tears down the visualization and tells the server. Never fails.
    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("[session] session task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct SessionActor<T: Transport> {
    transport: Arc<T>,
    client_id: String,
    store: ClusterStore,
    selector: VisualizationSelector,
    registry: VisualizationRegistry,
    panel_settings: PanelSettings,
    retry: RetryPolicy,
    epoch: u64,
    poll_in_flight: bool,
    poll_active: bool,
    consecutive_failures: u32,
    playing: bool,
    /// First log id merged since the pause.
    held_from: usize,
    /// Nodes changed since the pause.
    held_nodes: BTreeSet<String>,
    diagnostics: Diagnostics,
    cancel: CancellationToken,
    poll_tx: mpsc::Sender<PollOutcome>,
    panels_tx: watch::Sender<Panels>,
    status_tx: watch::Sender<SessionStatus>,
}

impl<T: Transport> SessionActor<T> {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut polls: mpsc::Receiver<PollOutcome>) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(outcome) = polls.recv() => self.handle_poll(outcome),
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }
        self.shutdown().await;
    }

    fn issue_poll(&mut self, delay: Duration) {
        if self.poll_in_flight {
            return;
        }
        self.poll_in_flight = true;
        self.poll_active = true;

        let transport = Arc::clone(&self.transport);
        let client_id = self.client_id.clone();
        let epoch = self.epoch;
        let tx = self.poll_tx.clone();
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = async {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    transport.update(&client_id).await
                } => result,
            };
            let _ = tx.send(PollOutcome { epoch, result }).await;
        });
    }

    fn handle_poll(&mut self, outcome: PollOutcome) {
        self.poll_in_flight = false;

        if outcome.epoch != self.epoch {
            debug!("[poll] discarding response issued under data source epoch {}", outcome.epoch);
            self.diagnostics.record_stale();
            if self.poll_active {
                self.issue_poll(Duration::ZERO);
            }
            return;
        }

        match outcome.result {
            Ok(response) if response.successful => {
                self.consecutive_failures = 0;
                let changed: Vec<String> = response.state_change.keys().cloned().collect();
                let first_new = self.store.logs().len();
                let report = self.store.apply_update(response.events, response.state_change);
                debug!(
                    "[poll] merged {} nodes, {} node events, {} log events",
                    report.nodes_updated, report.node_events_appended, report.logs_recorded
                );
                self.diagnostics.record_poll(report.logs_recorded);
                if self.playing {
                    self.selector
                        .refresh(&self.store, &self.store.logs()[first_new..], &changed);
                    self.publish();
                } else {
                    self.held_nodes.extend(changed);
                }
                self.issue_poll(Duration::ZERO);
            }
            Ok(response) => {
                self.diagnostics.record_failure();
                let message = response.message.unwrap_or_else(|| "no message".to_string());
                if is_transient(&message) {
                    warn!("[poll] server declined update (transient): {}", message);
                    self.retry_or_stop(message);
                } else {
                    error!("[poll] server declined update: {}", message);
                    self.stop_polling(&message);
                }
            }
            Err(e) => {
                self.diagnostics.record_failure();
                warn!("[poll] update failed: {}", e);
                self.retry_or_stop(e.to_string());
            }
        }
    }

    fn retry_or_stop(&mut self, reason: String) {
        self.consecutive_failures += 1;
        if self.consecutive_failures > self.retry.max_retries {
            error!(
                "[poll] giving up after {} consecutive failures: {}",
                self.consecutive_failures, reason
            );
            self.stop_polling(&reason);
            return;
        }
        let delay = self.retry.delay(self.consecutive_failures);
        info!(
            "[poll] retry {}/{} in {:?}",
            self.consecutive_failures, self.retry.max_retries, delay
        );
        self.diagnostics.mark_retrying(self.consecutive_failures);
        self.issue_poll(delay);
    }

    fn stop_polling(&mut self, reason: &str) {
        self.poll_active = false;
        self.diagnostics.mark_stopped(reason);
        self.publish_status();
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::ChangeDataSource { simulator, reply } => {
                let result = self.change_data_source(&simulator).await;
                let _ = reply.send(result);
            }
            Command::Activate { kind, reply } => {
                let result = self
                    .selector
                    .activate(kind, self.registry.create(kind), &self.store)
                    .map_err(SessionError::from);
                self.publish_status();
                let _ = reply.send(result);
            }
            Command::SetColorDataSet(key) => {
                self.selector.set_color_data_set(key, &self.store);
                self.publish_status();
            }
            Command::SetSizeDataSet(key) => {
                self.selector.set_size_data_set(key, &self.store);
                self.publish_status();
            }
            Command::SetRanking { metric, direction } => {
                self.panel_settings.ranking_metric = metric;
                self.panel_settings.ranking_direction = direction;
                self.publish();
            }
            Command::Pin(name) => self.selector.pin(&name, &self.store),
            Command::Unpin(name) => self.selector.unpin(&name),
            Command::SetPlaying(playing) => self.set_playing(playing),
            Command::Inspect(inspect) => inspect(&self.store),
        }
    }

    fn set_playing(&mut self, playing: bool) {
        if playing == self.playing {
            return;
        }
        self.playing = playing;

        if playing {
            let from = self.held_from.min(self.store.logs().len());
            let changed: Vec<String> = std::mem::take(&mut self.held_nodes).into_iter().collect();
            info!(
                "[session] resumed, {} log events and {} nodes to catch up",
                self.store.logs().len() - from,
                changed.len()
            );
            self.selector.refresh(&self.store, &self.store.logs()[from..], &changed);
            self.publish();
        } else {
            self.held_from = self.store.logs().len();
            info!("[session] paused at log id {}", self.held_from);
            self.publish_status();
        }
    }

    async fn change_data_source(&mut self, simulator: &str) -> Result<SwapOutcome, SessionError> {
        info!("[session] switching data source to '{}'", simulator);
        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(SessionError::Closed),
            response = self.transport.change_simulator(&self.client_id, simulator) => response,
        };
        let snapshot = response
            .map_err(SessionError::from)
            .and_then(|response| accept_snapshot("changeSimulator", response))
            .inspect_err(|e| error!("[session] data source change failed: {}", e))?;

        let topology_changed = snapshot.structure != *self.store.structure();
        self.epoch += 1;
        self.store.replace(snapshot.structure, snapshot.state);
        // le nouveau log repart de zéro et la visualisation reçoit tout l'état
        self.held_from = 0;
        self.held_nodes.clear();
        let outcome = self
            .selector
            .swap_data_source(topology_changed, &self.store, &self.registry);

        self.consecutive_failures = 0;
        self.publish();
        if !self.poll_in_flight {
            self.diagnostics.mark_polling();
            self.issue_poll(Duration::ZERO);
            self.publish_status();
        }

        outcome.map_err(SessionError::from)
    }

    fn publish(&self) {
        self.panels_tx
            .send_replace(Panels::compute(&self.store, &self.panel_settings));
        self.publish_status();
    }

    fn publish_status(&self) {
        let activation = self.selector.activation();
        self.status_tx.send_replace(SessionStatus {
            client_id: self.client_id.clone(),
            poll_active: self.poll_active,
            playing: self.playing,
            data_source_epoch: self.epoch,
            phase: self.selector.phase().clone(),
            title: activation.map(|a| a.title.clone()),
            legend: activation.and_then(|a| a.legend.clone()),
        });
    }

    async fn shutdown(mut self) {
        self.selector.deactivate();
        self.poll_active = false;
        self.diagnostics.mark_stopped("unsubscribed");
        self.publish_status();

        match self.transport.unsubscribe(&self.client_id).await {
            Ok(ack) if ack.successful => info!("[session] unsubscribed {}", self.client_id),
            Ok(ack) => warn!(
                "[session] unsubscribe of {} declined: {}",
                self.client_id,
                ack.message.as_deref().unwrap_or("no message")
            ),
            Err(e) => warn!("[session] unsubscribe of {} failed: {}", self.client_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
        assert_eq!(policy.delay(5), Duration::from_millis(1000));
        assert_eq!(policy.delay(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_transient_messages() {
        assert!(is_transient("Server busy, try again later"));
        assert!(is_transient("simulator TEMPORARILY unavailable"));
        assert!(!is_transient("unknown client id"));
        assert!(!is_transient(""));
    }

    #[test]
    fn test_accept_snapshot_rejections() {
        let declined = SubscribeResponse {
            successful: false,
            message: Some("too many clients".into()),
            ..Default::default()
        };
        let err = accept_snapshot("subscribe", declined).err().unwrap();
        assert_eq!(err.to_string(), "server declined subscribe: too many clients");

        let partial = SubscribeResponse {
            successful: true,
            client_id: Some("c1".into()),
            structure: Some(StructureNode::default()),
            ..Default::default()
        };
        let err = accept_snapshot("subscribe", partial).err().unwrap();
        assert!(matches!(err, SessionError::Incomplete { field: "currentState", .. }));
    }
}
