/*!
Test Harness pour sessions clusterviz

Facilite l'écriture de tests de session avec:
- Transport scripté (StubTransport) partagé avec la session
- Visualisations d'enregistrement pour tous les types
- Politique de retry courte pour des tests rapides
- Attente sur les panneaux et le statut publiés
*/

use crate::fixtures::subscribe_ok;
use crate::recording::VizRecorder;
use crate::stub_transport::{StubReply, StubTransport};
use anyhow::{anyhow, Result};
use clusterviz_client::models::{ClusterState, StructureNode};
use clusterviz_client::panels::Panels;
use clusterviz_client::session::{RetryPolicy, SessionStatus};
use clusterviz_client::{SessionHandle, SessionManager, SessionSettings, VisualizationKind};
use std::time::Duration;

pub const CLIENT_ID: &str = "client-1";

/// Kinds the harness registry rebuilds on every data-source change.
pub const REBUILD_ONLY: [VisualizationKind; 2] = [VisualizationKind::Chord, VisualizationKind::ScatterplotMatrix];

pub struct TestHarness {
    pub transport: StubTransport,
    pub recorder: VizRecorder,
    pub settings: SessionSettings,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        env_logger::try_init().ok(); // logs des tests via RUST_LOG

        Self {
            transport: StubTransport::new(),
            recorder: VizRecorder::new(),
            settings: SessionSettings {
                retry: RetryPolicy {
                    max_retries: 3,
                    initial_backoff: Duration::from_millis(10),
                    max_backoff: Duration::from_millis(40),
                },
                ..Default::default()
            },
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.settings.retry.max_retries = max_retries;
        self
    }

    pub fn with_default_visualization(mut self, kind: VisualizationKind) -> Self {
        self.settings.default_visualization = kind;
        self
    }

    /// Queues a successful subscribe for `CLIENT_ID`.
    pub fn accept_subscribe(&self, structure: StructureNode, state: ClusterState) -> &Self {
        self.transport
            .push_subscribe(StubReply::Ok(subscribe_ok(CLIENT_ID, structure, state)));
        self
    }

    /// Subscribes with a recording visualization registered for every kind.
    pub async fn start(&self) -> Result<SessionHandle> {
        let manager = SessionManager::new(self.transport.clone(), self.settings);
        let handle = manager.subscribe(self.recorder.registry(&REBUILD_ONLY)).await?;
        log::info!("[harness] session {} started", handle.client_id());
        Ok(handle)
    }

    /// Waits until the published panels satisfy `predicate`.
    pub async fn wait_for_panels(
        &self,
        handle: &SessionHandle,
        timeout_ms: u64,
        predicate: impl FnMut(&Panels) -> bool,
    ) -> Result<Panels> {
        let mut panels = handle.panels();
        let matched = tokio::time::timeout(Duration::from_millis(timeout_ms), panels.wait_for(predicate))
            .await
            .map_err(|_| anyhow!("timeout waiting for panels"))?
            .map_err(|_| anyhow!("session closed while waiting for panels"))?;
        Ok(matched.clone())
    }

    /// Waits until the published status satisfies `predicate`.
    pub async fn wait_for_status(
        &self,
        handle: &SessionHandle,
        timeout_ms: u64,
        predicate: impl FnMut(&SessionStatus) -> bool,
    ) -> Result<SessionStatus> {
        let mut status = handle.status();
        let matched = tokio::time::timeout(Duration::from_millis(timeout_ms), status.wait_for(predicate))
            .await
            .map_err(|_| anyhow!("timeout waiting for session status"))?
            .map_err(|_| anyhow!("session closed while waiting for status"))?;
        Ok(matched.clone())
    }

    /// Lets in-flight work settle for `ms` milliseconds.
    pub async fn settle(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
