/*!
Serveur de simulation minimal (axum) pour tester le transport HTTP de bout en bout

Routes : GET /subscribe, GET /update?clientId=, GET /unsubscribe?clientId=,
POST /changeSimulator (formulaire). Les réponses /update sont scriptées (file
de JSON bruts), une file vide renvoie un update vide réussi après un court délai.

En mode simulateur (`start_simulator_wire`) les réponses reprennent la forme
exacte du serveur Python : ids entiers, subscribe sans `successful`,
changeSimulator sans clientId.
*/

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use clusterviz_client::models::{
    AckResponse, ChangeSimulatorRequest, ClusterState, StructureNode, SubscribeResponse, UpdateResponse,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Default)]
struct SimState {
    structure: StructureNode,
    state: ClusterState,
    simulators: HashMap<String, (StructureNode, ClusterState)>,
    clients: HashSet<String>,
    unsubscribed: Vec<String>,
    updates: VecDeque<Value>,
    simulator_wire: bool,
    next_client_id: u64,
    update_status: Option<u16>,
    update_delay: Option<Duration>,
}

type Shared = Arc<Mutex<SimState>>;

const IDLE_TICK: Duration = Duration::from_millis(20);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientQuery {
    client_id: Option<String>,
}

pub struct StubServer {
    addr: SocketAddr,
    sim: Shared,
    task: JoinHandle<()>,
}

impl StubServer {
    /// Binds an ephemeral port on localhost and starts serving.
    pub async fn start(structure: StructureNode, state: ClusterState) -> anyhow::Result<Self> {
        Self::serve(SimState {
            structure,
            state,
            ..Default::default()
        })
        .await
    }

    /// Same routes, answering in the Python simulator's payload shapes.
    pub async fn start_simulator_wire(structure: StructureNode, state: ClusterState) -> anyhow::Result<Self> {
        Self::serve(SimState {
            structure,
            state,
            simulator_wire: true,
            next_client_id: 1,
            ..Default::default()
        })
        .await
    }

    async fn serve(sim: SimState) -> anyhow::Result<Self> {
        let sim: Shared = Arc::new(Mutex::new(sim));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = router(sim.clone());
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("[stub-server] stopped: {}", e);
            }
        });

        log::info!("[stub-server] listening on {}", addr);
        Ok(Self { addr, sim, task })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn add_simulator(&self, name: &str, structure: StructureNode, state: ClusterState) {
        self.sim
            .lock()
            .unwrap()
            .simulators
            .insert(name.to_string(), (structure, state));
    }

    pub fn queue_update(&self, update: UpdateResponse) {
        let body = serde_json::to_value(update).unwrap_or_else(|e| panic!("unserializable update: {}", e));
        self.queue_raw_update(body);
    }

    /// Queues an /update body served verbatim.
    pub fn queue_raw_update(&self, body: Value) {
        self.sim.lock().unwrap().updates.push_back(body);
    }

    /// Makes every /update answer with this HTTP status.
    pub fn fail_updates(&self, status: u16) {
        self.sim.lock().unwrap().update_status = Some(status);
    }

    pub fn delay_updates(&self, delay: Duration) {
        self.sim.lock().unwrap().update_delay = Some(delay);
    }

    pub fn clients(&self) -> Vec<String> {
        self.sim.lock().unwrap().clients.iter().cloned().collect()
    }

    pub fn unsubscribed(&self) -> Vec<String> {
        self.sim.lock().unwrap().unsubscribed.clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn router(sim: Shared) -> Router {
    Router::new()
        .route("/subscribe", get(subscribe))
        .route("/update", get(update))
        .route("/unsubscribe", get(unsubscribe))
        .route("/changeSimulator", post(change_simulator))
        .with_state(sim)
}

async fn subscribe(State(sim): State<Shared>) -> Response {
    let mut sim = sim.lock().unwrap();
    if sim.simulator_wire {
        let client_id = sim.next_client_id;
        sim.next_client_id += 1;
        sim.clients.insert(client_id.to_string());
        log::info!("[stub-server] subscribed {}", client_id);
        return Json(json!({
            "clientId": client_id,
            "currentState": sim.state,
            "structure": sim.structure
        }))
        .into_response();
    }

    let client_id = uuid::Uuid::new_v4().to_string();
    sim.clients.insert(client_id.clone());
    log::info!("[stub-server] subscribed {}", client_id);
    Json(SubscribeResponse {
        successful: true,
        client_id: Some(client_id),
        current_state: Some(sim.state.clone()),
        structure: Some(sim.structure.clone()),
        message: None,
    })
    .into_response()
}

async fn update(State(sim): State<Shared>, Query(query): Query<ClientQuery>) -> Response {
    let delay = sim.lock().unwrap().update_delay;
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let queued = {
        let mut sim = sim.lock().unwrap();
        if let Some(status) = sim.update_status {
            let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return (code, "scripted failure").into_response();
        }
        let known = query.client_id.as_ref().is_some_and(|id| sim.clients.contains(id));
        if !known {
            let message = if sim.simulator_wire { "Not subscribed" } else { "unknown client id" };
            return Json(json!({"message": message, "successful": false})).into_response();
        }
        sim.updates.pop_front()
    };

    let body = match queued {
        Some(body) => body,
        None => {
            // rien de nouveau : on temporise comme un simulateur réel entre deux ticks
            tokio::time::sleep(IDLE_TICK).await;
            json!({"events": [], "stateChange": {}, "successful": true})
        }
    };
    Json(body).into_response()
}

async fn unsubscribe(State(sim): State<Shared>, Query(query): Query<ClientQuery>) -> Json<AckResponse> {
    let mut sim = sim.lock().unwrap();
    let Some(client_id) = query.client_id else {
        return Json(AckResponse {
            successful: false,
            message: Some("missing clientId".into()),
        });
    };
    let removed = sim.clients.remove(&client_id);
    sim.unsubscribed.push(client_id);
    Json(AckResponse {
        successful: removed,
        message: (!removed).then(|| "unknown client id".to_string()),
    })
}

async fn change_simulator(State(sim): State<Shared>, Form(request): Form<ChangeSimulatorRequest>) -> Json<SubscribeResponse> {
    let mut sim = sim.lock().unwrap();
    if !sim.clients.contains(&request.client_id) {
        return Json(SubscribeResponse {
            successful: false,
            message: Some("unknown client id".into()),
            ..Default::default()
        });
    }
    let Some((structure, state)) = sim.simulators.get(&request.simulator).cloned() else {
        return Json(SubscribeResponse {
            successful: false,
            message: Some(format!("unknown simulator '{}'", request.simulator)),
            ..Default::default()
        });
    };
    sim.structure = structure.clone();
    sim.state = state.clone();
    log::info!("[stub-server] {} switched to {}", request.client_id, request.simulator);
    Json(SubscribeResponse {
        successful: true,
        client_id: (!sim.simulator_wire).then_some(request.client_id),
        current_state: Some(state),
        structure: Some(structure),
        message: None,
    })
}
