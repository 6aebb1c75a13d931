/*!
Transport scripté pour tester une session sans serveur de simulation

Chaque endpoint a sa file de réponses, consommée dans l'ordre des appels.
Tous les appels sont enregistrés pour les assertions.

File vide :
- `update` attend qu'une réponse soit poussée (la boucle de polling est au repos)
- `unsubscribe` répond `successful: true`
- `subscribe` / `changeSimulator` répondent HTTP 500
*/

use clusterviz_client::models::{AckResponse, SubscribeResponse, UpdateResponse};
use clusterviz_client::transport::{CHANGE_SIMULATOR, SUBSCRIBE, UNSUBSCRIBE, UPDATE};
use clusterviz_client::{Transport, TransportError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Scripted answer for one call.
pub enum StubReply<T> {
    Ok(T),
    Status(u16),
    Timeout,
    /// Never answers.
    Hang,
    /// Answers once the gate is opened with `notify_one`.
    Gated(Arc<Notify>, T),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    Subscribe,
    Update(String),
    Unsubscribe(String),
    ChangeSimulator { client_id: String, simulator: String },
}

#[derive(Default)]
struct Script {
    subscribe: Mutex<VecDeque<StubReply<SubscribeResponse>>>,
    update: Mutex<VecDeque<StubReply<UpdateResponse>>>,
    unsubscribe: Mutex<VecDeque<StubReply<AckResponse>>>,
    change_simulator: Mutex<VecDeque<StubReply<SubscribeResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
    update_pushed: Notify,
}

/// Cloneable: keep a clone to script and inspect while the session owns the other.
#[derive(Clone, Default)]
pub struct StubTransport {
    script: Arc<Script>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_subscribe(&self, reply: StubReply<SubscribeResponse>) -> &Self {
        self.script.subscribe.lock().unwrap().push_back(reply);
        self
    }

    pub fn push_update(&self, reply: StubReply<UpdateResponse>) -> &Self {
        self.script.update.lock().unwrap().push_back(reply);
        self.script.update_pushed.notify_waiters();
        self
    }

    pub fn push_unsubscribe(&self, reply: StubReply<AckResponse>) -> &Self {
        self.script.unsubscribe.lock().unwrap().push_back(reply);
        self
    }

    pub fn push_change_simulator(&self, reply: StubReply<SubscribeResponse>) -> &Self {
        self.script.change_simulator.lock().unwrap().push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.script.calls.lock().unwrap().clone()
    }

    pub fn update_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RecordedCall::Update(_)))
            .count()
    }

    pub fn pending_updates(&self) -> usize {
        self.script.update.lock().unwrap().len()
    }

    /// Waits until at least `count` update calls were made.
    pub async fn wait_for_updates(&self, count: usize, timeout_ms: u64) -> bool {
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if self.update_calls() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        log::warn!("[stub] timeout waiting for {} update calls (got {})", count, self.update_calls());
        false
    }

    fn record(&self, call: RecordedCall) {
        log::debug!("[stub] {:?}", call);
        self.script.calls.lock().unwrap().push(call);
    }
}

async fn resolve<T>(endpoint: &'static str, reply: StubReply<T>) -> Result<T, TransportError> {
    match reply {
        StubReply::Ok(value) => Ok(value),
        StubReply::Status(status) => Err(TransportError::Status { endpoint, status }),
        StubReply::Timeout => Err(TransportError::Timeout { endpoint }),
        StubReply::Hang => std::future::pending().await,
        StubReply::Gated(gate, value) => {
            gate.notified().await;
            Ok(value)
        }
    }
}

impl Transport for StubTransport {
    async fn subscribe(&self) -> Result<SubscribeResponse, TransportError> {
        self.record(RecordedCall::Subscribe);
        let reply = self.script.subscribe.lock().unwrap().pop_front();
        match reply {
            Some(reply) => resolve(SUBSCRIBE, reply).await,
            None => Err(TransportError::Status { endpoint: SUBSCRIBE, status: 500 }),
        }
    }

    async fn update(&self, client_id: &str) -> Result<UpdateResponse, TransportError> {
        self.record(RecordedCall::Update(client_id.to_string()));
        loop {
            // créé avant la lecture de la file : un push concurrent n'est pas perdu
            let pushed = self.script.update_pushed.notified();
            let reply = self.script.update.lock().unwrap().pop_front();
            if let Some(reply) = reply {
                return resolve(UPDATE, reply).await;
            }
            pushed.await;
        }
    }

    async fn unsubscribe(&self, client_id: &str) -> Result<AckResponse, TransportError> {
        self.record(RecordedCall::Unsubscribe(client_id.to_string()));
        let reply = self.script.unsubscribe.lock().unwrap().pop_front();
        match reply {
            Some(reply) => resolve(UNSUBSCRIBE, reply).await,
            None => Ok(AckResponse { successful: true, message: None }),
        }
    }

    async fn change_simulator(&self, client_id: &str, simulator: &str) -> Result<SubscribeResponse, TransportError> {
        self.record(RecordedCall::ChangeSimulator {
            client_id: client_id.to_string(),
            simulator: simulator.to_string(),
        });
        let reply = self.script.change_simulator.lock().unwrap().pop_front();
        match reply {
            Some(reply) => resolve(CHANGE_SIMULATOR, reply).await,
            None => Err(TransportError::Status { endpoint: CHANGE_SIMULATOR, status: 500 }),
        }
    }
}
