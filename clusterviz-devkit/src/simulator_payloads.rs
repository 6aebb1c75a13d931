/*!
Réponses au format exact du simulateur Python

JSON brut tel que le serveur de simulation l'émet : clientId entier, pas de
`successful` au subscribe, horodatages `dd/mm/yy HH:MM`, `lastFailureTime`
nul, événements parfois sans message. Sert à vérifier le décodage et à
scripter le StubServer en mode simulateur.
*/

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};

/// Clock format of every timestamp the simulator sends.
pub const SIMULATOR_CLOCK: &str = "%d/%m/%y %H:%M";

pub fn clock(at: DateTime<Utc>) -> String {
    at.format(SIMULATOR_CLOCK).to_string()
}

/// Initial node state, as built when the simulator starts.
pub fn node_state(name: &str, health: f64) -> Value {
    json!({
        "name": name,
        "cpuUsage": 0.2,
        "memoryUsage": 0.3,
        "contextSwitchRate": 0.1,
        "events": [],
        "lastFailureTime": null,
        "predictedFailureTime": clock(Utc::now() + Duration::minutes(60)),
        "predictedSeverityProbabilities": {"FATAL": 0.05, "ERROR": 0.1, "WARN": 0.2, "INFO": 0.5},
        "averageMinutesBetweenFailures": 60.0,
        "health": health
    })
}

/// `{"name": "root", "children": [rack → machines]}`.
pub fn structure(racks: &[(&str, &[&str])]) -> Value {
    let children: Vec<Value> = racks
        .iter()
        .map(|(rack, machines)| {
            let machines: Vec<Value> = machines.iter().map(|m| json!({"name": m})).collect();
            json!({"name": rack, "children": machines})
        })
        .collect();
    json!({"name": "root", "children": children})
}

/// Subscribe answer: integer id and no `successful` flag.
pub fn subscribe(client_id: u64, racks: &[(&str, &[&str])], health: f64) -> Value {
    let state: Map<String, Value> = racks
        .iter()
        .flat_map(|(_, machines)| machines.iter())
        .map(|machine| (machine.to_string(), node_state(machine, health)))
        .collect();
    json!({
        "clientId": client_id,
        "currentState": state,
        "structure": structure(racks)
    })
}

/// Log event; an empty `message` is what a zero-length random string yields.
pub fn log_event(severity: &str, facility: &str, location: &str, message: &str) -> Value {
    json!({
        "message": message,
        "severity": severity,
        "facility": facility,
        "location": location,
        "timestamp": clock(Utc::now())
    })
}

/// A FATAL on `location`: the event, plus the failure-time bookkeeping in its delta.
pub fn fatal_update(location: &str, health: f64) -> Value {
    let now = Utc::now();
    let event = json!({
        "message": "",
        "severity": "FATAL",
        "facility": "KERNEL",
        "location": location,
        "timestamp": clock(now)
    });
    json!({
        "events": [event.clone()],
        "stateChange": {
            location: {
                "events": [event],
                "lastFailureTime": clock(now),
                "predictedFailureTime": clock(now + Duration::minutes(60)),
                "averageMinutesBetweenFailures": 60.0,
                "health": health,
                "predictedSeverityProbabilities": {"FATAL": 0.07, "ERROR": 0.1, "WARN": 0.2, "INFO": 0.5},
                "cpuUsage": 0.25,
                "memoryUsage": 0.3,
                "contextSwitchRate": 0.1
            }
        },
        "successful": true
    })
}

pub fn not_subscribed() -> Value {
    json!({"message": "Not subscribed", "successful": false})
}

pub fn unknown_simulator() -> Value {
    json!({"message": "unknown simulator", "successful": false})
}
