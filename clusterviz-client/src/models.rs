//! Cluster data model and simulation-server wire types.
//!
//! Node states and deltas are typed: every metric the server knows about is
//! a field, and [`MetricKey`] addresses them (including the nested severity
//! probabilities) without string paths.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use time::{Date, Month, PrimitiveDateTime, Time};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Severity::Info, Severity::Warn, Severity::Error, Severity::Fatal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .into_iter()
            .find(|sev| sev.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown severity '{}'", s))
    }
}

/// Predicted probability of the next failure per severity class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeverityProbabilities {
    #[serde(rename = "FATAL", default)]
    pub fatal: f64,
    #[serde(rename = "ERROR", default)]
    pub error: f64,
    #[serde(rename = "WARN", default)]
    pub warn: f64,
    #[serde(rename = "INFO", default)]
    pub info: f64,
}

impl SeverityProbabilities {
    pub fn get(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Fatal => self.fatal,
            Severity::Error => self.error,
            Severity::Warn => self.warn,
            Severity::Info => self.info,
        }
    }
}

/// Event time as sent by the simulator (epoch millis or preformatted text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Millis(f64),
    Text(String),
}

impl Timestamp {
    /// Epoch milliseconds. Text is read as the simulator's `dd/mm/yy HH:MM`
    /// wall clock (taken as UTC); anything else yields `None`.
    pub fn as_millis(&self) -> Option<f64> {
        match self {
            Timestamp::Millis(ms) => Some(*ms),
            Timestamp::Text(text) => {
                let at = parse_simulator_clock(text)?.assume_utc();
                Some((at.unix_timestamp_nanos() / 1_000_000) as f64)
            }
        }
    }
}

fn parse_simulator_clock(text: &str) -> Option<PrimitiveDateTime> {
    let (day_part, clock) = text.trim().split_once(' ')?;
    let mut fields = day_part.split('/').map(|field| field.parse::<u8>().ok());
    let (day, month, year) = (fields.next()??, fields.next()??, fields.next()??);
    if fields.next().is_some() {
        return None;
    }
    let (hour, minute) = clock.split_once(':')?;

    let date = Date::from_calendar_date(2000 + i32::from(year), Month::try_from(month).ok()?, day).ok()?;
    let time = Time::from_hms(hour.parse().ok()?, minute.parse().ok()?, 0).ok()?;
    Some(PrimitiveDateTime::new(date, time))
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Millis(ms) => write!(f, "{}", ms),
            Timestamp::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Position in the session's cumulative log; `None` until recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl LogEvent {
    /// Line shown in feeds: the message, or the facility when the server sent none.
    pub fn display_text(&self) -> &str {
        match self.facility.as_deref() {
            Some(facility) if self.message.is_empty() => facility,
            _ => &self.message,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_usage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_switch_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_failure_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_minutes_between_failures: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_severity_probabilities: Option<SeverityProbabilities>,
    #[serde(default)]
    pub events: Vec<LogEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rack: Option<String>,
}

impl NodeState {
    pub fn metric(&self, key: MetricKey) -> Option<f64> {
        match key {
            MetricKey::Health => self.health,
            MetricKey::CpuUsage => self.cpu_usage,
            MetricKey::MemoryUsage => self.memory_usage,
            MetricKey::ContextSwitchRate => self.context_switch_rate,
            MetricKey::LastFailureTime => self.last_failure_time.as_ref().and_then(Timestamp::as_millis),
            MetricKey::PredictedFailureTime => self.predicted_failure_time.as_ref().and_then(Timestamp::as_millis),
            MetricKey::SeverityProbability(severity) => self
                .predicted_severity_probabilities
                .as_ref()
                .map(|p| p.get(severity)),
        }
    }
}

/// A field present in a delta: `Some(None)` is an explicit null.
pub type Patch<T> = Option<Option<T>>;

fn present<'de, D, T>(deserializer: D) -> Result<Patch<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Changed attributes of one node. `events` is appended, everything else overwrites.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDelta {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub cpu_usage: Patch<f64>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub memory_usage: Patch<f64>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub context_switch_rate: Patch<f64>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub health: Patch<f64>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub last_failure_time: Patch<Timestamp>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub predicted_failure_time: Patch<Timestamp>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub average_minutes_between_failures: Patch<f64>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub predicted_severity_probabilities: Patch<SeverityProbabilities>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub rack: Patch<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<LogEvent>>,
    /// Attributes outside the node schema; reported and ignored by the merge.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

pub type ClusterState = HashMap<String, NodeState>;
pub type StateChange = HashMap<String, NodeDelta>;

/// Racks → machines tree received at subscribe time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireStructureNode")]
pub struct StructureNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<StructureNode>,
}

/// Collapsed subtrees come as `"children": null` plus `"_children": [...]`.
#[derive(Deserialize)]
struct WireStructureNode {
    name: String,
    #[serde(default)]
    children: Option<Vec<StructureNode>>,
    #[serde(default, rename = "_children")]
    collapsed: Option<Vec<StructureNode>>,
}

impl From<WireStructureNode> for StructureNode {
    fn from(wire: WireStructureNode) -> Self {
        StructureNode {
            name: wire.name,
            children: wire.children.or(wire.collapsed).unwrap_or_default(),
        }
    }
}

impl StructureNode {
    pub fn racks(&self) -> &[StructureNode] {
        &self.children
    }

    /// `(rack, machine)` pairs in tree order.
    pub fn machines(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.children.iter().flat_map(|rack| {
            rack.children
                .iter()
                .map(move |machine| (rack.name.as_str(), machine.name.as_str()))
        })
    }

    pub fn machine_count(&self) -> usize {
        self.children.iter().map(|rack| rack.children.len()).sum()
    }
}

/// Typed address of a numeric node attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MetricKey {
    Health,
    CpuUsage,
    MemoryUsage,
    ContextSwitchRate,
    LastFailureTime,
    PredictedFailureTime,
    SeverityProbability(Severity),
}

const SEVERITY_PREFIX: &str = "predictedSeverityProbabilities.";

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKey::Health => f.write_str("health"),
            MetricKey::CpuUsage => f.write_str("cpuUsage"),
            MetricKey::MemoryUsage => f.write_str("memoryUsage"),
            MetricKey::ContextSwitchRate => f.write_str("contextSwitchRate"),
            MetricKey::LastFailureTime => f.write_str("lastFailureTime"),
            MetricKey::PredictedFailureTime => f.write_str("predictedFailureTime"),
            MetricKey::SeverityProbability(severity) => write!(f, "{}{}", SEVERITY_PREFIX, severity),
        }
    }
}

impl FromStr for MetricKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(severity) = s.strip_prefix(SEVERITY_PREFIX) {
            return severity.parse().map(MetricKey::SeverityProbability);
        }
        match s {
            "health" => Ok(MetricKey::Health),
            "cpuUsage" => Ok(MetricKey::CpuUsage),
            "memoryUsage" => Ok(MetricKey::MemoryUsage),
            "contextSwitchRate" => Ok(MetricKey::ContextSwitchRate),
            "lastFailureTime" => Ok(MetricKey::LastFailureTime),
            "predictedFailureTime" => Ok(MetricKey::PredictedFailureTime),
            other => Err(format!("unknown metric '{}'", other)),
        }
    }
}

impl TryFrom<String> for MetricKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MetricKey> for String {
    fn from(key: MetricKey) -> Self {
        key.to_string()
    }
}

// Simulation server payloads

fn successful_by_default() -> bool {
    true
}

/// Client ids arrive as integers from the simulator; keep them as text.
fn numeric_or_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum WireId {
        Number(i64),
        Text(String),
    }

    Ok(Option::<WireId>::deserialize(deserializer)?.map(|id| match id {
        WireId::Number(n) => n.to_string(),
        WireId::Text(text) => text,
    }))
}

/// Answer to /subscribe and /changeSimulator. The simulator leaves
/// `successful` out of a plain subscribe, which counts as success.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeResponse {
    #[serde(default = "successful_by_default")]
    pub successful: bool,
    #[serde(default, deserialize_with = "numeric_or_text", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<ClusterState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<StructureNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResponse {
    pub successful: bool,
    #[serde(default)]
    pub events: Vec<LogEvent>,
    #[serde(default)]
    pub state_change: StateChange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AckResponse {
    pub successful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSimulatorRequest {
    pub client_id: String,
    pub simulator: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metric_key_names() {
        for key in [
            MetricKey::Health,
            MetricKey::CpuUsage,
            MetricKey::ContextSwitchRate,
            MetricKey::SeverityProbability(Severity::Fatal),
        ] {
            assert_eq!(key.to_string().parse::<MetricKey>(), Ok(key));
        }
        assert_eq!(
            "predictedSeverityProbabilities.WARN".parse::<MetricKey>(),
            Ok(MetricKey::SeverityProbability(Severity::Warn))
        );
        assert!("predictedSeverityProbabilities.LOUD".parse::<MetricKey>().is_err());
        assert!("diskUsage".parse::<MetricKey>().is_err());
    }

    #[test]
    fn test_metric_lookup() {
        let node: NodeState = serde_json::from_value(json!({
            "health": 0.7,
            "cpuUsage": 0.2,
            "predictedSeverityProbabilities": {"FATAL": 0.1, "ERROR": 0.2, "WARN": 0.3, "INFO": 0.4}
        }))
        .unwrap();

        assert_eq!(node.metric(MetricKey::Health), Some(0.7));
        assert_eq!(node.metric(MetricKey::MemoryUsage), None);
        assert_eq!(node.metric(MetricKey::SeverityProbability(Severity::Warn)), Some(0.3));
        assert!(node.events.is_empty());
    }

    #[test]
    fn test_delta_distinguishes_null_from_absent() {
        let delta: NodeDelta = serde_json::from_value(json!({
            "health": 0.5,
            "lastFailureTime": null,
            "temperature": 71
        }))
        .unwrap();

        assert_eq!(delta.health, Some(Some(0.5)));
        assert_eq!(delta.last_failure_time, Some(None));
        assert_eq!(delta.cpu_usage, None);
        assert_eq!(delta.events, None);
        assert_eq!(delta.unknown.get("temperature"), Some(&json!(71)));
    }

    #[test]
    fn test_structure_machines() {
        let structure: StructureNode = serde_json::from_value(json!({
            "name": "root",
            "children": [
                {"name": "rack1", "children": [{"name": "m1"}, {"name": "m2"}]},
                {"name": "rack2", "children": [{"name": "m3"}]}
            ]
        }))
        .unwrap();

        let machines: Vec<_> = structure.machines().collect();
        assert_eq!(machines, vec![("rack1", "m1"), ("rack1", "m2"), ("rack2", "m3")]);
        assert_eq!(structure.machine_count(), 3);
        assert_eq!(structure.racks().len(), 2);
    }

    #[test]
    fn test_collapsed_structure_children() {
        let structure: StructureNode = serde_json::from_value(json!({
            "name": "machine0",
            "children": null,
            "_children": [
                {"name": "machine1", "children": null, "_children": [{"name": "machine2"}]},
                {"name": "machine3", "children": [{"name": "machine4"}]}
            ]
        }))
        .unwrap();

        let machines: Vec<_> = structure.machines().collect();
        assert_eq!(machines, vec![("machine1", "machine2"), ("machine3", "machine4")]);
    }

    #[test]
    fn test_update_envelope_defaults() {
        let update: UpdateResponse =
            serde_json::from_str(r#"{"successful": false, "message": "simulation paused"}"#).unwrap();
        assert!(!update.successful);
        assert!(update.events.is_empty());
        assert!(update.state_change.is_empty());
        assert_eq!(update.message.as_deref(), Some("simulation paused"));
    }

    #[test]
    fn test_log_event_timestamps() {
        let numeric: LogEvent =
            serde_json::from_value(json!({"severity": "ERROR", "timestamp": 1700000000000.0, "message": "disk"})).unwrap();
        let text: LogEvent =
            serde_json::from_value(json!({"severity": "INFO", "timestamp": "12:00:01", "message": "ok"})).unwrap();

        assert_eq!(numeric.timestamp, Some(Timestamp::Millis(1700000000000.0)));
        assert_eq!(text.timestamp, Some(Timestamp::Text("12:00:01".into())));
        assert_eq!(numeric.id, None);
    }

    #[test]
    fn test_simulator_clock_timestamps() {
        let predicted = Timestamp::Text("19/10/26 13:05".into());
        let expected = time::macros::datetime!(2026-10-19 13:05 UTC).unix_timestamp() as f64 * 1000.0;
        assert_eq!(predicted.as_millis(), Some(expected));
        assert_eq!(Timestamp::Millis(42.0).as_millis(), Some(42.0));
        assert_eq!(Timestamp::Text("12:00:01".into()).as_millis(), None);
        assert_eq!(Timestamp::Text("31/02/26 10:00".into()).as_millis(), None);
    }

    #[test]
    fn test_node_state_with_simulator_failure_times() {
        let node: NodeState = serde_json::from_value(json!({
            "name": "machine1",
            "cpuUsage": 0.2,
            "memoryUsage": 0.3,
            "contextSwitchRate": 0.1,
            "events": [],
            "lastFailureTime": null,
            "predictedFailureTime": "19/10/26 13:05",
            "predictedSeverityProbabilities": {"FATAL": 0.05, "ERROR": 0.1, "WARN": 0.2, "INFO": 0.5},
            "averageMinutesBetweenFailures": 30,
            "health": 0.9
        }))
        .unwrap();

        assert_eq!(node.last_failure_time, None);
        assert_eq!(node.predicted_failure_time, Some(Timestamp::Text("19/10/26 13:05".into())));
        assert_eq!(node.metric(MetricKey::LastFailureTime), None);
        assert!(node.metric(MetricKey::PredictedFailureTime).is_some());
        assert_eq!(node.metric(MetricKey::Health), Some(0.9));
    }

    #[test]
    fn test_subscribe_with_integer_client_id_and_no_flag() {
        let subscribed: SubscribeResponse = serde_json::from_str(
            r#"{"clientId": 1, "currentState": {"machine1": {"health": 0.9}}, "structure": {"name": "root", "children": []}}"#,
        )
        .unwrap();
        assert!(subscribed.successful);
        assert_eq!(subscribed.client_id.as_deref(), Some("1"));
        assert_eq!(subscribed.current_state.unwrap()["machine1"].health, Some(0.9));

        let declined: SubscribeResponse =
            serde_json::from_str(r#"{"message": "Invalid simulator", "successful": false}"#).unwrap();
        assert!(!declined.successful);
        assert_eq!(declined.client_id, None);

        let uuid: SubscribeResponse = serde_json::from_str(r#"{"successful": true, "clientId": "a-b"}"#).unwrap();
        assert_eq!(uuid.client_id.as_deref(), Some("a-b"));
    }

    #[test]
    fn test_update_with_simulator_log_events() {
        let update: UpdateResponse = serde_json::from_value(json!({
            "events": [{
                "severity": "FATAL",
                "facility": "KERNEL",
                "location": "machine1",
                "timestamp": "19/10/26 12:00"
            }],
            "stateChange": {
                "machine1": {
                    "events": [{"severity": "FATAL", "facility": "KERNEL", "location": "machine1", "timestamp": "19/10/26 12:00"}],
                    "lastFailureTime": "19/10/26 12:00",
                    "predictedFailureTime": "19/10/26 12:40",
                    "averageMinutesBetweenFailures": 35.0,
                    "health": 0.4
                }
            },
            "successful": true
        }))
        .unwrap();

        assert_eq!(update.events[0].timestamp, Some(Timestamp::Text("19/10/26 12:00".into())));
        assert_eq!(update.events[0].display_text(), "KERNEL");
        let delta = &update.state_change["machine1"];
        assert_eq!(delta.last_failure_time, Some(Some(Timestamp::Text("19/10/26 12:00".into()))));
        assert_eq!(delta.health, Some(Some(0.4)));
        assert_eq!(delta.average_minutes_between_failures, Some(Some(35.0)));
        assert!(delta.unknown.is_empty());
    }

    #[test]
    fn test_display_text_falls_back_to_facility() {
        let mut event: LogEvent =
            serde_json::from_value(json!({"severity": "WARN", "facility": "NETWORK", "location": "machine2"})).unwrap();
        assert_eq!(event.display_text(), "NETWORK");

        event.message = "link flapping".into();
        assert_eq!(event.display_text(), "link flapping");

        event.facility = None;
        event.message.clear();
        assert_eq!(event.display_text(), "");
    }
}
