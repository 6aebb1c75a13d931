/*!
# clusterviz client

Synchronization core of the cluster dashboard: subscribes to the simulation
server, polls for state deltas, merges them into the cluster store and keeps
the active visualization and the side panels in step.

- `transport` : HTTP calls to the simulation server
- `session` : subscribe → poll loop → unsubscribe, serialized in one actor
- `store` / `merge` : cluster state and incremental merge
- `visualization` : visualization trait, registry and selector
- `panels` : rankings, event feed, summary
*/

pub mod config;
pub mod console;
pub mod diagnostics;
pub mod merge;
pub mod models;
pub mod panels;
pub mod session;
pub mod store;
pub mod transport;
pub mod visualization;

pub use models::{ClusterState, LogEvent, MetricKey, NodeState, Severity, StateChange, StructureNode};
pub use session::{SessionError, SessionHandle, SessionManager, SessionSettings};
pub use store::ClusterStore;
pub use transport::{HttpTransport, Transport, TransportError};
pub use visualization::{Visualization, VisualizationKind, VisualizationRegistry};
