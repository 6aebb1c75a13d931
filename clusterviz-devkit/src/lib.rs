/*!
# clusterviz DevKit - Stubs et Utilitaires de test

Bibliothèque facilitant les tests du client clusterviz avec:
- Transport scripté pour tester une session sans serveur
- Visualisations d'enregistrement
- Fixtures de cluster (structures, états, updates)
- Réponses JSON au format exact du simulateur
- Serveur de simulation minimal pour le transport HTTP
*/

pub mod fixtures;
pub mod recording;
pub mod simulator_payloads;
pub mod stub_server;
pub mod stub_transport;
pub mod test_utils;

pub use recording::{VizCall, VizRecorder};
pub use stub_server::StubServer;
pub use stub_transport::{RecordedCall, StubReply, StubTransport};
pub use test_utils::TestHarness;
