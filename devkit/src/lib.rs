/*!
# Netbench DevKit - Stubs et utilitaires pour tester le contrôleur

Permet de dérouler des expériences complètes sans Mininet ni iperf3 :
- Exécuteur de commandes scripté (réponses par host, listener simulé)
- Fixtures de sorties iperf3 (JSON et texte)
- Harness qui monte un orchestrateur sur un journal temporaire
*/

pub mod fixtures;
pub mod scripted_executor;
pub mod test_utils;

pub use scripted_executor::{ListenerBehavior, RecordedCall, Reply, ScriptedExecutor};
pub use test_utils::TestHarness;
