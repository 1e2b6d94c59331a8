/*!
# Flotille DevKit - Stubs et Utilitaires pour Développement

Bibliothèque facilitant le développement autour du control Flotille avec:
- Stub HTTP de worker pour tester le pilotage sans flotte réelle
- Builders de messages broker réalistes

Aucune dépendance sur flotille-control : une dépendance retour
dupliquerait le crate sous test dans son propre target lib-test.
*/

pub mod worker_stub;

pub use worker_stub::{FleetMessageBuilder, StubBehavior, StubWorker};
