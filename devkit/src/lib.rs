/*!
# RiftDeck DevKit - doublures de test

Outils pour tester l'agent sans client de jeu ni runtime de plugin:
- `MockDeckHost`: surface de rendu qui enregistre chaque draw, échecs scriptables
- `ScriptedApi` / `ScriptedDiscovery`: API locale et découverte simulées
- `fixtures`: payloads JSON au format du client
- `TestHarness`: agent complet câblé sur les mocks
*/

pub mod api_stub;
pub mod deck_stub;
pub mod fixtures;
pub mod test_utils;

pub use api_stub::{ScriptedApi, ScriptedDiscovery};
pub use deck_stub::{DrawRecord, MockDeckHost};
pub use test_utils::TestHarness;
