//! Game simulation modules

pub mod arena;
pub mod combat;
pub mod r#match;
pub mod physics;
pub mod player;
pub mod replication;
pub mod rules;
pub mod scheduler;

pub use arena::{ArenaGeometry, SpatialQuery};
pub use combat::CombatSystem;
pub use player::PlayerSystem;
pub use r#match::{MatchOrchestrator, MatchPhase};
pub use replication::{MatchMirror, MatchPatch, PlayerSnapshot, SnapshotBuilder};
pub use rules::MatchRules;
