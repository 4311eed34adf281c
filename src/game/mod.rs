//! Game simulation modules

pub mod battle;
pub mod room;

pub use battle::BattleState;
pub use room::{RoomEvent, RoomManager, Sender};
