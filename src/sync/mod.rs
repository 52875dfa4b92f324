//! Client-side room synchronization
//!
//! `tokens`, `dice` and `strokes` each mirror one room field and decide what
//! to write. `coordinator` ties them to one client without doing I/O, and
//! `session` runs a coordinator against a `RoomStore`.

pub mod coordinator;
pub mod dice;
pub mod session;
pub mod strokes;
pub mod tokens;

pub use coordinator::{Effect, Identity, SessionCoordinator, SessionEvent};
pub use dice::{DicePhase, DiceRollBroadcaster};
pub use session::{join_room, SessionHandle};
pub use strokes::{Brush, StrokeLog, StrokeReplay};
pub use tokens::TokenBoardSync;
