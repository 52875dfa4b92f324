pub mod catalog;
pub mod dice;
pub mod room;
pub mod transfer;

pub use dice::DiceType;
pub use room::{
    ChatMessage, NewRoom, RollEvent, Room, RoomId, RoomPatch, StrokeSegment, StrokesUpdate,
    TokenMap, TokenPlacement,
};
pub use transfer::{TransferIntent, TransferPayload};
