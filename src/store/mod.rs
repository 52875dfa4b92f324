//! Shared room document storage
//!
//! A `RoomStore` holds one document per room, merges partial writes field by
//! field and pushes the full document to every subscriber after each change,
//! the writer included.

pub mod memory;
pub mod remote;
pub mod sweeper;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::StoreResult;
use crate::model::{ChatMessage, NewRoom, Room, RoomId, RoomPatch};

pub use memory::MemoryRoomStore;
pub use remote::RemoteRoomStore;

/// What a subscription delivers
#[derive(Debug, Clone, PartialEq)]
pub enum RoomUpdate {
    /// The full current document
    Snapshot(Room),
    /// The room no longer exists
    Deleted,
}

#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn create_room(&self, request: NewRoom) -> StoreResult<Room>;

    async fn read(&self, room_id: &RoomId) -> StoreResult<Room>;

    /// Merge `patch` into the room. Fields the patch leaves out are not touched.
    async fn write_fields(&self, room_id: &RoomId, patch: RoomPatch) -> StoreResult<()>;

    /// Deliver the current document now and again after every change.
    async fn subscribe(&self, room_id: &RoomId) -> StoreResult<Subscription>;

    /// Append to the room's chat. Chat is a plain list with no merge rules.
    async fn post_message(&self, room_id: &RoomId, message: ChatMessage) -> StoreResult<()>;
}

/// Push side of `RoomStore::subscribe`. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    room_id: RoomId,
    receiver: UnboundedReceiver<RoomUpdate>,
}

impl Subscription {
    pub fn new(room_id: RoomId, receiver: UnboundedReceiver<RoomUpdate>) -> Self {
        Self { room_id, receiver }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Next update, or `None` once the store stops delivering
    pub async fn next(&mut self) -> Option<RoomUpdate> {
        self.receiver.recv().await
    }

    /// Drain whatever is already queued without waiting
    pub fn try_next(&mut self) -> Option<RoomUpdate> {
        self.receiver.try_recv().ok()
    }

    pub fn unsubscribe(mut self) {
        self.receiver.close();
    }
}
