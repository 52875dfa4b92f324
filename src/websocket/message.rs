use serde::{Deserialize, Serialize};

use crate::error::{StoreError, SyncError};
use crate::model::{ChatMessage, NewRoom, Room, RoomId, RoomPatch};

/// Frames sent from a client to the room host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Create {
        #[serde(rename = "requestId")]
        request_id: u64,
        room: NewRoom,
    },
    Read {
        #[serde(rename = "requestId")]
        request_id: u64,
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    Write {
        #[serde(rename = "requestId")]
        request_id: u64,
        #[serde(rename = "roomId")]
        room_id: RoomId,
        patch: RoomPatch,
    },
    Post {
        #[serde(rename = "requestId")]
        request_id: u64,
        #[serde(rename = "roomId")]
        room_id: RoomId,
        message: ChatMessage,
    },
    Subscribe {
        #[serde(rename = "requestId")]
        request_id: u64,
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    Unsubscribe {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn request_id(&self) -> Option<u64> {
        match self {
            ClientFrame::Create { request_id, .. }
            | ClientFrame::Read { request_id, .. }
            | ClientFrame::Write { request_id, .. }
            | ClientFrame::Post { request_id, .. }
            | ClientFrame::Subscribe { request_id, .. } => Some(*request_id),
            ClientFrame::Unsubscribe { .. } => None,
        }
    }

    pub fn to_text(&self) -> String {
        // Plain data with string keys; serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Frames sent from the room host to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Reply to `create` and `read`
    Room {
        #[serde(rename = "requestId")]
        request_id: u64,
        room: Room,
    },
    /// Reply to `write`, `post` and `subscribe`
    Ack {
        #[serde(rename = "requestId")]
        request_id: u64,
    },
    Failed {
        #[serde(rename = "requestId")]
        request_id: u64,
        error: StoreError,
    },
    Snapshot {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        room: Room,
    },
    Deleted {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    /// A frame the host could not understand
    Error { message: String },
}

impl ServerFrame {
    pub fn parse(text: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn to_ws_message(&self) -> axum::extract::ws::Message {
        axum::extract::ws::Message::Text(self.to_text())
    }
}
