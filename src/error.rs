use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures reported by a `RoomStore`.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StoreError {
    #[error("Room not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Network error: {0}")]
    NetworkTransient(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Room unavailable: {0}")]
    RoomUnavailable(String),

    #[error("Write rejected: {0}")]
    PermissionDenied(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Network error: {0}")]
    NetworkTransient(String),

    #[error("Cell {cell} is outside the {grid_size}x{grid_size} grid")]
    CellOutOfRange { cell: u32, grid_size: u32 },

    #[error("Unknown token type: {0}")]
    UnknownTokenType(String),

    #[error("Invalid room id: {0}")]
    InvalidRoomId(String),

    #[error("Room lifetime must be between 1 and {max} days, got {found}")]
    InvalidTtl { found: u32, max: u32 },

    #[error("Canvas size {0}x{1} is not drawable")]
    CanvasSize(u32, u32),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(room) => SyncError::RoomUnavailable(room),
            StoreError::PermissionDenied(reason) => SyncError::PermissionDenied(reason),
            StoreError::NetworkTransient(reason) => SyncError::NetworkTransient(reason),
            StoreError::InvalidRequest(reason) => SyncError::MalformedPayload(reason),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::MalformedPayload(err.to_string())
    }
}
