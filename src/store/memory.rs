use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::RwLock;

use crate::config::TabletopConfig;
use crate::error::{StoreError, StoreResult};
use crate::model::{ChatMessage, NewRoom, Room, RoomId, RoomPatch};
use crate::store::{RoomStore, RoomUpdate, Subscription};

struct RoomEntry {
    room: Room,
    messages: Vec<ChatMessage>,
    subscribers: Vec<UnboundedSender<RoomUpdate>>,
    locked: bool,
}

impl RoomEntry {
    fn new(room: Room) -> Self {
        Self {
            room,
            messages: Vec::new(),
            subscribers: Vec::new(),
            locked: false,
        }
    }

    /// Push the current document to every live subscriber, dropping closed ones
    fn notify(&mut self) {
        let room = &self.room;
        self.subscribers
            .retain(|tx| tx.send(RoomUpdate::Snapshot(room.clone())).is_ok());
    }
}

/// In-process shared store. Every client holding the same `Arc` sees one document per room.
pub struct MemoryRoomStore {
    rooms: RwLock<HashMap<RoomId, RoomEntry>>,
    grid_size: u32,
    default_ttl_days: u32,
    max_ttl_days: u32,
}

impl MemoryRoomStore {
    pub fn new(config: &TabletopConfig) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            grid_size: config.grid_size,
            default_ttl_days: config.default_room_ttl_days,
            max_ttl_days: config.max_room_ttl_days,
        }
    }

    /// Seed a room with a known id
    pub async fn insert(&self, room: Room) {
        let mut rooms = self.rooms.write().await;
        tracing::info!("Room {} inserted", room.id);
        rooms.insert(room.id.clone(), RoomEntry::new(room));
    }

    /// Delete a room and tell its subscribers
    pub async fn delete_room(&self, room_id: &RoomId) -> bool {
        let mut rooms = self.rooms.write().await;
        match rooms.remove(room_id) {
            Some(entry) => {
                for tx in entry.subscribers {
                    let _ = tx.send(RoomUpdate::Deleted);
                }
                tracing::info!("Room {} deleted", room_id);
                true
            }
            None => false,
        }
    }

    /// Delete every room whose `expiresAt` is not after `now`
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Vec<RoomId> {
        let mut rooms = self.rooms.write().await;
        let expired: Vec<RoomId> = rooms
            .values()
            .filter(|entry| entry.room.is_expired(now))
            .map(|entry| entry.room.id.clone())
            .collect();

        for room_id in &expired {
            if let Some(entry) = rooms.remove(room_id) {
                for tx in entry.subscribers {
                    let _ = tx.send(RoomUpdate::Deleted);
                }
            }
        }
        expired
    }

    /// Locked rooms reject every write with `PermissionDenied`
    pub async fn set_locked(&self, room_id: &RoomId, locked: bool) -> StoreResult<()> {
        let mut rooms = self.rooms.write().await;
        let entry = rooms
            .get_mut(room_id)
            .ok_or_else(|| StoreError::NotFound(room_id.to_string()))?;
        entry.locked = locked;
        Ok(())
    }

    pub async fn messages(&self, room_id: &RoomId) -> StoreResult<Vec<ChatMessage>> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .map(|entry| entry.messages.clone())
            .ok_or_else(|| StoreError::NotFound(room_id.to_string()))
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn subscriber_count(&self, room_id: &RoomId) -> usize {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .map(|entry| entry.subscribers.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Access rules a write must satisfy
    fn check_patch(&self, patch: &RoomPatch) -> StoreResult<()> {
        if let Some(tokens) = &patch.tokens {
            let cells = self.grid_size * self.grid_size;
            for (cell, placement) in tokens {
                if *cell != placement.cell_index {
                    return Err(StoreError::PermissionDenied(format!(
                        "token key {} does not match cellIndex {}",
                        cell, placement.cell_index
                    )));
                }
                if *cell >= cells {
                    return Err(StoreError::PermissionDenied(format!(
                        "cell {} is outside the board",
                        cell
                    )));
                }
            }
        }
        if let Some(roll) = &patch.rolled_dice {
            if !roll.dice_type.accepts(roll.value) || roll.nonce.is_empty() {
                return Err(StoreError::PermissionDenied(format!(
                    "invalid {} roll {}",
                    roll.dice_type, roll.value
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn create_room(&self, request: NewRoom) -> StoreResult<Room> {
        let ttl_days = request.ttl_days.unwrap_or(self.default_ttl_days);
        if ttl_days == 0 || ttl_days > self.max_ttl_days {
            return Err(StoreError::InvalidRequest(format!(
                "room lifetime must be 1..={} days, got {}",
                self.max_ttl_days, ttl_days
            )));
        }
        let name = request.name.filter(|name| !name.trim().is_empty());
        let room = Room::new(RoomId::generate(), name, Utc::now(), ttl_days);

        let mut rooms = self.rooms.write().await;
        rooms.insert(room.id.clone(), RoomEntry::new(room.clone()));
        tracing::info!("Room {} created, expires at {}", room.id, room.expires_at);
        Ok(room)
    }

    async fn read(&self, room_id: &RoomId) -> StoreResult<Room> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .map(|entry| entry.room.clone())
            .ok_or_else(|| StoreError::NotFound(room_id.to_string()))
    }

    async fn write_fields(&self, room_id: &RoomId, patch: RoomPatch) -> StoreResult<()> {
        let mut rooms = self.rooms.write().await;
        let entry = rooms
            .get_mut(room_id)
            .ok_or_else(|| StoreError::NotFound(room_id.to_string()))?;
        if entry.locked {
            return Err(StoreError::PermissionDenied(format!(
                "room {} is read-only",
                room_id
            )));
        }
        self.check_patch(&patch)?;
        if patch.is_empty() {
            return Ok(());
        }

        entry.room.merge(patch);
        entry.notify();
        Ok(())
    }

    async fn subscribe(&self, room_id: &RoomId) -> StoreResult<Subscription> {
        let mut rooms = self.rooms.write().await;
        let entry = rooms
            .get_mut(room_id)
            .ok_or_else(|| StoreError::NotFound(room_id.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        // Current document first, then every change
        let _ = tx.send(RoomUpdate::Snapshot(entry.room.clone()));
        entry.subscribers.push(tx);
        Ok(Subscription::new(room_id.clone(), rx))
    }

    async fn post_message(&self, room_id: &RoomId, message: ChatMessage) -> StoreResult<()> {
        let mut rooms = self.rooms.write().await;
        let entry = rooms
            .get_mut(room_id)
            .ok_or_else(|| StoreError::NotFound(room_id.to_string()))?;
        if entry.locked {
            return Err(StoreError::PermissionDenied(format!(
                "room {} is read-only",
                room_id
            )));
        }
        entry.messages.push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DiceType, RollEvent, StrokeSegment, TokenMap, TokenPlacement};
    use chrono::Duration;

    fn store() -> MemoryRoomStore {
        MemoryRoomStore::new(&TabletopConfig::default())
    }

    fn segment(x: f32) -> StrokeSegment {
        StrokeSegment {
            x0: x,
            y0: x,
            x1: x + 2.0,
            y1: x + 2.0,
            color: "#ff0000".into(),
            width: 4.0,
            erase: false,
        }
    }

    fn expect_snapshot(update: Option<RoomUpdate>) -> Room {
        match update {
            Some(RoomUpdate::Snapshot(room)) => room,
            other => panic!("Expected snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let store = store();
        let room = store
            .create_room(NewRoom {
                name: Some("Crypt".into()),
                ttl_days: Some(3),
            })
            .await
            .unwrap();

        let read = store.read(&room.id).await.unwrap();
        assert_eq!(read.name.as_deref(), Some("Crypt"));
        assert_eq!(read.expires_at - read.created_at, Duration::days(3));
        assert_eq!(store.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_ttl() {
        let store = store();
        for ttl_days in [0, 31] {
            let result = store
                .create_room(NewRoom {
                    name: None,
                    ttl_days: Some(ttl_days),
                })
                .await;
            assert!(matches!(result, Err(StoreError::InvalidRequest(_))));
        }
    }

    #[tokio::test]
    async fn test_read_missing_room() {
        let store = store();
        let result = store.read(&RoomId::generate()).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_subscribe_delivers_current_then_changes() {
        let store = store();
        let room = store.create_room(NewRoom::default()).await.unwrap();
        let mut sub = store.subscribe(&room.id).await.unwrap();

        let first = expect_snapshot(sub.next().await);
        assert!(first.tokens.is_empty());

        let tokens = TokenMap::from([(5, TokenPlacement::new(5, "mage"))]);
        store
            .write_fields(&room.id, RoomPatch::tokens(tokens.clone()))
            .await
            .unwrap();

        let second = expect_snapshot(sub.next().await);
        assert_eq!(second.tokens, tokens);
    }

    #[tokio::test]
    async fn test_field_merge_does_not_clobber_other_fields() {
        let store = store();
        let room = store.create_room(NewRoom::default()).await.unwrap();

        store
            .write_fields(&room.id, RoomPatch::append_strokes(vec![segment(1.0)]))
            .await
            .unwrap();
        let tokens = TokenMap::from([(9, TokenPlacement::new(9, "chest"))]);
        store
            .write_fields(&room.id, RoomPatch::tokens(tokens))
            .await
            .unwrap();
        store
            .write_fields(&room.id, RoomPatch::append_strokes(vec![segment(2.0)]))
            .await
            .unwrap();

        let read = store.read(&room.id).await.unwrap();
        assert_eq!(read.strokes, vec![segment(1.0), segment(2.0)]);
        assert_eq!(read.tokens.len(), 1);
    }

    #[tokio::test]
    async fn test_access_rules() {
        let store = store();
        let room = store.create_room(NewRoom::default()).await.unwrap();

        let mismatched = TokenMap::from([(1, TokenPlacement::new(2, "orc"))]);
        let result = store
            .write_fields(&room.id, RoomPatch::tokens(mismatched))
            .await;
        assert!(matches!(result, Err(StoreError::PermissionDenied(_))));

        let off_board = TokenMap::from([(3_600, TokenPlacement::new(3_600, "orc"))]);
        let result = store
            .write_fields(&room.id, RoomPatch::tokens(off_board))
            .await;
        assert!(matches!(result, Err(StoreError::PermissionDenied(_))));

        let bad_roll = RollEvent {
            dice_type: DiceType::D6,
            value: 7,
            nonce: "n".into(),
            timestamp: 0,
            author_id: "a".into(),
        };
        let result = store.write_fields(&room.id, RoomPatch::roll(bad_roll)).await;
        assert!(matches!(result, Err(StoreError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_locked_room_rejects_writes() {
        let store = store();
        let room = store.create_room(NewRoom::default()).await.unwrap();
        store.set_locked(&room.id, true).await.unwrap();

        let result = store
            .write_fields(&room.id, RoomPatch::rename("nope"))
            .await;
        tokio_test::assert_err!(result);

        store.set_locked(&room.id, false).await.unwrap();
        let result = store
            .write_fields(&room.id, RoomPatch::rename("ok"))
            .await;
        tokio_test::assert_ok!(result);
    }

    #[tokio::test]
    async fn test_delete_notifies_subscribers() {
        let store = store();
        let room = store.create_room(NewRoom::default()).await.unwrap();
        let mut sub = store.subscribe(&room.id).await.unwrap();
        let _ = sub.next().await;

        assert!(store.delete_room(&room.id).await);
        assert_eq!(sub.next().await, Some(RoomUpdate::Deleted));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let store = store();
        let now = Utc::now();
        let stale = Room::new(RoomId::parse("stale").unwrap(), None, now - Duration::days(2), 1);
        let fresh = Room::new(RoomId::parse("fresh").unwrap(), None, now, 1);
        store.insert(stale).await;
        store.insert(fresh).await;

        let deleted = store.delete_expired(now).await;
        assert_eq!(deleted, vec![RoomId::parse("stale").unwrap()]);
        assert_eq!(store.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_unsubscribed_receivers_are_pruned() {
        let store = store();
        let room = store.create_room(NewRoom::default()).await.unwrap();
        let sub = store.subscribe(&room.id).await.unwrap();
        assert_eq!(store.subscriber_count(&room.id).await, 1);

        sub.unsubscribe();
        assert_eq!(store.subscriber_count(&room.id).await, 0);
        store
            .write_fields(&room.id, RoomPatch::rename("after"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_post_message() {
        let store = store();
        let room = store.create_room(NewRoom::default()).await.unwrap();
        store
            .post_message(&room.id, ChatMessage::new("ana", "hola"))
            .await
            .unwrap();

        let messages = store.messages(&room.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "hola");
    }
}
