use chrono::{DateTime, Duration, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::SyncError;
use crate::model::DiceType;

pub const ROOM_ID_MAX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(value: &str) -> Result<Self, SyncError> {
        let value = value.trim();
        if value.is_empty() || value.len() > ROOM_ID_MAX_LEN {
            return Err(SyncError::InvalidRoomId(format!(
                "length must be 1..={ROOM_ID_MAX_LEN}, got {}",
                value.len()
            )));
        }
        if let Some(ch) = value
            .chars()
            .find(|ch| !(ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_'))
        {
            return Err(SyncError::InvalidRoomId(format!("invalid character '{ch}'")));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RoomId {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for RoomId {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPlacement {
    pub cell_index: u32,
    pub token_type_id: String,
}

impl TokenPlacement {
    pub fn new(cell_index: u32, token_type_id: impl Into<String>) -> Self {
        Self {
            cell_index,
            token_type_id: token_type_id.into(),
        }
    }
}

/// Cell index -> placement. Keys are unique, so a cell holds at most one token.
pub type TokenMap = BTreeMap<u32, TokenPlacement>;

/// JSON object keys are strings; buffered content (tagged frames) keeps them that way,
/// so cell keys accept both spellings.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct CellKey(u32);

impl<'de> Deserialize<'de> for CellKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CellKeyVisitor;

        impl<'de> Visitor<'de> for CellKeyVisitor {
            type Value = CellKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a cell index")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<CellKey, E> {
                u32::try_from(value)
                    .map(CellKey)
                    .map_err(|_| E::custom(format!("cell index {value} out of range")))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<CellKey, E> {
                value
                    .parse::<u32>()
                    .map(CellKey)
                    .map_err(|_| E::custom(format!("invalid cell index '{value}'")))
            }
        }

        deserializer.deserialize_any(CellKeyVisitor)
    }
}

fn deserialize_tokens<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TokenMap, D::Error> {
    let raw = BTreeMap::<CellKey, TokenPlacement>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(key, placement)| (key.0, placement)).collect())
}

fn deserialize_patch_tokens<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<TokenMap>, D::Error> {
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "deserialize_tokens")] TokenMap);

    Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(tokens)| tokens))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollEvent {
    #[serde(rename = "type")]
    pub dice_type: DiceType,
    pub value: u32,
    /// Sole deduplication key; fresh for every roll
    pub nonce: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub author_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeSegment {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    pub color: String,
    pub width: f32,
    pub erase: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    #[serde(default, deserialize_with = "deserialize_tokens")]
    pub tokens: TokenMap,
    #[serde(default)]
    pub rolled_dice: Option<RollEvent>,
    #[serde(default)]
    pub strokes: Vec<StrokeSegment>,
    #[serde(default)]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Room {
    pub fn new(id: RoomId, name: Option<String>, now: DateTime<Utc>, ttl_days: u32) -> Self {
        Self {
            id,
            tokens: TokenMap::new(),
            rolled_dice: None,
            strokes: Vec::new(),
            name,
            created_at: now,
            expires_at: now + Duration::days(i64::from(ttl_days)),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Field-level merge: fields absent from `patch` keep their current value.
    pub fn merge(&mut self, patch: RoomPatch) {
        if let Some(tokens) = patch.tokens {
            self.tokens = tokens;
        }
        if let Some(roll) = patch.rolled_dice {
            self.rolled_dice = Some(roll);
        }
        match patch.strokes {
            Some(StrokesUpdate::Append(mut batch)) => self.strokes.append(&mut batch),
            Some(StrokesUpdate::Replace(strokes)) => self.strokes = strokes,
            None => {}
        }
        if let Some(name) = patch.name {
            self.name = Some(name);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "segments", rename_all = "snake_case")]
pub enum StrokesUpdate {
    /// Store-level append; commutes with other clients' appends
    Append(Vec<StrokeSegment>),
    Replace(Vec<StrokeSegment>),
}

/// A partial room write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPatch {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_patch_tokens"
    )]
    pub tokens: Option<TokenMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_dice: Option<RollEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strokes: Option<StrokesUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl RoomPatch {
    pub fn tokens(tokens: TokenMap) -> Self {
        Self {
            tokens: Some(tokens),
            ..Default::default()
        }
    }

    pub fn roll(event: RollEvent) -> Self {
        Self {
            rolled_dice: Some(event),
            ..Default::default()
        }
    }

    pub fn append_strokes(batch: Vec<StrokeSegment>) -> Self {
        Self {
            strokes: Some(StrokesUpdate::Append(batch)),
            ..Default::default()
        }
    }

    pub fn clear_strokes() -> Self {
        Self {
            strokes: Some(StrokesUpdate::Replace(Vec::new())),
            ..Default::default()
        }
    }

    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_none()
            && self.rolled_dice.is_none()
            && self.strokes.is_none()
            && self.name.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub user: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(user: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// Room creation request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoom {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ttl_days: Option<u32>,
}
