use serde::Deserialize;

use crate::error::SyncError;
use crate::model::catalog;

/// Raw drag/drop payload keyed the way the board's drag sources set it.
#[derive(Debug, Clone, Default)]
pub struct TransferPayload {
    /// Set by the palette: a bare token type id
    pub token_id: Option<String>,
    /// Set by a token on the board: JSON `{"id": <cell>, "tokenId": "<type>"}`
    pub from_board: Option<String>,
}

impl TransferPayload {
    pub fn palette(token_type_id: impl Into<String>) -> Self {
        Self {
            token_id: Some(token_type_id.into()),
            from_board: None,
        }
    }

    pub fn board(raw_json: impl Into<String>) -> Self {
        Self {
            token_id: None,
            from_board: Some(raw_json.into()),
        }
    }
}

/// What a drop asks the board to do, parsed once at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferIntent {
    PaletteDrop { token_type_id: String },
    BoardMove { from_cell: u32, token_type_id: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoardTokenWire {
    id: u32,
    token_id: String,
}

impl TransferIntent {
    pub fn parse(payload: &TransferPayload) -> Result<Self, SyncError> {
        if let Some(token_id) = payload.token_id.as_deref().filter(|id| !id.is_empty()) {
            if !catalog::is_known_token(token_id) {
                return Err(SyncError::UnknownTokenType(token_id.to_string()));
            }
            return Ok(TransferIntent::PaletteDrop {
                token_type_id: token_id.to_string(),
            });
        }

        let raw = payload
            .from_board
            .as_deref()
            .filter(|raw| !raw.is_empty())
            .ok_or_else(|| SyncError::MalformedPayload("empty transfer".into()))?;
        let wire: BoardTokenWire = serde_json::from_str(raw)?;
        if wire.token_id.is_empty() {
            return Err(SyncError::MalformedPayload("board token without type".into()));
        }
        if !catalog::is_known_token(&wire.token_id) {
            return Err(SyncError::UnknownTokenType(wire.token_id));
        }
        Ok(TransferIntent::BoardMove {
            from_cell: wire.id,
            token_type_id: wire.token_id,
        })
    }
}
