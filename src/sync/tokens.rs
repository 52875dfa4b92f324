use crate::error::SyncError;
use crate::model::{catalog, RoomPatch, TokenMap, TokenPlacement, TransferIntent};

/// Local mirror of the room's token grid.
///
/// Every successful mutation returns the whole map as one `tokens` write.
/// Concurrent writers overwrite each other (last write wins).
#[derive(Debug, Clone)]
pub struct TokenBoardSync {
    grid_size: u32,
    tokens: TokenMap,
}

impl TokenBoardSync {
    pub fn new(grid_size: u32) -> Self {
        Self {
            grid_size,
            tokens: TokenMap::new(),
        }
    }

    pub fn tokens(&self) -> &TokenMap {
        &self.tokens
    }

    pub fn token_at(&self, cell: u32) -> Option<&TokenPlacement> {
        self.tokens.get(&cell)
    }

    fn check_cell(&self, cell: u32) -> Result<(), SyncError> {
        if cell >= self.grid_size * self.grid_size {
            return Err(SyncError::CellOutOfRange {
                cell,
                grid_size: self.grid_size,
            });
        }
        Ok(())
    }

    fn snapshot_patch(&self) -> RoomPatch {
        RoomPatch::tokens(self.tokens.clone())
    }

    /// Put a catalog token on an empty cell
    pub fn place(&mut self, cell: u32, token_type_id: &str) -> Result<Option<RoomPatch>, SyncError> {
        self.check_cell(cell)?;
        if !catalog::is_known_token(token_type_id) {
            return Err(SyncError::UnknownTokenType(token_type_id.to_string()));
        }
        Ok(self.insert(cell, token_type_id))
    }

    fn insert(&mut self, cell: u32, token_type_id: &str) -> Option<RoomPatch> {
        if self.tokens.contains_key(&cell) {
            return None;
        }
        self.tokens
            .insert(cell, TokenPlacement::new(cell, token_type_id));
        Some(self.snapshot_patch())
    }

    /// Move (or copy, with `duplicate`) the token on `from` to an empty `to`
    pub fn move_token(
        &mut self,
        from: u32,
        to: u32,
        duplicate: bool,
    ) -> Result<Option<RoomPatch>, SyncError> {
        self.check_cell(from)?;
        self.check_cell(to)?;
        if self.tokens.contains_key(&to) {
            return Ok(None);
        }
        let token_type_id = match self.tokens.get(&from) {
            Some(placement) => placement.token_type_id.clone(),
            None => return Ok(None),
        };

        if !duplicate {
            self.tokens.remove(&from);
        }
        self.tokens
            .insert(to, TokenPlacement::new(to, token_type_id));
        Ok(Some(self.snapshot_patch()))
    }

    pub fn remove(&mut self, cell: u32) -> Result<Option<RoomPatch>, SyncError> {
        self.check_cell(cell)?;
        Ok(self
            .tokens
            .remove(&cell)
            .map(|_| self.snapshot_patch()))
    }

    /// Execute a parsed drop onto `cell`
    pub fn apply_transfer(
        &mut self,
        intent: &TransferIntent,
        cell: u32,
        duplicate: bool,
    ) -> Result<Option<RoomPatch>, SyncError> {
        match intent {
            TransferIntent::PaletteDrop { token_type_id } => self.place(cell, token_type_id),
            TransferIntent::BoardMove {
                from_cell,
                token_type_id,
            } => {
                self.check_cell(cell)?;
                if self.tokens.contains_key(from_cell) {
                    self.move_token(*from_cell, cell, duplicate)
                } else {
                    // Source already gone (moved by someone else): drop what was dragged
                    self.place(cell, token_type_id)
                }
            }
        }
    }

    /// Adopt the room's map; returns whether anything changed
    pub fn apply_remote(&mut self, remote: &TokenMap) -> bool {
        if &self.tokens == remote {
            return false;
        }
        self.tokens = remote.clone();
        true
    }
}
