use rand::Rng;

use crate::config::TabletopConfig;
use crate::error::SyncError;
use crate::model::{
    ChatMessage, DiceType, RollEvent, Room, RoomPatch, StrokeSegment, TokenMap, TransferIntent,
    TransferPayload,
};
use crate::sync::dice::{DiceOutcome, DicePhase, DiceRollBroadcaster, DiceTimer};
use crate::sync::strokes::{Brush, StrokeLog, StrokeReplay};
use crate::sync::tokens::TokenBoardSync;

/// Who this client is in the room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Compared with `RollEvent::author_id` to pick the chat announcer
    pub author_id: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(author_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            author_id: author_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// What the UI hears from a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    TokensChanged(TokenMap),
    DiceChanged(DicePhase),
    DrawSegment(StrokeSegment),
    ClearCanvas,
    /// The room is gone or unreachable; the session has ended
    RoomUnavailable,
    ActionFailed(String),
}

/// Work the runtime performs on the coordinator's behalf
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Write(RoomPatch),
    Post(ChatMessage),
    Emit(SessionEvent),
    ScheduleDice(DiceTimer),
}

pub fn roll_announcement(display_name: &str, event: &RollEvent) -> String {
    format!(
        "{} rolled a {} and got {}",
        display_name, event.dice_type, event.value
    )
}

/// One client's view of a room, free of I/O.
///
/// Local actions apply optimistically and return the writes to make.
/// Snapshots are folded into tokens, dice and strokes, in that order.
#[derive(Debug)]
pub struct SessionCoordinator {
    identity: Identity,
    tokens: TokenBoardSync,
    dice: DiceRollBroadcaster,
    strokes: StrokeLog,
}

impl SessionCoordinator {
    pub fn new(identity: Identity, config: &TabletopConfig) -> Self {
        let dice = DiceRollBroadcaster::new(
            identity.author_id.clone(),
            config.shake_duration(),
            config.reveal_duration(),
        );
        Self {
            identity,
            tokens: TokenBoardSync::new(config.grid_size),
            dice,
            strokes: StrokeLog::new(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn tokens(&self) -> &TokenMap {
        self.tokens.tokens()
    }

    pub fn dice_phase(&self) -> &DicePhase {
        self.dice.phase()
    }

    pub fn strokes(&self) -> &StrokeLog {
        &self.strokes
    }

    pub fn handle_snapshot(&mut self, room: &Room) -> Vec<Effect> {
        let mut effects = Vec::new();

        if self.tokens.apply_remote(&room.tokens) {
            effects.push(Effect::Emit(SessionEvent::TokensChanged(room.tokens.clone())));
        }

        let outcome = self.dice.apply_remote(room.rolled_dice.as_ref());
        self.push_dice(outcome, &mut effects);

        match self.strokes.apply_remote(&room.strokes) {
            StrokeReplay::Unchanged => {}
            StrokeReplay::Append(segments) => {
                effects.extend(
                    segments
                        .into_iter()
                        .map(|s| Effect::Emit(SessionEvent::DrawSegment(s))),
                );
            }
            StrokeReplay::Reset(segments) => {
                effects.push(Effect::Emit(SessionEvent::ClearCanvas));
                effects.extend(
                    segments
                        .into_iter()
                        .map(|s| Effect::Emit(SessionEvent::DrawSegment(s))),
                );
            }
        }
        effects
    }

    fn push_dice(&self, outcome: DiceOutcome, effects: &mut Vec<Effect>) {
        if outcome.phase_changed {
            effects.push(Effect::Emit(SessionEvent::DiceChanged(self.dice.phase().clone())));
        }
        if let Some(timer) = outcome.timer {
            effects.push(Effect::ScheduleDice(timer));
        }
        if let Some(event) = outcome.announce {
            let text = roll_announcement(&self.identity.display_name, &event);
            effects.push(Effect::Post(ChatMessage::new(
                self.identity.display_name.clone(),
                text,
            )));
        }
    }

    fn token_effects(&self, patch: Option<RoomPatch>) -> Vec<Effect> {
        match patch {
            Some(patch) => vec![
                Effect::Emit(SessionEvent::TokensChanged(self.tokens.tokens().clone())),
                Effect::Write(patch),
            ],
            None => Vec::new(),
        }
    }

    pub fn place_token(&mut self, cell: u32, token_type_id: &str) -> Result<Vec<Effect>, SyncError> {
        let patch = self.tokens.place(cell, token_type_id)?;
        Ok(self.token_effects(patch))
    }

    pub fn move_token(&mut self, from: u32, to: u32, duplicate: bool) -> Result<Vec<Effect>, SyncError> {
        let patch = self.tokens.move_token(from, to, duplicate)?;
        Ok(self.token_effects(patch))
    }

    pub fn remove_token(&mut self, cell: u32) -> Result<Vec<Effect>, SyncError> {
        let patch = self.tokens.remove(cell)?;
        Ok(self.token_effects(patch))
    }

    /// Unreadable drops are discarded without an error
    pub fn drop_transfer(
        &mut self,
        payload: &TransferPayload,
        cell: u32,
        duplicate: bool,
    ) -> Result<Vec<Effect>, SyncError> {
        let intent = match TransferIntent::parse(payload) {
            Ok(intent) => intent,
            Err(e) => {
                tracing::debug!("Discarding drop on cell {}: {}", cell, e);
                return Ok(Vec::new());
            }
        };
        let patch = self.tokens.apply_transfer(&intent, cell, duplicate)?;
        Ok(self.token_effects(patch))
    }

    pub fn roll_dice<R: Rng + ?Sized>(
        &mut self,
        dice: DiceType,
        rng: &mut R,
        now_ms: i64,
    ) -> (RollEvent, Vec<Effect>) {
        let (event, outcome) = self.dice.roll(dice, rng, now_ms);
        let mut effects = Vec::new();
        self.push_dice(outcome, &mut effects);
        effects.push(Effect::Write(RoomPatch::roll(event.clone())));
        (event, effects)
    }

    /// A roll write failed; stop waiting for its echo
    pub fn roll_rejected(&mut self, nonce: &str) {
        self.dice.roll_rejected(nonce);
    }

    pub fn dice_timer_elapsed(&mut self, epoch: u64) -> Vec<Effect> {
        let outcome = self.dice.timer_elapsed(epoch);
        let mut effects = Vec::new();
        self.push_dice(outcome, &mut effects);
        effects
    }

    pub fn begin_stroke(&mut self, x: f32, y: f32, brush: Brush) {
        self.strokes.begin_stroke(x, y, brush);
    }

    pub fn extend_stroke(&mut self, x: f32, y: f32) -> Option<StrokeSegment> {
        self.strokes.extend_stroke(x, y)
    }

    pub fn end_stroke(&mut self) {
        self.strokes.end_stroke();
    }

    pub fn flush_strokes(&mut self) -> Option<Effect> {
        self.strokes.take_batch().map(Effect::Write)
    }

    pub fn clear_drawing(&mut self) -> Vec<Effect> {
        let patch = self.strokes.clear();
        vec![Effect::Emit(SessionEvent::ClearCanvas), Effect::Write(patch)]
    }
}
