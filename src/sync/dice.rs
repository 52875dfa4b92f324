use rand::Rng;
use std::time::Duration;
use uuid::Uuid;

use crate::model::{DiceType, RollEvent};

/// What the dice panel shows
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DicePhase {
    #[default]
    Idle,
    Shaking(RollEvent),
    Revealing(RollEvent),
}

impl DicePhase {
    fn roll(&self) -> Option<&RollEvent> {
        match self {
            DicePhase::Idle => None,
            DicePhase::Shaking(event) | DicePhase::Revealing(event) => Some(event),
        }
    }
}

/// Ask the runtime to call `timer_elapsed(epoch)` after `after`.
/// A newer request replaces any older one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiceTimer {
    pub epoch: u64,
    pub after: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiceOutcome {
    pub phase_changed: bool,
    pub timer: Option<DiceTimer>,
    /// Set when this session's own roll just came back confirmed
    pub announce: Option<RollEvent>,
}

/// Shared dice register with per-client animation.
///
/// `Idle -> Shaking -> Revealing -> Idle`, keyed by nonce so each roll
/// animates at most once per client.
#[derive(Debug)]
pub struct DiceRollBroadcaster {
    author_id: String,
    shake: Duration,
    reveal: Duration,
    phase: DicePhase,
    epoch: u64,
    last_applied_nonce: Option<String>,
    /// Own roll still waiting for its echo
    local_nonce: Option<String>,
}

impl DiceRollBroadcaster {
    pub fn new(author_id: impl Into<String>, shake: Duration, reveal: Duration) -> Self {
        Self {
            author_id: author_id.into(),
            shake,
            reveal,
            phase: DicePhase::Idle,
            epoch: 0,
            last_applied_nonce: None,
            local_nonce: None,
        }
    }

    pub fn phase(&self) -> &DicePhase {
        &self.phase
    }

    pub fn last_applied_nonce(&self) -> Option<&str> {
        self.last_applied_nonce.as_deref()
    }

    fn start_cycle(&mut self, event: RollEvent) -> DiceTimer {
        self.epoch += 1;
        self.phase = DicePhase::Shaking(event);
        DiceTimer {
            epoch: self.epoch,
            after: self.shake,
        }
    }

    /// Roll locally and start shaking right away. The caller writes the event.
    pub fn roll<R: Rng + ?Sized>(
        &mut self,
        dice: DiceType,
        rng: &mut R,
        now_ms: i64,
    ) -> (RollEvent, DiceOutcome) {
        let event = RollEvent {
            dice_type: dice,
            value: dice.roll(rng),
            nonce: Uuid::new_v4().to_string(),
            timestamp: now_ms,
            author_id: self.author_id.clone(),
        };
        self.local_nonce = Some(event.nonce.clone());
        let timer = self.start_cycle(event.clone());
        let outcome = DiceOutcome {
            phase_changed: true,
            timer: Some(timer),
            announce: None,
        };
        (event, outcome)
    }

    /// The write for `nonce` failed, so no echo will come back for it
    pub fn roll_rejected(&mut self, nonce: &str) {
        if self.local_nonce.as_deref() == Some(nonce) {
            self.local_nonce = None;
        }
    }

    /// Fold in the register from a snapshot
    pub fn apply_remote(&mut self, current: Option<&RollEvent>) -> DiceOutcome {
        let Some(event) = current else {
            return DiceOutcome::default();
        };
        if self.last_applied_nonce.as_deref() == Some(event.nonce.as_str()) {
            return DiceOutcome::default();
        }
        self.last_applied_nonce = Some(event.nonce.clone());

        // Only the session that rolled it announces, never a later rejoin
        let own_echo = self.local_nonce.as_deref() == Some(event.nonce.as_str())
            && event.author_id == self.author_id;
        if own_echo {
            self.local_nonce = None;
        }
        let announce = own_echo.then(|| event.clone());
        let showing = self.phase.roll().map(|shown| shown.nonce == event.nonce);
        if own_echo || showing == Some(true) {
            return DiceOutcome {
                phase_changed: false,
                timer: None,
                announce,
            };
        }

        let timer = self.start_cycle(event.clone());
        DiceOutcome {
            phase_changed: true,
            timer: Some(timer),
            announce,
        }
    }

    /// Advance the animation; stale epochs are ignored
    pub fn timer_elapsed(&mut self, epoch: u64) -> DiceOutcome {
        if epoch != self.epoch {
            return DiceOutcome::default();
        }
        match std::mem::take(&mut self.phase) {
            DicePhase::Shaking(event) => {
                self.epoch += 1;
                self.phase = DicePhase::Revealing(event);
                DiceOutcome {
                    phase_changed: true,
                    timer: Some(DiceTimer {
                        epoch: self.epoch,
                        after: self.reveal,
                    }),
                    announce: None,
                }
            }
            DicePhase::Revealing(_) => DiceOutcome {
                phase_changed: true,
                ..DiceOutcome::default()
            },
            DicePhase::Idle => DiceOutcome::default(),
        }
    }
}
