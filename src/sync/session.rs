//! Async runtime around `SessionCoordinator`
//!
//! One task per joined room owns all session state. It waits on UI commands,
//! room snapshots, dice timers and the stroke flush tick. Store writes go
//! through a separate writer task so they land in issue order without
//! stalling the loop.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::TabletopConfig;
use crate::error::SyncError;
use crate::model::{ChatMessage, DiceType, RollEvent, RoomId, RoomPatch, StrokeSegment, TransferPayload};
use crate::store::{RoomStore, RoomUpdate, Subscription};
use crate::sync::coordinator::{Effect, Identity, SessionCoordinator, SessionEvent};
use crate::sync::dice::DiceTimer;
use crate::sync::strokes::Brush;

type Reply<T> = oneshot::Sender<Result<T, SyncError>>;

enum Command {
    PlaceToken {
        cell: u32,
        token_type_id: String,
        reply: Reply<()>,
    },
    MoveToken {
        from: u32,
        to: u32,
        duplicate: bool,
        reply: Reply<()>,
    },
    RemoveToken {
        cell: u32,
        reply: Reply<()>,
    },
    DropTransfer {
        payload: TransferPayload,
        cell: u32,
        duplicate: bool,
        reply: Reply<()>,
    },
    RollDice {
        dice: DiceType,
        reply: Reply<RollEvent>,
    },
    BeginStroke {
        x: f32,
        y: f32,
        brush: Brush,
    },
    ExtendStroke {
        x: f32,
        y: f32,
        reply: Reply<Option<StrokeSegment>>,
    },
    EndStroke,
    ClearDrawing {
        reply: Reply<()>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
}

enum WriteJob {
    Write(RoomPatch),
    Post(ChatMessage),
}

struct WriteFailure {
    error: SyncError,
    /// Nonce of the roll the failed write carried
    roll_nonce: Option<String>,
}

/// Handle to a joined room. Commands apply locally before they return;
/// the matching store write follows in the background.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    room_id: RoomId,
    commands: UnboundedSender<Command>,
}

/// Join a room: the room must exist. Events stop once the session ends.
pub async fn join_room(
    store: Arc<dyn RoomStore>,
    room_id: RoomId,
    identity: Identity,
    config: &TabletopConfig,
) -> Result<(SessionHandle, UnboundedReceiver<SessionEvent>), SyncError> {
    store.read(&room_id).await?;
    let subscription = store.subscribe(&room_id).await?;

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (failure_tx, failure_rx) = mpsc::unbounded_channel();
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();

    let writes = spawn_writer(Arc::clone(&store), room_id.clone(), failure_tx);

    tracing::info!("{} joined room {}", identity.display_name, room_id);

    let task = SessionTask {
        room_id: room_id.clone(),
        coordinator: SessionCoordinator::new(identity, config),
        commands: command_rx,
        events: event_tx,
        writes,
        failures: failure_rx,
        timer_tx,
        timers: timer_rx,
        dice_timer: None,
        rng: StdRng::from_entropy(),
    };
    tokio::spawn(task.run(subscription, config.stroke_flush_interval()));

    Ok((
        SessionHandle {
            room_id,
            commands: command_tx,
        },
        event_rx,
    ))
}

/// Ordered store writer. Keeps draining queued writes after the session ends.
fn spawn_writer(
    store: Arc<dyn RoomStore>,
    room_id: RoomId,
    failures: UnboundedSender<WriteFailure>,
) -> UnboundedSender<WriteJob> {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriteJob>();
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let (result, roll_nonce) = match job {
                WriteJob::Write(patch) => {
                    let roll_nonce = patch.rolled_dice.as_ref().map(|r| r.nonce.clone());
                    (store.write_fields(&room_id, patch).await, roll_nonce)
                }
                WriteJob::Post(message) => (store.post_message(&room_id, message).await, None),
            };
            if let Err(e) = result {
                tracing::warn!("Write to room {} failed: {}", room_id, e);
                let _ = failures.send(WriteFailure {
                    error: e.into(),
                    roll_nonce,
                });
            }
        }
    });
    tx
}

impl SessionHandle {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| SyncError::SessionClosed)?;
        rx.await.map_err(|_| SyncError::SessionClosed)?
    }

    fn send(&self, command: Command) -> Result<(), SyncError> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::SessionClosed)
    }

    pub async fn place_token(&self, cell: u32, token_type_id: &str) -> Result<(), SyncError> {
        let token_type_id = token_type_id.to_string();
        self.request(|reply| Command::PlaceToken {
            cell,
            token_type_id,
            reply,
        })
        .await
    }

    pub async fn move_token(&self, from: u32, to: u32, duplicate: bool) -> Result<(), SyncError> {
        self.request(|reply| Command::MoveToken {
            from,
            to,
            duplicate,
            reply,
        })
        .await
    }

    pub async fn remove_token(&self, cell: u32) -> Result<(), SyncError> {
        self.request(|reply| Command::RemoveToken { cell, reply })
            .await
    }

    /// Drop a dragged payload on `cell`; unreadable payloads are ignored
    pub async fn drop_transfer(
        &self,
        payload: TransferPayload,
        cell: u32,
        duplicate: bool,
    ) -> Result<(), SyncError> {
        self.request(|reply| Command::DropTransfer {
            payload,
            cell,
            duplicate,
            reply,
        })
        .await
    }

    pub async fn roll_dice(&self, dice: DiceType) -> Result<RollEvent, SyncError> {
        self.request(|reply| Command::RollDice { dice, reply }).await
    }

    pub fn begin_stroke(&self, x: f32, y: f32, brush: Brush) -> Result<(), SyncError> {
        self.send(Command::BeginStroke { x, y, brush })
    }

    /// The new segment for immediate rendering, `None` without an active stroke
    pub async fn extend_stroke(&self, x: f32, y: f32) -> Result<Option<StrokeSegment>, SyncError> {
        self.request(|reply| Command::ExtendStroke { x, y, reply })
            .await
    }

    pub fn end_stroke(&self) -> Result<(), SyncError> {
        self.send(Command::EndStroke)
    }

    pub async fn clear_drawing(&self) -> Result<(), SyncError> {
        self.request(|reply| Command::ClearDrawing { reply }).await
    }

    /// Flush pending ink and stop. Writes already queued still complete.
    pub async fn leave(&self) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Leave { reply: tx })?;
        rx.await.map_err(|_| SyncError::SessionClosed)
    }
}

struct SessionTask {
    room_id: RoomId,
    coordinator: SessionCoordinator,
    commands: UnboundedReceiver<Command>,
    events: UnboundedSender<SessionEvent>,
    writes: UnboundedSender<WriteJob>,
    failures: UnboundedReceiver<WriteFailure>,
    timer_tx: UnboundedSender<u64>,
    timers: UnboundedReceiver<u64>,
    dice_timer: Option<JoinHandle<()>>,
    rng: StdRng,
}

impl SessionTask {
    async fn run(mut self, mut subscription: Subscription, flush_every: Duration) {
        let mut flush = interval(flush_every);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Leave { reply }) => {
                        self.teardown(subscription);
                        tracing::info!("{} left room {}", self.coordinator.identity().display_name, self.room_id);
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        // Every handle dropped
                        self.teardown(subscription);
                        return;
                    }
                },
                update = subscription.next() => match update {
                    Some(RoomUpdate::Snapshot(room)) => {
                        let effects = self.coordinator.handle_snapshot(&room);
                        self.run_effects(effects);
                    }
                    Some(RoomUpdate::Deleted) | None => {
                        tracing::warn!("Room {} is no longer available", self.room_id);
                        self.abort_timer();
                        let _ = self.events.send(SessionEvent::RoomUnavailable);
                        return;
                    }
                },
                Some(epoch) = self.timers.recv() => {
                    let effects = self.coordinator.dice_timer_elapsed(epoch);
                    self.run_effects(effects);
                }
                Some(failure) = self.failures.recv() => {
                    if let Some(nonce) = &failure.roll_nonce {
                        self.coordinator.roll_rejected(nonce);
                    }
                    let _ = self.events.send(SessionEvent::ActionFailed(failure.error.to_string()));
                }
                _ = flush.tick() => {
                    if let Some(effect) = self.coordinator.flush_strokes() {
                        self.run_effects(vec![effect]);
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::PlaceToken {
                cell,
                token_type_id,
                reply,
            } => {
                let result = self.coordinator.place_token(cell, &token_type_id);
                let _ = reply.send(self.apply(result));
            }
            Command::MoveToken {
                from,
                to,
                duplicate,
                reply,
            } => {
                let result = self.coordinator.move_token(from, to, duplicate);
                let _ = reply.send(self.apply(result));
            }
            Command::RemoveToken { cell, reply } => {
                let result = self.coordinator.remove_token(cell);
                let _ = reply.send(self.apply(result));
            }
            Command::DropTransfer {
                payload,
                cell,
                duplicate,
                reply,
            } => {
                let result = self.coordinator.drop_transfer(&payload, cell, duplicate);
                let _ = reply.send(self.apply(result));
            }
            Command::RollDice { dice, reply } => {
                let now_ms = Utc::now().timestamp_millis();
                let (event, effects) = self.coordinator.roll_dice(dice, &mut self.rng, now_ms);
                self.run_effects(effects);
                let _ = reply.send(Ok(event));
            }
            Command::BeginStroke { x, y, brush } => self.coordinator.begin_stroke(x, y, brush),
            Command::ExtendStroke { x, y, reply } => {
                let _ = reply.send(Ok(self.coordinator.extend_stroke(x, y)));
            }
            Command::EndStroke => self.coordinator.end_stroke(),
            Command::ClearDrawing { reply } => {
                let effects = self.coordinator.clear_drawing();
                self.run_effects(effects);
                let _ = reply.send(Ok(()));
            }
            Command::Leave { .. } => {}
        }
    }

    fn apply(&mut self, result: Result<Vec<Effect>, SyncError>) -> Result<(), SyncError> {
        let effects = result?;
        self.run_effects(effects);
        Ok(())
    }

    fn run_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Write(patch) => {
                    let _ = self.writes.send(WriteJob::Write(patch));
                }
                Effect::Post(message) => {
                    let _ = self.writes.send(WriteJob::Post(message));
                }
                Effect::Emit(event) => {
                    let _ = self.events.send(event);
                }
                Effect::ScheduleDice(timer) => self.schedule(timer),
            }
        }
    }

    fn schedule(&mut self, timer: DiceTimer) {
        self.abort_timer();
        let tx = self.timer_tx.clone();
        self.dice_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timer.after).await;
            let _ = tx.send(timer.epoch);
        }));
    }

    fn abort_timer(&mut self) {
        if let Some(handle) = self.dice_timer.take() {
            handle.abort();
        }
    }

    fn teardown(&mut self, subscription: Subscription) {
        if let Some(effect) = self.coordinator.flush_strokes() {
            self.run_effects(vec![effect]);
        }
        self.abort_timer();
        subscription.unsubscribe();
    }
}
