//! Multi-client scenarios over one shared in-process store
//!
//! Each client runs a real session task; time is paused so dice timers and
//! stroke flushes advance deterministically.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use tabletop_rs::config::TabletopConfig;
use tabletop_rs::error::SyncError;
use tabletop_rs::model::{
    DiceType, RollEvent, Room, RoomId, RoomPatch, StrokeSegment, TokenMap, TokenPlacement,
    TransferPayload,
};
use tabletop_rs::store::{MemoryRoomStore, RoomStore};
use tabletop_rs::sync::coordinator::roll_announcement;
use tabletop_rs::sync::{
    join_room, Brush, DicePhase, Effect, Identity, SessionCoordinator, SessionEvent, SessionHandle,
};

fn setup() -> (Arc<MemoryRoomStore>, TabletopConfig) {
    let config = TabletopConfig::default();
    (Arc::new(MemoryRoomStore::new(&config)), config)
}

async fn seeded_room(store: &MemoryRoomStore, id: &str, edit: impl FnOnce(&mut Room)) -> RoomId {
    let room_id = RoomId::parse(id).unwrap();
    let mut room = Room::new(room_id.clone(), None, Utc::now(), 1);
    edit(&mut room);
    store.insert(room).await;
    room_id
}

async fn join(
    store: &Arc<MemoryRoomStore>,
    room_id: &RoomId,
    who: &str,
    config: &TabletopConfig,
) -> (SessionHandle, UnboundedReceiver<SessionEvent>) {
    let store: Arc<dyn RoomStore> = store.clone();
    join_room(store, room_id.clone(), Identity::new(who, who.to_uppercase()), config)
        .await
        .unwrap()
}

/// Wait (in paused time) for the first event matching `pred`
async fn wait_for(
    rx: &mut UnboundedReceiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            match rx.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("Session ended while waiting"),
            }
        }
    })
    .await
    .expect("Timed out waiting for event")
}

fn drain(rx: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn segment(x: f32) -> StrokeSegment {
    StrokeSegment {
        x0: x,
        y0: x,
        x1: x + 5.0,
        y1: x + 5.0,
        color: "#ef4444".into(),
        width: 3.0,
        erase: false,
    }
}

fn roll(nonce: &str, value: u32, author: &str) -> RollEvent {
    RollEvent {
        dice_type: DiceType::D20,
        value,
        nonce: nonce.into(),
        timestamp: 0,
        author_id: author.into(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_placed_token_reaches_other_client() {
    let (store, config) = setup();
    let room_id = seeded_room(&store, "tokens", |_| {}).await;
    let (alice, _alice_events) = join(&store, &room_id, "a", &config).await;
    let (_bob, mut bob_events) = join(&store, &room_id, "b", &config).await;

    alice.place_token(17, "warrior").await.unwrap();

    let event = wait_for(&mut bob_events, |e| matches!(e, SessionEvent::TokensChanged(_))).await;
    let expected = TokenMap::from([(17, TokenPlacement::new(17, "warrior"))]);
    assert_eq!(event, SessionEvent::TokensChanged(expected.clone()));
    assert_eq!(store.read(&room_id).await.unwrap().tokens, expected);
}

#[tokio::test(start_paused = true)]
async fn test_palette_drop_and_board_move() {
    let (store, config) = setup();
    let room_id = seeded_room(&store, "drops", |_| {}).await;
    let (alice, _events) = join(&store, &room_id, "a", &config).await;

    alice
        .drop_transfer(TransferPayload::palette("dragon"), 30, false)
        .await
        .unwrap();
    alice
        .drop_transfer(
            TransferPayload::board(r#"{"id":30,"tokenId":"dragon"}"#),
            31,
            false,
        )
        .await
        .unwrap();
    // Garbage is ignored, not an error
    alice
        .drop_transfer(TransferPayload::board("nope"), 32, false)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let tokens = store.read(&room_id).await.unwrap().tokens;
    assert_eq!(tokens, TokenMap::from([(31, TokenPlacement::new(31, "dragon"))]));
}

#[tokio::test(start_paused = true)]
async fn test_remote_roll_animates_once() {
    let (store, config) = setup();
    let room_id = seeded_room(&store, "dice", |room| {
        room.rolled_dice = Some(roll("n0", 8, "a"));
    })
    .await;
    let (_bob, mut bob_events) = join(&store, &room_id, "b", &config).await;

    // The roll already in the register plays once for the newcomer
    let joined = wait_for(&mut bob_events, |e| matches!(e, SessionEvent::DiceChanged(_))).await;
    assert_eq!(joined, SessionEvent::DiceChanged(DicePhase::Shaking(roll("n0", 8, "a"))));
    wait_for(&mut bob_events, |e| *e == SessionEvent::DiceChanged(DicePhase::Idle)).await;

    let event = roll("n1", 14, "a");
    store
        .write_fields(&room_id, RoomPatch::roll(event.clone()))
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let shaking = wait_for(&mut bob_events, |e| matches!(e, SessionEvent::DiceChanged(_))).await;
    assert_eq!(shaking, SessionEvent::DiceChanged(DicePhase::Shaking(event.clone())));

    let revealing = wait_for(&mut bob_events, |e| matches!(e, SessionEvent::DiceChanged(_))).await;
    assert_eq!(revealing, SessionEvent::DiceChanged(DicePhase::Revealing(event)));
    assert!(started.elapsed() >= Duration::from_millis(1_800));

    let idle = wait_for(&mut bob_events, |e| matches!(e, SessionEvent::DiceChanged(_))).await;
    assert_eq!(idle, SessionEvent::DiceChanged(DicePhase::Idle));
    assert!(started.elapsed() >= Duration::from_millis(3_300));

    // Same register delivered again: nothing to animate
    store
        .write_fields(&room_id, RoomPatch::rename("after"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!drain(&mut bob_events)
        .iter()
        .any(|e| matches!(e, SessionEvent::DiceChanged(_))));

    // Bob did not roll, so Bob never announces
    assert!(store.messages(&room_id).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_author_rejoining_mid_roll_does_not_repost() {
    let (store, config) = setup();
    let room_id = seeded_room(&store, "rejoin", |room| {
        room.rolled_dice = Some(roll("n7", 11, "a"));
    })
    .await;
    let (_alice, mut alice_events) = join(&store, &room_id, "a", &config).await;

    let shaking = wait_for(&mut alice_events, |e| matches!(e, SessionEvent::DiceChanged(_))).await;
    assert_eq!(shaking, SessionEvent::DiceChanged(DicePhase::Shaking(roll("n7", 11, "a"))));
    wait_for(&mut alice_events, |e| *e == SessionEvent::DiceChanged(DicePhase::Idle)).await;
    assert!(store.messages(&room_id).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_roller_posts_exactly_one_chat_line() {
    let (store, config) = setup();
    let room_id = seeded_room(&store, "chat", |_| {}).await;
    let (alice, _alice_events) = join(&store, &room_id, "a", &config).await;
    let (_bob, _bob_events) = join(&store, &room_id, "b", &config).await;

    let event = alice.roll_dice(DiceType::D20).await.unwrap();
    assert!(DiceType::D20.accepts(event.value));

    tokio::time::sleep(Duration::from_millis(50)).await;
    for n in 0..3 {
        store
            .write_fields(&room_id, RoomPatch::rename(format!("again {}", n)))
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_secs(5)).await;

    let messages = store.messages(&room_id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].user, "A");
    assert_eq!(messages[0].text, roll_announcement("A", &event));
    assert_eq!(store.read(&room_id).await.unwrap().rolled_dice, Some(event));
}

#[test]
fn test_concurrent_movers_last_write_wins() {
    let config = TabletopConfig::default();
    let store = MemoryRoomStore::new(&config);
    tokio_test::block_on(async {
        let room_id = seeded_room(&store, "race", |room| {
            room.tokens = TokenMap::from([(1, TokenPlacement::new(1, "rogue"))]);
        })
        .await;
        let room = store.read(&room_id).await.unwrap();

        let mut alice = SessionCoordinator::new(Identity::new("a", "A"), &config);
        let mut bob = SessionCoordinator::new(Identity::new("b", "B"), &config);
        alice.handle_snapshot(&room);
        bob.handle_snapshot(&room);

        // Both act on the same snapshot before seeing each other's write
        let writes = |effects: Vec<Effect>| -> Vec<RoomPatch> {
            effects
                .into_iter()
                .filter_map(|e| match e {
                    Effect::Write(patch) => Some(patch),
                    _ => None,
                })
                .collect()
        };
        let from_alice = writes(alice.move_token(1, 2, false).unwrap());
        let from_bob = writes(bob.move_token(1, 3, false).unwrap());

        for patch in from_alice.into_iter().chain(from_bob) {
            store.write_fields(&room_id, patch).await.unwrap();
        }

        let tokens = store.read(&room_id).await.unwrap().tokens;
        assert_eq!(tokens, TokenMap::from([(3, TokenPlacement::new(3, "rogue"))]));
    });
}

#[tokio::test(start_paused = true)]
async fn test_join_replays_ink_once() {
    let (store, config) = setup();
    let room_id = seeded_room(&store, "ink", |room| {
        room.strokes = vec![segment(1.0), segment(2.0)];
    })
    .await;
    let (_carol, mut events) = join(&store, &room_id, "c", &config).await;

    let first = wait_for(&mut events, |e| matches!(e, SessionEvent::DrawSegment(_))).await;
    let second = wait_for(&mut events, |e| matches!(e, SessionEvent::DrawSegment(_))).await;
    assert_eq!(first, SessionEvent::DrawSegment(segment(1.0)));
    assert_eq!(second, SessionEvent::DrawSegment(segment(2.0)));

    store
        .write_fields(&room_id, RoomPatch::rename("again"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, SessionEvent::DrawSegment(_))));
}

#[tokio::test(start_paused = true)]
async fn test_strokes_flush_and_clear_propagate() {
    let (store, config) = setup();
    let room_id = seeded_room(&store, "board", |_| {}).await;
    let (alice, _alice_events) = join(&store, &room_id, "a", &config).await;
    let (_bob, mut bob_events) = join(&store, &room_id, "b", &config).await;

    alice.begin_stroke(10.0, 10.0, Brush::default()).unwrap();
    let drawn = alice.extend_stroke(20.0, 20.0).await.unwrap().unwrap();
    alice.end_stroke().unwrap();

    let seen = wait_for(&mut bob_events, |e| matches!(e, SessionEvent::DrawSegment(_))).await;
    assert_eq!(seen, SessionEvent::DrawSegment(drawn));

    alice.clear_drawing().await.unwrap();
    wait_for(&mut bob_events, |e| *e == SessionEvent::ClearCanvas).await;
    assert!(store.read(&room_id).await.unwrap().strokes.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_leave_flushes_pending_ink() {
    let (store, config) = setup();
    let room_id = seeded_room(&store, "leave", |_| {}).await;
    let (alice, _events) = join(&store, &room_id, "a", &config).await;

    alice.begin_stroke(0.0, 0.0, Brush::default()).unwrap();
    alice.extend_stroke(1.0, 1.0).await.unwrap();
    alice.extend_stroke(2.0, 2.0).await.unwrap();
    alice.leave().await.unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.read(&room_id).await.unwrap().strokes.len(), 2);
    assert_eq!(store.subscriber_count(&room_id).await, 0);
    assert!(matches!(
        alice.place_token(1, "orc").await,
        Err(SyncError::SessionClosed)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_write_surfaces_action_failed() {
    let (store, config) = setup();
    let room_id = seeded_room(&store, "locked", |_| {}).await;
    let (alice, mut events) = join(&store, &room_id, "a", &config).await;
    store.set_locked(&room_id, true).await.unwrap();

    // Applied locally first; the store says no afterwards
    alice.place_token(5, "orc").await.unwrap();

    let failed = wait_for(&mut events, |e| matches!(e, SessionEvent::ActionFailed(_))).await;
    let SessionEvent::ActionFailed(reason) = failed else {
        unreachable!();
    };
    assert!(reason.contains("read-only"));
    assert!(store.read(&room_id).await.unwrap().tokens.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_roll_is_forgotten() {
    let (store, config) = setup();
    let room_id = seeded_room(&store, "locked-dice", |_| {}).await;
    let (alice, mut events) = join(&store, &room_id, "a", &config).await;
    store.set_locked(&room_id, true).await.unwrap();

    let event = alice.roll_dice(DiceType::D12).await.unwrap();
    wait_for(&mut events, |e| matches!(e, SessionEvent::ActionFailed(_))).await;

    // The local cycle still completes
    wait_for(&mut events, |e| *e == SessionEvent::DiceChanged(DicePhase::Idle)).await;

    // A later copy of that event is not treated as Alice's confirmed roll
    store.set_locked(&room_id, false).await.unwrap();
    store
        .write_fields(&room_id, RoomPatch::roll(event.clone()))
        .await
        .unwrap();
    let replay = wait_for(&mut events, |e| matches!(e, SessionEvent::DiceChanged(_))).await;
    assert_eq!(replay, SessionEvent::DiceChanged(DicePhase::Shaking(event)));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(store.messages(&room_id).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deleted_room_ends_session() {
    let (store, config) = setup();
    let room_id = seeded_room(&store, "doomed", |_| {}).await;
    let (alice, mut events) = join(&store, &room_id, "a", &config).await;

    assert!(store.delete_room(&room_id).await);
    wait_for(&mut events, |e| *e == SessionEvent::RoomUnavailable).await;

    assert!(matches!(
        alice.roll_dice(DiceType::D6).await,
        Err(SyncError::SessionClosed)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_join_missing_room() {
    let (store, config) = setup();
    let store: Arc<dyn RoomStore> = store;
    let result = join_room(
        store,
        RoomId::parse("missing").unwrap(),
        Identity::new("a", "A"),
        &config,
    )
    .await;
    assert!(matches!(result, Err(SyncError::RoomUnavailable(_))));
}
