//! Integration tests for the arena runtime
//!
//! These drive the room runtime, session registry and matchmaker together,
//! using short tick periods and real tokio time.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use uuid::Uuid;

use arena_server::game::room::{OnRoomClosed, RoomEvent, RoomManager, Sender};
use arena_server::matchmaking::Matcher;
use arena_server::metrics::Metrics;
use arena_server::protocol::{codec, codec::Body, PlayerInput, ServerBody};
use arena_server::session::{SessionError, SessionManager};
use arena_server::store::{IdempotencyStore, MemoryIdem};
use arena_server::ws::client::ClientHandle;

const TICK: Duration = Duration::from_millis(10);

/// Sender capability that records everything a room pushes
#[derive(Default)]
struct RecordingSender {
    frames: Mutex<Vec<(Uuid, ServerBody)>>,
}

impl RecordingSender {
    fn count_room_over(&self) -> usize {
        self.frames
            .lock()
            .iter()
            .filter(|(_, body)| matches!(body, ServerBody::RoomOver(_)))
            .count()
    }

    fn count_snapshots_for(&self, player: Uuid) -> usize {
        self.frames
            .lock()
            .iter()
            .filter(|(pid, body)| *pid == player && matches!(body, ServerBody::RoomSnapshot(_)))
            .count()
    }
}

impl Sender for RecordingSender {
    fn send(&self, player_id: Uuid, body: &ServerBody) -> Result<(), SessionError> {
        self.frames.lock().push((player_id, body.clone()));
        Ok(())
    }
}

fn room_manager(
    sender: Arc<RecordingSender>,
    idem: Arc<dyn IdempotencyStore>,
    closed: Arc<Mutex<Vec<Uuid>>>,
) -> Arc<RoomManager> {
    let on_close: OnRoomClosed = Arc::new(move |room_id, _players| {
        closed.lock().push(room_id);
    });
    Arc::new(RoomManager::new(
        TICK,
        sender,
        idem,
        Arc::new(Metrics::new()),
        on_close,
    ))
}

async fn wait_until(mut cond: impl FnMut() -> bool, wait: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + wait;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

mod room_runtime_tests {
    use super::*;

    /// A room ticks, broadcasts snapshots to its full roster, resolves the
    /// winner after a leave and closes exactly once.
    #[tokio::test]
    async fn room_lifecycle_runs_to_settlement() {
        let sender = Arc::new(RecordingSender::default());
        let closed = Arc::new(Mutex::new(Vec::new()));
        let rooms = room_manager(sender.clone(), MemoryIdem::new(), closed.clone());

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let room_id = rooms.create_room(Uuid::new_v4(), vec![a, b]);
        assert!(rooms.contains(room_id));

        // Let a few ticks elapse, then make B leave.
        tokio::time::sleep(TICK * 8).await;
        rooms.send_event(room_id, RoomEvent::Leave(b));

        assert!(
            wait_until(|| !rooms.contains(room_id), Duration::from_secs(2)).await,
            "room should close after the winner resolves"
        );

        // Both players saw snapshots while the match ran.
        assert!(sender.count_snapshots_for(a) >= 4);
        assert!(sender.count_snapshots_for(b) >= 4);

        // One RoomOver per roster member, naming A the winner.
        let frames = sender.frames.lock();
        let overs: Vec<_> = frames
            .iter()
            .filter_map(|(pid, body)| match body {
                ServerBody::RoomOver(over) => Some((*pid, over.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(overs.len(), 2);
        for (_, over) in &overs {
            assert_eq!(over.winner_id, a.to_string());
        }

        assert_eq!(closed.lock().clone(), vec![room_id]);

        // Events to a closed room are silently dropped.
        rooms.send_event(room_id, RoomEvent::Leave(a));
    }

    /// Movement inputs feed the simulation and show up in snapshots.
    #[tokio::test]
    async fn inputs_reach_the_simulation() {
        let sender = Arc::new(RecordingSender::default());
        let rooms = room_manager(
            sender.clone(),
            MemoryIdem::new(),
            Arc::new(Mutex::new(Vec::new())),
        );

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let room_id = rooms.create_room(Uuid::new_v4(), vec![a, b]);

        for _ in 0..4 {
            rooms.send_event(
                room_id,
                RoomEvent::Input(a, PlayerInput { dx: 5.0, dy: 0.0 }),
            );
            tokio::time::sleep(TICK).await;
        }
        tokio::time::sleep(TICK * 2).await;

        let frames = sender.frames.lock();
        let latest = frames
            .iter()
            .rev()
            .find_map(|(_, body)| match body {
                ServerBody::RoomSnapshot(snap) => Some(snap.clone()),
                _ => None,
            })
            .expect("at least one snapshot");

        let pa = latest
            .players
            .iter()
            .find(|p| p.player_id == a.to_string())
            .unwrap();
        assert!(pa.x > -50.0, "player A should have moved right");

        rooms.stop_room(room_id);
    }

    /// Every snapshot carries the exact roster the room was created with.
    #[tokio::test]
    async fn snapshot_roster_never_mutates() {
        let sender = Arc::new(RecordingSender::default());
        let rooms = room_manager(
            sender.clone(),
            MemoryIdem::new(),
            Arc::new(Mutex::new(Vec::new())),
        );

        let players: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let room_id = rooms.create_room(Uuid::new_v4(), players.clone());

        // A leave mid-match kills the player but keeps it in the roster.
        tokio::time::sleep(TICK * 3).await;
        rooms.send_event(room_id, RoomEvent::Leave(players[0]));
        tokio::time::sleep(TICK * 3).await;

        let mut want: Vec<String> = players.iter().map(|p| p.to_string()).collect();
        want.sort();

        let frames = sender.frames.lock();
        for (_, body) in frames.iter() {
            if let ServerBody::RoomSnapshot(snap) = body {
                let mut got: Vec<String> =
                    snap.players.iter().map(|p| p.player_id.clone()).collect();
                got.sort();
                assert_eq!(got, want);
            }
        }
        drop(frames);

        rooms.stop_room(room_id);
    }

    /// An admin stop terminates the loop without settlement.
    #[tokio::test]
    async fn stopped_room_closes_without_room_over() {
        let sender = Arc::new(RecordingSender::default());
        let closed = Arc::new(Mutex::new(Vec::new()));
        let rooms = room_manager(sender.clone(), MemoryIdem::new(), closed.clone());

        let room_id = rooms.create_room(Uuid::new_v4(), vec![Uuid::new_v4(), Uuid::new_v4()]);
        tokio::time::sleep(TICK * 3).await;
        rooms.stop_room(room_id);

        assert!(wait_until(|| !rooms.contains(room_id), Duration::from_secs(1)).await);
        assert_eq!(sender.count_room_over(), 0);
        assert_eq!(closed.lock().len(), 1);
    }
}

mod settlement_tests {
    use super::*;

    /// Two rooms settling the same match broadcast RoomOver only once.
    #[tokio::test]
    async fn settlement_is_idempotent_per_match() {
        let sender = Arc::new(RecordingSender::default());
        let idem = MemoryIdem::new();
        let rooms = room_manager(sender.clone(), idem, Arc::new(Mutex::new(Vec::new())));

        let match_id = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let first = rooms.create_room(match_id, vec![a, b]);
        let second = rooms.create_room(match_id, vec![a, b]);

        for room_id in [first, second] {
            rooms.send_event(room_id, RoomEvent::Leave(a));
            rooms.send_event(room_id, RoomEvent::Leave(b));
        }

        assert!(
            wait_until(
                || !rooms.contains(first) && !rooms.contains(second),
                Duration::from_secs(2)
            )
            .await
        );

        // One broadcast per roster member, from whichever room won the race.
        assert_eq!(sender.count_room_over(), 2);
    }
}

mod matchmaking_tests {
    use super::*;

    struct Player {
        id: Uuid,
        rx: mpsc::Receiver<Vec<u8>>,
    }

    fn connect_player(sessions: &Arc<SessionManager>, metrics: &Arc<Metrics>) -> Player {
        let (tx, rx) = mpsc::channel(256);
        let handle = ClientHandle::new(tx, Arc::new(Notify::new()), metrics.clone());
        let id = Uuid::new_v4();
        sessions.create(id, format!("player-{id}"), "token".to_string(), handle);
        Player { id, rx }
    }

    async fn next_body(player: &mut Player) -> Body {
        let frame = timeout(Duration::from_secs(2), player.rx.recv())
            .await
            .expect("frame within deadline")
            .expect("channel open");
        let (_, _, body) = codec::decode_message(&frame).unwrap();
        body
    }

    /// Two enqueued players are matched into one room; MATCH_RESP precedes
    /// every snapshot for that room and snapshots then flow at tick rate.
    #[tokio::test]
    async fn two_players_are_matched_and_simulated() {
        let metrics = Arc::new(Metrics::new());
        let sessions = SessionManager::new(Duration::from_secs(30), metrics.clone());

        let on_close: OnRoomClosed = {
            let sessions = sessions.clone();
            Arc::new(move |_room_id, players: &[Uuid]| {
                for pid in players {
                    sessions.set_room(*pid, None);
                }
            })
        };
        let rooms = Arc::new(RoomManager::new(
            TICK,
            sessions.clone(),
            MemoryIdem::new(),
            metrics.clone(),
            on_close,
        ));
        let matcher = Matcher::spawn(2, 64, rooms.clone(), sessions.clone(), metrics.clone());

        let mut a = connect_player(&sessions, &metrics);
        let mut b = connect_player(&sessions, &metrics);

        assert!(matcher.enqueue(a.id));
        assert!(matcher.enqueue(b.id));

        // First frame on both connections must be the match result.
        let (resp_a, resp_b) = match (next_body(&mut a).await, next_body(&mut b).await) {
            (Body::MatchResp(ra), Body::MatchResp(rb)) => (ra, rb),
            other => panic!("expected MatchResp first, got {:?}", other),
        };
        assert_eq!(resp_a.room_id, resp_b.room_id);
        assert_eq!(resp_a.players.len(), 2);

        let room_id = Uuid::parse_str(&resp_a.room_id).unwrap();
        assert_eq!(sessions.get(a.id).unwrap().room_id(), Some(room_id));

        // Snapshots follow on the same session sockets.
        let mut snapshots = 0;
        for _ in 0..5 {
            if let Body::RoomSnapshot(snap) = next_body(&mut a).await {
                assert_eq!(snap.players.len(), 2);
                snapshots += 1;
            }
        }
        assert!(snapshots >= 4);

        // Dropping B resolves the match; both receive exactly one RoomOver.
        rooms.send_event(room_id, RoomEvent::Leave(b.id));

        let mut over_a = 0;
        loop {
            match next_body(&mut a).await {
                Body::RoomOver(over) => {
                    assert_eq!(over.winner_id, a.id.to_string());
                    over_a += 1;
                    break;
                }
                Body::RoomSnapshot(_) => continue,
                other => panic!("unexpected frame: {:?}", other),
            }
        }
        assert_eq!(over_a, 1);

        // Room close clears the players' bindings.
        assert!(
            wait_until(
                || sessions.get(a.id).unwrap().room_id().is_none(),
                Duration::from_secs(1)
            )
            .await
        );
        assert_eq!(rooms.room_count(), 0);
    }

    /// Offline players are evicted at selection time, never matched.
    #[tokio::test]
    async fn offline_players_are_skipped() {
        let metrics = Arc::new(Metrics::new());
        let sessions = SessionManager::new(Duration::from_secs(30), metrics.clone());
        let on_close: OnRoomClosed = Arc::new(|_, _| {});
        let rooms = Arc::new(RoomManager::new(
            TICK,
            sessions.clone(),
            MemoryIdem::new(),
            metrics.clone(),
            on_close,
        ));
        let matcher = Matcher::spawn(2, 64, rooms.clone(), sessions.clone(), metrics.clone());

        let ghost = connect_player(&sessions, &metrics);
        let mut a = connect_player(&sessions, &metrics);
        let b = connect_player(&sessions, &metrics);

        sessions.mark_offline(ghost.id);

        assert!(matcher.enqueue(ghost.id));
        assert!(matcher.enqueue(a.id));
        assert!(matcher.enqueue(b.id));

        let resp = match next_body(&mut a).await {
            Body::MatchResp(resp) => resp,
            other => panic!("expected MatchResp, got {:?}", other),
        };
        assert!(!resp.players.contains(&ghost.id.to_string()));
        assert!(resp.players.contains(&b.id.to_string()));

        let room_id = Uuid::parse_str(&resp.room_id).unwrap();
        rooms.stop_room(room_id);
    }
}
