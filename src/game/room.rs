//! Room runtime - single-writer simulation actor and room registry
//!
//! Only a room's own loop touches its `BattleState`; everything else talks to
//! it through the bounded event queue. Snapshots and settlement go the other
//! way through the `Sender` capability, so rooms never hold session objects.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::protocol::{PlayerInput, RoomOver, ServerBody, SkillCast};
use crate::session::SessionError;
use crate::store::IdempotencyStore;

use super::battle::BattleState;

const EVENT_QUEUE_SIZE: usize = 128;
const SETTLE_TTL: Duration = Duration::from_secs(300);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Push capability a room uses to reach players; implemented by the session
/// manager, faked in tests
pub trait Sender: Send + Sync {
    fn send(&self, player_id: Uuid, body: &ServerBody) -> Result<(), SessionError>;
}

/// Events accepted by a room's queue
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// Reserved; reconnects post it but the room currently ignores it
    Join(Uuid),
    /// Terminal for the player: hp drops to zero
    Leave(Uuid),
    Input(Uuid, PlayerInput),
    Skill(Uuid, SkillCast),
}

impl RoomEvent {
    /// Terminal events must never be silently lost
    fn is_critical(&self) -> bool {
        matches!(self, RoomEvent::Leave(_))
    }
}

/// Handle to a running room
pub struct RoomHandle {
    pub id: Uuid,
    events: mpsc::Sender<RoomEvent>,
    stop: Arc<Notify>,
}

/// Hook invoked after a room's loop returns and it left the registry
pub type OnRoomClosed = Arc<dyn Fn(Uuid, &[Uuid]) + Send + Sync>;

struct Room {
    id: Uuid,
    match_id: Uuid,
    players: Vec<Uuid>,
    events: mpsc::Receiver<RoomEvent>,
    state: BattleState,
    tick: Duration,
    sender: Arc<dyn Sender>,
    idem: Arc<dyn IdempotencyStore>,
    metrics: Arc<Metrics>,
    stop: Arc<Notify>,
}

impl Room {
    /// Drive the simulation until a terminal winner or an external stop.
    ///
    /// Tick ordering: state advances, the snapshot broadcasts, then the
    /// winner check runs; events landing mid-tick apply before the next
    /// advance.
    async fn run(mut self) {
        info!(room_id = %self.id, match_id = %self.match_id, "room started");

        let start = tokio::time::Instant::now() + self.tick;
        let mut ticker = tokio::time::interval_at(start, self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => return,
                },
                _ = ticker.tick() => {
                    let started = Instant::now();

                    self.state.tick_forward();
                    self.broadcast_snapshot();

                    self.metrics
                        .room_tick_delay_ms
                        .observe(started.elapsed().as_secs_f64() * 1000.0);

                    if let (winner, true) = self.state.winner() {
                        self.settle(winner).await;
                        return;
                    }
                }
                _ = self.stop.notified() => {
                    info!(room_id = %self.id, "room stopped");
                    return;
                }
            }
        }
    }

    fn handle_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Join(_) => {}
            RoomEvent::Leave(pid) => self.state.mark_dead(pid),
            RoomEvent::Input(pid, input) => self.state.apply_input(pid, input.dx, input.dy),
            RoomEvent::Skill(pid, skill) => {
                let target = Uuid::parse_str(&skill.target_id).ok();
                self.state.apply_skill(pid, target, skill.skill_id);
            }
        }
    }

    fn broadcast_snapshot(&self) {
        let snap = ServerBody::RoomSnapshot(self.state.snapshot(self.id));
        for pid in &self.players {
            let _ = self.sender.send(*pid, &snap);
        }
    }

    /// Broadcast `RoomOver` at most once per match.
    ///
    /// A store failure or timeout degrades to broadcasting anyway: clients
    /// only act on the first `RoomOver` they see, so duplicate settlement is
    /// cheaper than a lost one.
    async fn settle(&self, winner: Option<Uuid>) {
        let key = format!("settle:{}", self.match_id);

        let first = match timeout(SETTLE_TIMEOUT, self.idem.set_if_not_exists(&key, SETTLE_TTL))
            .await
        {
            Ok(Ok(first)) => first,
            Ok(Err(e)) => {
                warn!(room_id = %self.id, error = %e, "idempotent settle failed");
                true
            }
            Err(_) => {
                warn!(room_id = %self.id, "idempotent settle timed out");
                true
            }
        };
        if !first {
            return;
        }

        let over = ServerBody::RoomOver(RoomOver {
            room_id: self.id.to_string(),
            winner_id: winner.map(|w| w.to_string()).unwrap_or_default(),
        });
        for pid in &self.players {
            let _ = self.sender.send(*pid, &over);
        }

        info!(
            room_id = %self.id,
            match_id = %self.match_id,
            winner = %winner.map(|w| w.to_string()).unwrap_or_default(),
            "room settled"
        );
    }
}

/// Owns room lifecycles and routes events by id
pub struct RoomManager {
    rooms: Arc<DashMap<Uuid, RoomHandle>>,
    tick: Duration,
    sender: Arc<dyn Sender>,
    idem: Arc<dyn IdempotencyStore>,
    metrics: Arc<Metrics>,
    on_close: OnRoomClosed,
}

impl RoomManager {
    pub fn new(
        tick: Duration,
        sender: Arc<dyn Sender>,
        idem: Arc<dyn IdempotencyStore>,
        metrics: Arc<Metrics>,
        on_close: OnRoomClosed,
    ) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            tick,
            sender,
            idem,
            metrics,
            on_close,
        }
    }

    /// Construct a room, register it and start its loop
    pub fn create_room(&self, match_id: Uuid, players: Vec<Uuid>) -> Uuid {
        let room_id = Uuid::new_v4();
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        let stop = Arc::new(Notify::new());

        let room = Room {
            id: room_id,
            match_id,
            players: players.clone(),
            events: events_rx,
            state: BattleState::new(&players),
            tick: self.tick,
            sender: self.sender.clone(),
            idem: self.idem.clone(),
            metrics: self.metrics.clone(),
            stop: stop.clone(),
        };

        self.rooms.insert(
            room_id,
            RoomHandle {
                id: room_id,
                events: events_tx,
                stop,
            },
        );

        let rooms = self.rooms.clone();
        let on_close = self.on_close.clone();
        tokio::spawn(async move {
            room.run().await;

            rooms.remove(&room_id);
            on_close(room_id, &players);
            info!(room_id = %room_id, "room closed");
        });

        room_id
    }

    /// Forward an event to a room; events for missing rooms are dropped.
    ///
    /// On a full queue, inputs are dropped (snapshots supersede them) while
    /// terminal events fall back to an awaited send so they cannot be lost.
    pub fn send_event(&self, room_id: Uuid, event: RoomEvent) {
        let Some(handle) = self.rooms.get(&room_id) else {
            return;
        };

        match handle.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) if event.is_critical() => {
                let tx = handle.events.clone();
                tokio::spawn(async move {
                    let _ = tx.send(event).await;
                });
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(room_id = %room_id, "room event queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Stop a room without a winner (admin path)
    pub fn stop_room(&self, room_id: Uuid) {
        if let Some(handle) = self.rooms.get(&room_id) {
            handle.stop.notify_one();
        }
    }

    pub fn contains(&self, room_id: Uuid) -> bool {
        self.rooms.contains_key(&room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
