//! Matchmaker service - single consumer batching players into rooms

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::game::RoomManager;
use crate::metrics::Metrics;
use crate::protocol::{MatchResp, ServerBody};
use crate::session::SessionManager;

use super::queue::MatchQueue;

/// Non-blocking front door to the matchmaker task
pub struct Matcher {
    tx: mpsc::Sender<Uuid>,
}

impl Matcher {
    /// Start the consumer loop and return its enqueue handle
    pub fn spawn(
        players_per_room: usize,
        queue_size: usize,
        rooms: Arc<RoomManager>,
        sessions: Arc<SessionManager>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(queue_size);

        tokio::spawn(run(rx, players_per_room, rooms, sessions, metrics));

        Arc::new(Self { tx })
    }

    /// Push a player into the backlog; false when it is full
    pub fn enqueue(&self, player_id: Uuid) -> bool {
        self.tx.try_send(player_id).is_ok()
    }
}

async fn run(
    mut rx: mpsc::Receiver<Uuid>,
    players_per_room: usize,
    rooms: Arc<RoomManager>,
    sessions: Arc<SessionManager>,
    metrics: Arc<Metrics>,
) {
    let mut queue = MatchQueue::new();

    while let Some(pid) = rx.recv().await {
        if !queue.push(pid) {
            continue;
        }
        metrics.match_queue.store(queue.len() as u64, Ordering::Relaxed);

        while let Some(batch) = queue.take_batch(players_per_room, |p| sessions.is_online(*p)) {
            let players: Vec<Uuid> = batch.iter().map(|(pid, _)| *pid).collect();
            let match_id = Uuid::new_v4();
            let room_id = rooms.create_room(match_id, players.clone());

            info!(
                match_id = %match_id,
                room_id = %room_id,
                player_count = players.len(),
                "match formed"
            );

            let resp = ServerBody::MatchResp(MatchResp {
                match_id: match_id.to_string(),
                room_id: room_id.to_string(),
                players: players.iter().map(|p| p.to_string()).collect(),
            });

            for (pid, waited) in batch {
                sessions.set_room(pid, Some(room_id));
                metrics
                    .match_duration_ms
                    .observe(waited.as_secs_f64() * 1000.0);
                let _ = sessions.send(pid, &resp);
            }
        }

        metrics.match_queue.store(queue.len() as u64, Ordering::Relaxed);
    }
}
