//! Matchmaking queue - ordered pending players with dedup and wait tracking

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Strict-FIFO pending queue.
///
/// `enqueued_at` both deduplicates enqueues and measures queue-to-match
/// latency; a player appears in it exactly while they are queued.
#[derive(Default)]
pub struct MatchQueue {
    queue: VecDeque<Uuid>,
    enqueued_at: HashMap<Uuid, Instant>,
}

impl MatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a player; duplicates are discarded
    pub fn push(&mut self, player_id: Uuid) -> bool {
        if self.enqueued_at.contains_key(&player_id) {
            return false;
        }
        self.enqueued_at.insert(player_id, Instant::now());
        self.queue.push_back(player_id);
        true
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Try to take one full batch from the front.
    ///
    /// Offline players encountered on the way are evicted. If the queue
    /// cannot fill a batch, the online survivors are prepended back in order
    /// and nothing is taken. A successful batch returns each player with the
    /// time they spent waiting.
    pub fn take_batch(
        &mut self,
        size: usize,
        is_online: impl Fn(&Uuid) -> bool,
    ) -> Option<Vec<(Uuid, Duration)>> {
        if size == 0 || self.queue.len() < size {
            return None;
        }

        let mut chosen = Vec::with_capacity(size);
        while let Some(pid) = self.queue.pop_front() {
            if !is_online(&pid) {
                self.enqueued_at.remove(&pid);
                continue;
            }
            chosen.push(pid);
            if chosen.len() == size {
                break;
            }
        }

        if chosen.len() < size {
            for pid in chosen.into_iter().rev() {
                self.queue.push_front(pid);
            }
            return None;
        }

        Some(
            chosen
                .into_iter()
                .map(|pid| {
                    let waited = self
                        .enqueued_at
                        .remove(&pid)
                        .map(|since| since.elapsed())
                        .unwrap_or_default();
                    (pid, waited)
                })
                .collect(),
        )
    }
}
