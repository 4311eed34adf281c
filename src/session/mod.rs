//! Session registry - durable player identity across transport instances
//!
//! A session outlives any single socket: transport loss marks it offline and
//! the sweeper only removes it once the reconnect window has lapsed. All
//! outbound traffic for a player funnels through its session so the per-player
//! sequence number stays monotonic across reconnects.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::protocol::{codec, ServerBody};
use crate::ws::client::{ClientError, ClientHandle};

const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,

    #[error("session offline")]
    Offline,

    #[error("send queue full")]
    QueueFull,
}

/// Mutable per-session fields, guarded by the session's own lock
struct SessionInner {
    room_id: Option<Uuid>,
    online: bool,
    last_seen: Instant,
    sender: Option<ClientHandle>,
}

/// Durable player identity
pub struct Session {
    pub player_id: Uuid,
    pub username: String,
    pub reconnect_token: String,
    seq: AtomicU64,
    inner: Mutex<SessionInner>,
}

impl Session {
    fn new(player_id: Uuid, username: String, reconnect_token: String, sender: ClientHandle) -> Self {
        Self {
            player_id,
            username,
            reconnect_token,
            seq: AtomicU64::new(0),
            inner: Mutex::new(SessionInner {
                room_id: None,
                online: true,
                last_seen: Instant::now(),
                sender: Some(sender),
            }),
        }
    }

    pub fn room_id(&self) -> Option<Uuid> {
        self.inner.lock().room_id
    }

    pub fn is_online(&self) -> bool {
        self.inner.lock().online
    }

    /// Install a new sender, closing any previous connection
    fn set_sender(&self, sender: ClientHandle) {
        let old = {
            let mut inner = self.inner.lock();
            let old = inner.sender.take();
            inner.sender = Some(sender.clone());
            inner.online = true;
            inner.last_seen = Instant::now();
            old
        };
        if let Some(old) = old {
            if !old.same_connection(&sender) {
                old.close();
            }
        }
    }

    fn clear_sender(&self) {
        let mut inner = self.inner.lock();
        inner.sender = None;
        inner.online = false;
        inner.last_seen = Instant::now();
    }

    /// Encode with the next per-session seq and push to the bound connection
    pub fn send(&self, body: &ServerBody) -> Result<(), SessionError> {
        let sender = {
            let inner = self.inner.lock();
            if !inner.online {
                return Err(SessionError::Offline);
            }
            match &inner.sender {
                Some(sender) => sender.clone(),
                None => return Err(SessionError::Offline),
            }
        };

        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let data = codec::encode_raw(body.msg_type(), body.encode_body(), seq);
        sender.send(data).map_err(|e| match e {
            ClientError::QueueFull => SessionError::QueueFull,
            ClientError::Closed => SessionError::Offline,
        })
    }
}

/// Owns every session and serializes lifecycle transitions
pub struct SessionManager {
    sessions: DashMap<Uuid, Arc<Session>>,
    reconnect_ttl: Duration,
    metrics: Arc<Metrics>,
}

impl SessionManager {
    pub fn new(reconnect_ttl: Duration, metrics: Arc<Metrics>) -> Arc<Self> {
        let manager = Arc::new(Self {
            sessions: DashMap::new(),
            reconnect_ttl,
            metrics,
        });

        let sweeper = manager.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                sweeper.sweep();
            }
        });

        manager
    }

    /// Insert a freshly logged-in session bound to the given connection
    pub fn create(
        &self,
        player_id: Uuid,
        username: String,
        reconnect_token: String,
        sender: ClientHandle,
    ) -> Arc<Session> {
        let session = Arc::new(Session::new(player_id, username, reconnect_token, sender));
        self.sessions.insert(player_id, session.clone());
        self.refresh_online_gauge();
        info!(player_id = %player_id, "session created");
        session
    }

    /// Rebind an existing session to a new connection
    pub fn bind(&self, player_id: Uuid, sender: ClientHandle) -> Option<Arc<Session>> {
        let session = self.sessions.get(&player_id)?.clone();
        session.set_sender(sender);
        self.refresh_online_gauge();
        info!(player_id = %player_id, "session rebound");
        Some(session)
    }

    pub fn get(&self, player_id: Uuid) -> Option<Arc<Session>> {
        self.sessions.get(&player_id).map(|s| s.clone())
    }

    /// Idempotent room assignment; absent sessions are ignored
    pub fn set_room(&self, player_id: Uuid, room_id: Option<Uuid>) {
        if let Some(session) = self.sessions.get(&player_id) {
            session.inner.lock().room_id = room_id;
        }
    }

    /// Clear the sender and start the reconnect window
    pub fn mark_offline(&self, player_id: Uuid) {
        if let Some(session) = self.sessions.get(&player_id) {
            session.clear_sender();
        }
        self.refresh_online_gauge();
    }

    /// Mark offline only if `handle` is still the bound sender, returning
    /// whether it was.
    ///
    /// Used on connection teardown so a stale socket noticing its closure
    /// late cannot knock a freshly rebound session offline.
    pub fn release(&self, player_id: Uuid, handle: &ClientHandle) -> bool {
        let mut released = false;
        if let Some(session) = self.sessions.get(&player_id) {
            let mut inner = session.inner.lock();
            let owned = inner
                .sender
                .as_ref()
                .is_some_and(|current| current.same_connection(handle));
            if owned {
                inner.sender = None;
                inner.online = false;
                inner.last_seen = Instant::now();
                released = true;
            }
        }
        self.refresh_online_gauge();
        released
    }

    pub fn remove(&self, player_id: Uuid) {
        self.sessions.remove(&player_id);
        self.refresh_online_gauge();
    }

    pub fn is_online(&self, player_id: Uuid) -> bool {
        self.sessions
            .get(&player_id)
            .map(|s| s.is_online())
            .unwrap_or(false)
    }

    pub fn send(&self, player_id: Uuid, body: &ServerBody) -> Result<(), SessionError> {
        let session = self.get(player_id).ok_or(SessionError::NotFound)?;
        session.send(body)
    }

    /// Best-effort send to each recipient, ignoring individual failures
    pub fn broadcast(&self, player_ids: &[Uuid], body: &ServerBody) {
        for pid in player_ids {
            let _ = self.send(*pid, body);
        }
    }

    fn refresh_online_gauge(&self) {
        let count = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_online())
            .count() as u64;
        self.metrics.online_sessions.store(count, Ordering::Relaxed);
    }

    /// Remove sessions whose reconnect window has lapsed.
    ///
    /// Eligibility is re-checked under the session lock at removal time so a
    /// player rebinding concurrently is never evicted.
    fn sweep(&self) {
        let candidates: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|entry| {
                let inner = entry.value().inner.lock();
                !inner.online && inner.last_seen.elapsed() > self.reconnect_ttl
            })
            .map(|entry| *entry.key())
            .collect();

        if candidates.is_empty() {
            return;
        }

        let mut removed = 0;
        for pid in candidates {
            let evicted = self
                .sessions
                .remove_if(&pid, |_, session| {
                    let inner = session.inner.lock();
                    !inner.online && inner.last_seen.elapsed() > self.reconnect_ttl
                })
                .is_some();
            if evicted {
                removed += 1;
                debug!(player_id = %pid, "session expired");
            }
        }

        if removed > 0 {
            self.refresh_online_gauge();
        }
    }
}

/// Rooms and the matchmaker reach players through this capability instead of
/// holding session objects
impl crate::game::room::Sender for SessionManager {
    fn send(&self, player_id: Uuid, body: &ServerBody) -> Result<(), SessionError> {
        let session = self.get(player_id).ok_or(SessionError::NotFound)?;
        session.send(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{codec::Body, ErrorResp, Pong};
    use tokio::sync::{mpsc, Notify};

    fn test_handle(
        metrics: &Arc<Metrics>,
        capacity: usize,
    ) -> (ClientHandle, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = ClientHandle::new(tx, Arc::new(Notify::new()), metrics.clone());
        (handle, rx)
    }

    fn pong() -> ServerBody {
        ServerBody::Pong(Pong {
            client_ts: 1,
            server_ts: 2,
        })
    }

    #[tokio::test]
    async fn send_uses_monotonic_seq() {
        let metrics = Arc::new(Metrics::new());
        let manager = SessionManager::new(Duration::from_secs(30), metrics.clone());
        let (handle, mut rx) = test_handle(&metrics, 8);

        let pid = Uuid::new_v4();
        manager.create(pid, "ada".to_string(), "token".to_string(), handle);

        manager.send(pid, &pong()).unwrap();
        manager.send(pid, &pong()).unwrap();
        manager.send(pid, &pong()).unwrap();

        let mut last_seq = 0;
        for _ in 0..3 {
            let frame = rx.recv().await.unwrap();
            let (_, seq, _) = codec::decode_message(&frame).unwrap();
            assert!(seq > last_seq, "seq must be strictly increasing");
            last_seq = seq;
        }
    }

    #[tokio::test]
    async fn seq_survives_rebind() {
        let metrics = Arc::new(Metrics::new());
        let manager = SessionManager::new(Duration::from_secs(30), metrics.clone());
        let (first, mut first_rx) = test_handle(&metrics, 8);

        let pid = Uuid::new_v4();
        manager.create(pid, "ada".to_string(), "token".to_string(), first);
        manager.send(pid, &pong()).unwrap();
        let (_, first_seq, _) = codec::decode_message(&first_rx.recv().await.unwrap()).unwrap();

        manager.mark_offline(pid);
        let (second, mut second_rx) = test_handle(&metrics, 8);
        assert!(manager.bind(pid, second).is_some());

        manager.send(pid, &pong()).unwrap();
        let (_, second_seq, _) = codec::decode_message(&second_rx.recv().await.unwrap()).unwrap();
        assert!(second_seq > first_seq);
    }

    #[tokio::test]
    async fn offline_session_refuses_sends() {
        let metrics = Arc::new(Metrics::new());
        let manager = SessionManager::new(Duration::from_secs(30), metrics.clone());
        let (handle, _rx) = test_handle(&metrics, 8);

        let pid = Uuid::new_v4();
        manager.create(pid, "ada".to_string(), "token".to_string(), handle);
        manager.mark_offline(pid);

        assert!(matches!(manager.send(pid, &pong()), Err(SessionError::Offline)));
        assert!(!manager.is_online(pid));
    }

    #[tokio::test]
    async fn send_to_unknown_player_fails() {
        let metrics = Arc::new(Metrics::new());
        let manager = SessionManager::new(Duration::from_secs(30), metrics);

        assert!(matches!(
            manager.send(Uuid::new_v4(), &pong()),
            Err(SessionError::NotFound)
        ));
    }

    #[tokio::test]
    async fn full_queue_counts_dropped_messages() {
        let metrics = Arc::new(Metrics::new());
        let manager = SessionManager::new(Duration::from_secs(30), metrics.clone());
        let (handle, _rx) = test_handle(&metrics, 1);

        let pid = Uuid::new_v4();
        manager.create(pid, "ada".to_string(), "token".to_string(), handle);

        manager.send(pid, &pong()).unwrap();
        assert!(matches!(
            manager.send(pid, &pong()),
            Err(SessionError::QueueFull)
        ));
        assert_eq!(metrics.dropped_messages.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn release_ignores_stale_handles() {
        let metrics = Arc::new(Metrics::new());
        let manager = SessionManager::new(Duration::from_secs(30), metrics.clone());
        let (old, _old_rx) = test_handle(&metrics, 8);

        let pid = Uuid::new_v4();
        manager.create(pid, "ada".to_string(), "token".to_string(), old.clone());

        let (new, _new_rx) = test_handle(&metrics, 8);
        manager.bind(pid, new).unwrap();

        // The stale socket noticing its closure must not knock the fresh
        // connection offline.
        assert!(!manager.release(pid, &old));
        assert!(manager.is_online(pid));
    }

    #[tokio::test]
    async fn release_from_the_bound_handle_goes_offline() {
        let metrics = Arc::new(Metrics::new());
        let manager = SessionManager::new(Duration::from_secs(30), metrics.clone());
        let (handle, _rx) = test_handle(&metrics, 8);

        let pid = Uuid::new_v4();
        manager.create(pid, "ada".to_string(), "token".to_string(), handle.clone());

        assert!(manager.release(pid, &handle));
        assert!(!manager.is_online(pid));
    }

    #[tokio::test]
    async fn sweep_removes_only_lapsed_sessions() {
        let metrics = Arc::new(Metrics::new());
        let manager = SessionManager::new(Duration::from_millis(50), metrics.clone());

        let (h1, _rx1) = test_handle(&metrics, 8);
        let (h2, _rx2) = test_handle(&metrics, 8);
        let lapsed = Uuid::new_v4();
        let online = Uuid::new_v4();
        manager.create(lapsed, "a".to_string(), "t".to_string(), h1);
        manager.create(online, "b".to_string(), "t".to_string(), h2);

        manager.mark_offline(lapsed);
        tokio::time::sleep(Duration::from_millis(80)).await;
        manager.sweep();

        assert!(manager.get(lapsed).is_none());
        assert!(manager.get(online).is_some());
    }

    #[tokio::test]
    async fn sweep_spares_freshly_rebound_session() {
        let metrics = Arc::new(Metrics::new());
        let manager = SessionManager::new(Duration::from_millis(50), metrics.clone());

        let (h1, _rx1) = test_handle(&metrics, 8);
        let pid = Uuid::new_v4();
        manager.create(pid, "a".to_string(), "t".to_string(), h1);
        manager.mark_offline(pid);
        tokio::time::sleep(Duration::from_millis(80)).await;

        // Rebind in the window between candidate collection and removal.
        let (h2, _rx2) = test_handle(&metrics, 8);
        manager.bind(pid, h2).unwrap();
        manager.sweep();

        assert!(manager.get(pid).is_some());
        assert!(manager.is_online(pid));
    }

    #[tokio::test]
    async fn broadcast_ignores_failed_recipients() {
        let metrics = Arc::new(Metrics::new());
        let manager = SessionManager::new(Duration::from_secs(30), metrics.clone());

        let (h1, mut rx1) = test_handle(&metrics, 8);
        let alive = Uuid::new_v4();
        manager.create(alive, "a".to_string(), "t".to_string(), h1);

        let body = ServerBody::Error(ErrorResp {
            code: 1,
            message: "x".to_string(),
        });
        manager.broadcast(&[Uuid::new_v4(), alive], &body);

        let frame = rx1.recv().await.unwrap();
        let (_, _, decoded) = codec::decode_message(&frame).unwrap();
        assert!(matches!(decoded, Body::ErrorResp(_)));
    }
}
