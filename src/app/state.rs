//! Application state shared across routes

use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenService;
use crate::config::Config;
use crate::game::{room::OnRoomClosed, RoomManager};
use crate::matchmaking::Matcher;
use crate::metrics::Metrics;
use crate::session::SessionManager;
use crate::store;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub auth: Arc<TokenService>,
    pub sessions: Arc<SessionManager>,
    pub rooms: Arc<RoomManager>,
    pub matcher: Arc<Matcher>,
}

impl AppState {
    pub async fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let metrics = Arc::new(Metrics::new());
        let idem = store::connect(&config).await;
        let auth = Arc::new(TokenService::new(&config.jwt_secret));
        let sessions = SessionManager::new(config.reconnect_ttl, metrics.clone());

        // Closing a room clears its players' bindings so they can re-match.
        let on_close: OnRoomClosed = {
            let sessions = sessions.clone();
            Arc::new(move |_room_id, players| {
                for pid in players {
                    sessions.set_room(*pid, None);
                }
            })
        };

        let rooms = Arc::new(RoomManager::new(
            Duration::from_millis(config.tick_ms),
            sessions.clone(),
            idem,
            metrics.clone(),
            on_close,
        ));

        let matcher = Matcher::spawn(
            config.players_per_room,
            config.match_queue_size,
            rooms.clone(),
            sessions.clone(),
            metrics.clone(),
        );

        Self {
            config,
            metrics,
            auth,
            sessions,
            rooms,
            matcher,
        }
    }
}
