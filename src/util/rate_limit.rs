//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a per-connection message rate limiter.
///
/// A limit of zero disables rate limiting (every message is allowed).
pub fn message_limiter(max_per_second: u32) -> Option<Arc<Limiter>> {
    NonZeroU32::new(max_per_second).map(|n| Arc::new(RateLimiter::direct(Quota::per_second(n))))
}
