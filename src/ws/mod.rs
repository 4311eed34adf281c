//! WebSocket transport: per-connection runtime and dispatch

pub mod client;
pub mod handler;
