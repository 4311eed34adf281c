//! HTTP surface: websocket upgrade, health and metrics endpoints

pub mod routes;

pub use routes::build_router;
