//! HTTP surface: health, matchmaking and the socket upgrade

pub mod middleware;
pub mod routes;

pub use routes::build_router;
