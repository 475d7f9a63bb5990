//! sqlgate_server: REST surface over the sqlgate query gateway.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod sweeper;
