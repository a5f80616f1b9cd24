//! # huddle-server
//!
//! Axum HTTP + `WebSocket` presence hub.
//!
//! - Identity registry: name claims, forced removal, attach, eviction
//! - Connection multiplexer: roster broadcasts and verbatim chat fan-out
//! - Liveness monitor: periodic transport probes, pruning of silent peers
//! - Operational endpoints: `/health` and Prometheus `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::HuddleServer;
