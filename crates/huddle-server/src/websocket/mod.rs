//! Duplex channel: connection state, the multiplexer hub, per-socket
//! sessions, and the liveness sweep.

pub mod connection;
pub mod hub;
pub mod liveness;
pub mod session;
