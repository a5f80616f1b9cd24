//! # huddle-client
//!
//! Client side of the Huddle hub.
//!
//! - **Registration**: [`RegistrationClient`] claims and force-removes names
//!   over HTTP, with an optional confirmed takeover on conflict
//! - **Reconnection**: [`ReconnectMachine`] is a pure state machine with a
//!   linear capped backoff ([`BackoffPolicy`])
//! - **Driver**: [`spawn`] runs the machine over a `tokio-tungstenite`
//!   socket and reports [`ClientEvent`]s
//! - **State file**: [`StateStore`] remembers the last session so an
//!   abandoned name can be released on the next start
//!
//! ## Crate Position
//!
//! Depends on: huddle-core, huddle-settings.
//! Depended on by: huddle.

#![deny(unsafe_code)]

pub mod api;
pub mod driver;
pub mod errors;
pub mod reconnect;
pub mod state_store;

pub use api::{RegistrationClient, validate_nickname};
pub use driver::{ClientEvent, ClientHandle, Command, DriverConfig, spawn};
pub use errors::ClientError;
pub use reconnect::{BackoffPolicy, ConnState, Effect, Event, ReconnectMachine, Status};
pub use state_store::{ClientState, StateStore};
