//! # huddle-core
//!
//! Foundation types shared by the Huddle server and client crates:
//!
//! - **Branded IDs**: `UserId`, `ConnectionId` as newtypes for type safety
//! - **Protocol**: HTTP bodies for name claims and the JSON frames exchanged
//!   over the duplex channel
//! - **Errors**: `HubError` via `thiserror`, with stable wire codes
//! - **Constants**: liveness and reconnection timing defaults

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod ids;
pub mod protocol;

pub use errors::HubError;
pub use ids::{ConnectionId, UserId};
pub use protocol::{RosterEntry, User, UserRef};
