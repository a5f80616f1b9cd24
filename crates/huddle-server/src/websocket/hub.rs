//! Connection multiplexer and broadcast hub.
//!
//! The hub owns the [`IdentityRegistry`] and the set of open connections
//! behind one lock, so every inbound event, sweep, and HTTP request runs as
//! an atomic step against a consistent view. Outbound frames are queued with
//! `try_send`, so holding the lock never waits on a slow peer.

use std::collections::HashMap;
use std::sync::Arc;

use huddle_core::protocol::{InboundMessage, MessageKind, ServerMessage};
use huddle_core::{ConnectionId, HubError, RosterEntry, User, UserId, UserRef};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::connection::{ClientConnection, Frame};
use crate::metrics as names;
use crate::registry::{Evicted, IdentityRegistry};

/// What the hub did with one inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Replied `pong` to an application ping.
    Pong,
    /// Evicted the departing user (if known) and broadcast the roster.
    Exited {
        /// The user that was targeted.
        user: Option<UserId>,
    },
    /// Fanned a chat payload out to every open connection.
    Fanout {
        /// Connections the frame was queued for.
        recipients: usize,
    },
    /// Answered a roster query.
    Roster,
    /// Bound the connection to a claimed identity (and nothing else).
    Attached,
    /// Refused an identity and closed the connection.
    Rejected,
    /// Recognised nothing actionable.
    Ignored,
    /// Payload could not be decoded and was dropped.
    Malformed,
}

/// Outcome of one liveness sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections sent a fresh probe.
    pub probed: usize,
    /// Connections torn down for missing the previous probe.
    pub terminated: Vec<ConnectionId>,
    /// Users evicted along with those connections.
    pub evicted: Vec<User>,
}

#[derive(Default)]
struct HubState {
    registry: IdentityRegistry,
    connections: HashMap<ConnectionId, Arc<ClientConnection>>,
}

impl HubState {
    fn is_open(&self, id: &ConnectionId) -> bool {
        self.connections.get(id).is_some_and(|c| c.is_open())
    }

    /// Roster where online means "bound to a connection that is still open".
    fn roster(&self) -> Vec<RosterEntry> {
        self.registry
            .roster_with(|_, binding| binding.is_some_and(|c| self.is_open(c)))
    }

    fn broadcast_roster(&self) -> usize {
        let roster = self.roster();
        let json = match serde_json::to_string(&roster) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(error = %e, "failed to serialize roster");
                return 0;
            }
        };
        let recipients = self.fanout(&Frame::Text(json));
        debug!(users = roster.len(), recipients, "broadcast roster");
        recipients
    }

    fn fanout(&self, frame: &Frame) -> usize {
        let mut recipients = 0;
        for conn in self.connections.values().filter(|c| c.is_open()) {
            if conn.send(frame.clone()) {
                recipients += 1;
            } else {
                counter!(names::WS_BROADCAST_DROPS_TOTAL).increment(1);
                warn!(conn_id = %conn.id, "failed to queue frame for client");
            }
        }
        recipients
    }

    /// Clear the user on the connection a removed binding pointed to.
    fn release_binding(&self, evicted: &Evicted) {
        if let Some(conn) = evicted
            .binding
            .as_ref()
            .and_then(|id| self.connections.get(id))
        {
            let _ = conn.take_user();
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_user_gauge(&self) {
        gauge!(names::USERS_REGISTERED).set(self.registry.len() as f64);
    }
}

/// Shared hub: identity registry plus the open connection set.
#[derive(Default)]
pub struct Hub {
    state: Mutex<HubState>,
}

impl Hub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Connection lifecycle ────────────────────────────────────────────

    /// Register a freshly upgraded connection and broadcast the roster.
    pub fn connect(&self, connection: Arc<ClientConnection>) {
        let st = &mut *self.state.lock();
        let _ = st
            .connections
            .insert(connection.id.clone(), connection.clone());
        debug!(conn_id = %connection.id, total = st.connections.len(), "connection added");
        let _ = st.broadcast_roster();
    }

    /// Forget a closed connection.
    ///
    /// The bound user's binding is dropped but the row stays; the roster is
    /// not rebroadcast here, so the user shows offline on the next roster
    /// any connection receives.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> Option<UserRef> {
        let st = &mut *self.state.lock();
        let conn = st.connections.remove(connection_id)?;
        let user = conn.take_user()?;
        if st.registry.unbind(&user.id, connection_id) {
            info!(conn_id = %connection_id, user_id = %user.id, name = %user.name, "user went offline");
        }
        Some(user)
    }

    // ── Registry operations (request/response channel) ──────────────────

    /// Claim a display name.
    pub fn claim(&self, name: &str) -> Result<User, HubError> {
        let st = &mut *self.state.lock();
        let HubState {
            registry,
            connections,
        } = &mut *st;
        let result = registry.claim(name, |id| connections.get(id).is_some_and(|c| c.is_open()));
        match &result {
            Ok(_) => counter!(names::CLAIMS_TOTAL).increment(1),
            Err(HubError::NameTaken { .. }) => {
                counter!(names::CLAIM_CONFLICTS_TOTAL).increment(1);
            }
            Err(_) => {}
        }
        st.record_user_gauge();
        result
    }

    /// Remove the row holding `name` regardless of liveness, then broadcast
    /// the roster if anything was removed.
    pub fn force_remove(&self, name: &str) -> Option<User> {
        let st = &mut *self.state.lock();
        let evicted = st.registry.force_remove(name)?;
        st.release_binding(&evicted);
        info!(user_id = %evicted.user.id, name = %evicted.user.name, "user force-removed");
        st.record_user_gauge();
        let _ = st.broadcast_roster();
        Some(evicted.user)
    }

    /// Current roster snapshot.
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.state.lock().roster()
    }

    /// Number of tracked connections.
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Number of registry rows.
    pub fn user_count(&self) -> usize {
        self.state.lock().registry.len()
    }

    // ── Inbound dispatch (duplex channel) ───────────────────────────────

    /// Handle one inbound text or binary frame from `conn`.
    ///
    /// Order of evaluation:
    /// 1. undecodable payloads are logged and dropped
    /// 2. `ping` is answered with `pong`
    /// 3. `exit` evicts the bound (or named) user and broadcasts the roster
    /// 4. any other payload carrying `user` attaches an unbound connection
    /// 5. `send` is fanned out verbatim, `get_users` gets the roster
    pub fn handle_frame(&self, conn: &ClientConnection, frame: &Frame) -> Dispatch {
        if !conn.is_open() {
            return Dispatch::Ignored;
        }

        let msg = match InboundMessage::parse(frame.payload()) {
            Ok(msg) => msg,
            Err(e) => {
                counter!(names::WS_MALFORMED_TOTAL).increment(1);
                warn!(conn_id = %conn.id, error = %e, code = e.code(), "dropping malformed payload");
                return Dispatch::Malformed;
            }
        };

        let kind = msg.kind();
        debug!(conn_id = %conn.id, kind = %msg.kind, "inbound message");

        match kind {
            MessageKind::Ping => {
                let _ = conn.send_json(&ServerMessage::Pong);
                return Dispatch::Pong;
            }
            MessageKind::Exit => return self.exit(conn, msg.user),
            _ => {}
        }

        let st = &mut *self.state.lock();

        let mut attached = false;
        if let Some(user) = msg.user.as_ref().filter(|_| conn.bound_user().is_none()) {
            match st.registry.attach(user, &conn.id) {
                Ok(previous) => {
                    conn.bind_user(user.clone());
                    if let Some(old) = previous.and_then(|id| st.connections.get(&id)) {
                        let _ = old.take_user();
                        debug!(conn_id = %old.id, "superseded by a newer connection");
                    }
                    info!(conn_id = %conn.id, user_id = %user.id, name = %user.name, "identity attached");
                    attached = true;
                }
                Err(e) => {
                    counter!(names::IDENTITY_REJECTIONS_TOTAL).increment(1);
                    warn!(conn_id = %conn.id, error = %e, "identity rejected, closing connection");
                    let _ = conn.send_json(&ServerMessage::from(&e));
                    conn.close();
                    return Dispatch::Rejected;
                }
            }
        }

        match kind {
            MessageKind::Send => {
                let recipients = st.fanout(frame);
                counter!(names::CHAT_MESSAGES_TOTAL).increment(1);
                debug!(conn_id = %conn.id, recipients, "chat message fanned out");
                Dispatch::Fanout { recipients }
            }
            MessageKind::GetUsers => {
                let _ = conn.send_json(&st.roster());
                Dispatch::Roster
            }
            _ if attached => Dispatch::Attached,
            _ => {
                debug!(conn_id = %conn.id, kind = %msg.kind, "ignoring message");
                Dispatch::Ignored
            }
        }
    }

    fn exit(&self, conn: &ClientConnection, user: Option<UserRef>) -> Dispatch {
        let st = &mut *self.state.lock();
        // A bound connection can only remove its own identity.
        let target = conn.bound_user().or(user).map(|u| u.id);

        if let Some(evicted) = target.as_ref().and_then(|id| st.registry.evict(id)) {
            st.release_binding(&evicted);
            info!(user_id = %evicted.user.id, name = %evicted.user.name, "user left");
        } else {
            debug!(conn_id = %conn.id, "exit for unknown user");
        }
        if conn.bound_user().map(|u| u.id) == target {
            let _ = conn.take_user();
        }

        st.record_user_gauge();
        let _ = st.broadcast_roster();
        Dispatch::Exited { user: target }
    }

    // ── Liveness ────────────────────────────────────────────────────────

    /// Run one liveness sweep.
    ///
    /// Connections that did not acknowledge the previous probe are torn down
    /// and their users evicted; every survivor gets a new probe. The roster
    /// is broadcast afterwards in both cases.
    pub fn sweep(&self) -> SweepReport {
        let st = &mut *self.state.lock();
        let mut report = SweepReport::default();

        let ids: Vec<ConnectionId> = st.connections.keys().cloned().collect();
        for id in ids {
            let Some(conn) = st.connections.get(&id).cloned() else {
                continue;
            };

            if conn.check_alive() {
                if conn.send(Frame::Ping) {
                    report.probed += 1;
                }
                continue;
            }

            let err = HubError::LivenessTimeout {
                connection_id: id.clone(),
            };
            info!(conn_id = %id, idle = ?conn.last_pong_elapsed(), code = err.code(), "{err}");

            if let Some(user) = conn.take_user() {
                // Only evict when this connection still holds the binding;
                // a newer connection for the same user keeps it alive.
                let owns_binding = st
                    .registry
                    .binding(&user.id)
                    .is_none_or(|bound| bound == &id);
                if owns_binding {
                    if let Some(evicted) = st.registry.evict(&user.id) {
                        info!(user_id = %evicted.user.id, name = %evicted.user.name, "user evicted");
                        report.evicted.push(evicted.user);
                    }
                }
            }

            conn.terminate();
            let _ = st.connections.remove(&id);
            counter!(names::LIVENESS_EVICTIONS_TOTAL).increment(1);
            report.terminated.push(id);
        }

        st.record_user_gauge();
        let _ = st.broadcast_roster();
        report
    }
}
