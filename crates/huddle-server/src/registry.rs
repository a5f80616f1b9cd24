//! Identity registry: claimed names, user rows, and live bindings.
//!
//! The registry is the single admission gate for identities. Rows are only
//! ever created by [`IdentityRegistry::claim`]; a connection announcing an id
//! can merely [`attach`](IdentityRegistry::attach) to a row that already
//! exists.
//!
//! Invariants:
//! - at most one row per name
//! - at most one binding per user id
//! - a binding never outlives its row
//!
//! The registry does not know whether a bound connection is still open; the
//! hub removes bindings when connections close and passes an `is_open`
//! predicate to [`IdentityRegistry::claim`] as a second check.

use std::collections::HashMap;

use huddle_core::{ConnectionId, HubError, RosterEntry, User, UserId, UserRef};
use tracing::{debug, info};

/// Result of a successful eviction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evicted {
    /// The removed row.
    pub user: User,
    /// The connection that was bound to it, if any.
    pub binding: Option<ConnectionId>,
}

/// Registry rows plus the user → connection binding map.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    users: Vec<User>,
    bindings: HashMap<UserId, ConnectionId>,
}

impl IdentityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `name` for a new user.
    ///
    /// A row holding the same name whose binding is open makes the claim
    /// fail with [`HubError::NameTaken`]. A row holding the name without an
    /// open binding is stale and gets replaced.
    pub fn claim(
        &mut self,
        name: &str,
        is_open: impl Fn(&ConnectionId) -> bool,
    ) -> Result<User, HubError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(HubError::MissingName);
        }

        if let Some(existing) = self.find_by_name(name) {
            let active = self.bindings.get(&existing.id).is_some_and(&is_open);
            if active {
                debug!(name, "claim rejected, name is held by an online user");
                return Err(HubError::NameTaken {
                    name: name.to_owned(),
                });
            }
            let stale_id = existing.id.clone();
            let _ = self.evict(&stale_id);
            info!(name, stale_id = %stale_id, "reclaimed stale name");
        }

        let user = User::new(name);
        self.users.push(user.clone());
        info!(user_id = %user.id, name, "user created");
        Ok(user)
    }

    /// Attach a connection to an identity previously issued by `claim`.
    ///
    /// Returns the connection the user was bound to before, if it differs.
    pub fn attach(
        &mut self,
        user: &UserRef,
        connection: &ConnectionId,
    ) -> Result<Option<ConnectionId>, HubError> {
        let Some(row) = self.get(&user.id) else {
            return Err(HubError::IdentityRejected {
                user_id: user.id.clone(),
                reason: "unknown id",
            });
        };
        if !user.name.is_empty() && row.name != user.name {
            return Err(HubError::IdentityRejected {
                user_id: user.id.clone(),
                reason: "name does not match the claimed name",
            });
        }
        let previous = self.bindings.insert(user.id.clone(), connection.clone());
        Ok(previous.filter(|prev| prev != connection))
    }

    /// Remove a user row and its binding.
    pub fn evict(&mut self, user_id: &UserId) -> Option<Evicted> {
        let idx = self.users.iter().position(|u| &u.id == user_id)?;
        let user = self.users.remove(idx);
        let binding = self.bindings.remove(user_id);
        Some(Evicted { user, binding })
    }

    /// Remove the row holding `name` regardless of liveness.
    pub fn force_remove(&mut self, name: &str) -> Option<Evicted> {
        let id = self.find_by_name(name.trim())?.id.clone();
        self.evict(&id)
    }

    /// Drop the binding for `user_id` if it still points at `connection`.
    ///
    /// The row itself is kept; the user simply becomes offline.
    pub fn unbind(&mut self, user_id: &UserId, connection: &ConnectionId) -> bool {
        if self.bindings.get(user_id) == Some(connection) {
            let _ = self.bindings.remove(user_id);
            true
        } else {
            false
        }
    }

    /// Look up a row by id.
    pub fn get(&self, user_id: &UserId) -> Option<&User> {
        self.users.iter().find(|u| &u.id == user_id)
    }

    /// Look up a row by name.
    pub fn find_by_name(&self, name: &str) -> Option<&User> {
        self.users.iter().find(|u| u.name == name)
    }

    /// The connection bound to `user_id`.
    pub fn binding(&self, user_id: &UserId) -> Option<&ConnectionId> {
        self.bindings.get(user_id)
    }

    /// Roster in claim order, with `is_online` supplied by the caller.
    pub fn roster_with(&self, is_online: impl Fn(&User, Option<&ConnectionId>) -> bool) -> Vec<RosterEntry> {
        self.users
            .iter()
            .map(|u| RosterEntry {
                id: u.id.clone(),
                name: u.name.clone(),
                is_online: is_online(u, self.bindings.get(&u.id)),
            })
            .collect()
    }

    /// Roster with `is_online` meaning "has a binding".
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.roster_with(|_, binding| binding.is_some())
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the registry has no rows.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Number of bound users.
    pub fn online_count(&self) -> usize {
        self.bindings.len()
    }
}
