//! Client Registry: live connections, groups, and fan-out addressing.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::connection::HubConnection;
use crate::errors::RegistryError;

/// Concurrent map of a hub's live connections and their group membership.
///
/// Every id in a group is also in the connection map; removing a connection
/// purges it from the groups it joined.
#[derive(Default)]
pub struct ClientRegistry {
    connections: DashMap<String, Arc<HubConnection>>,
    groups: DashMap<String, HashSet<String>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns `false` if the id is already taken.
    pub fn add(&self, connection: Arc<HubConnection>) -> bool {
        match self.connections.entry(connection.id().to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let _ = slot.insert(connection);
                true
            }
        }
    }

    /// Deregister a connection and drop it from every group it joined.
    ///
    /// Removing an unknown id is a no-op.
    pub fn remove(&self, id: &str) -> Option<Arc<HubConnection>> {
        let (_, connection) = self.connections.remove(id)?;
        for group in connection.take_groups() {
            self.leave(&group, id);
        }
        debug!(connection_id = id, "connection deregistered");
        Some(connection)
    }

    /// Look up a live connection.
    pub fn get(&self, id: &str) -> Option<Arc<HubConnection>> {
        self.connections.get(id).map(|c| Arc::clone(c.value()))
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Names of all non-empty groups.
    pub fn group_names(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.key().clone()).collect()
    }

    /// Ids currently in `group`.
    pub fn group_members(&self, group: &str) -> Vec<String> {
        self.groups
            .get(group)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Add a live connection to `group`, creating the group if needed.
    pub fn add_to_group(&self, id: &str, group: &str) -> Result<(), RegistryError> {
        let connection = self.get(id).ok_or_else(|| RegistryError::connection(id))?;
        let _ = self
            .groups
            .entry(group.to_owned())
            .or_default()
            .insert(id.to_owned());
        connection.joined(group);

        // A concurrent remove may have purged groups before we inserted.
        if !self.connections.contains_key(id) {
            self.leave(group, id);
            return Err(RegistryError::connection(id));
        }
        Ok(())
    }

    /// Remove a connection from `group`. The group disappears when empty.
    pub fn remove_from_group(&self, id: &str, group: &str) -> Result<(), RegistryError> {
        let connection = self.get(id).ok_or_else(|| RegistryError::connection(id))?;
        if !self.groups.contains_key(group) {
            return Err(RegistryError::group(group));
        }
        connection.left(group);
        self.leave(group, id);
        Ok(())
    }

    fn leave(&self, group: &str, id: &str) {
        if let Some(mut members) = self.groups.get_mut(group) {
            let _ = members.remove(id);
        }
        let _ = self.groups.remove_if(group, |_, members| members.is_empty());
    }

    /// Every connection.
    pub fn all(&self) -> Target<'_> {
        Target::new(self, Selection::All)
    }

    /// Every connection except those listed.
    pub fn all_except<I, S>(&self, excluded: I) -> Target<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Target::new(
            self,
            Selection::AllExcept(excluded.into_iter().map(Into::into).collect()),
        )
    }

    /// Members of `group`.
    pub fn group(&self, group: &str) -> Target<'_> {
        Target::new(self, Selection::Group(group.to_owned()))
    }

    /// A single connection.
    pub fn connection(&self, id: &str) -> Target<'_> {
        Target::new(self, Selection::Connection(id.to_owned()))
    }
}

#[derive(Debug, Clone)]
enum Selection {
    All,
    AllExcept(HashSet<String>),
    Group(String),
    Connection(String),
}

/// An addressable set of connections.
///
/// The set is resolved at send time from a snapshot of the registry, so
/// connections joining or leaving mid-broadcast are simply missed or
/// skipped.
pub struct Target<'a> {
    registry: &'a ClientRegistry,
    selection: Selection,
}

impl<'a> Target<'a> {
    fn new(registry: &'a ClientRegistry, selection: Selection) -> Self {
        Self {
            registry,
            selection,
        }
    }

    /// Snapshot of the connections this target currently resolves to.
    pub fn connections(&self) -> Vec<Arc<HubConnection>> {
        let registry = self.registry;
        match &self.selection {
            Selection::All => registry
                .connections
                .iter()
                .map(|c| Arc::clone(c.value()))
                .collect(),
            Selection::AllExcept(excluded) => registry
                .connections
                .iter()
                .filter(|c| !excluded.contains(c.key()))
                .map(|c| Arc::clone(c.value()))
                .collect(),
            Selection::Group(group) => registry
                .group_members(group)
                .iter()
                .filter_map(|id| registry.get(id))
                .collect(),
            Selection::Connection(id) => registry.get(id).into_iter().collect(),
        }
    }

    /// Invoke `method` on every connection in the target, fire-and-forget.
    ///
    /// Returns how many connections the message was queued for.
    pub fn send(&self, method: &str, args: &[Value]) -> usize {
        self.connections()
            .iter()
            .filter(|connection| connection.send(method, args))
            .count()
    }
}
