//! Named broadcast groups.
//!
//! Rooms and post topics share one implementation: a sharded map from group
//! key to member set. A group exists exactly while it has members; it is
//! created by the first insert and removed by the removal that empties it.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use hubbub_transport::ConnectionId;
use tracing::debug;

use crate::connection::ConnectionHandle;

type Members = HashMap<ConnectionId, Arc<ConnectionHandle>>;

/// A map of broadcast groups keyed by `K`.
pub(crate) struct GroupMap<K> {
    /// Used in log output ("room", "post").
    kind: &'static str,
    groups: DashMap<K, Members>,
}

impl<K> GroupMap<K>
where
    K: Eq + Hash + Clone + Display,
{
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            groups: DashMap::new(),
        }
    }

    /// Add a member, creating the group if needed.
    ///
    /// Returns `true` if the member was not already present.
    pub(crate) fn insert(&self, key: &K, handle: &Arc<ConnectionHandle>) -> bool {
        let mut members = self.groups.entry(key.clone()).or_insert_with(|| {
            debug!(kind = self.kind, group = %key, "Creating group");
            Members::new()
        });
        let added = members
            .insert(handle.id().clone(), Arc::clone(handle))
            .is_none();
        if added {
            debug!(
                kind = self.kind,
                group = %key,
                connection = %handle.id(),
                members = members.len(),
                "Member added"
            );
        }
        added
    }

    /// Remove a member, dropping the group once it is empty.
    ///
    /// Returns `true` if the member was present.
    pub(crate) fn remove<Q>(&self, key: &Q, id: &ConnectionId) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Display + ?Sized,
    {
        let removed = match self.groups.get_mut(key) {
            Some(mut members) => members.remove(id).is_some(),
            None => return false,
        };

        if removed {
            debug!(kind = self.kind, group = %key, connection = %id, "Member removed");
            if self.groups.remove_if(key, |_, members| members.is_empty()).is_some() {
                debug!(kind = self.kind, group = %key, "Deleted empty group");
            }
        }
        removed
    }

    /// Snapshot of a group's members.
    ///
    /// The shard lock is held only while cloning the member list.
    pub(crate) fn members<Q>(&self, key: &Q) -> Vec<Arc<ConnectionHandle>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.groups
            .get(key)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn member_count<Q>(&self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.groups.get(key).map(|m| m.len()).unwrap_or(0)
    }

    pub(crate) fn contains<Q>(&self, key: &Q, id: &ConnectionId) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.groups
            .get(key)
            .map(|m| m.contains_key(id))
            .unwrap_or(false)
    }

    pub(crate) fn exists<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.groups.contains_key(key)
    }

    /// Number of live groups.
    pub(crate) fn len(&self) -> usize {
        self.groups.len()
    }
}
