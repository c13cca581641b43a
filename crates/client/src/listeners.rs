// Listener registry: routes inbound messages to callbacks keyed by (group, message type).
//
// Groups let one consumer drop every callback it registered in one call
// (for example when it switches to another document) without touching
// callbacks owned by anyone else.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde_json::Value;
use tracing::trace;

/// Group used when a subscriber does not name one.
pub const DEFAULT_GROUP: &str = "default";

pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

type TypeTable = BTreeMap<String, Vec<(u64, Callback)>>;

#[derive(Default)]
struct Table {
    groups: BTreeMap<String, TypeTable>,
    next_id: u64,
}

/// Shared publish/subscribe table. Clones refer to the same table.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    table: Arc<RwLock<Table>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ListenerRegistry").field("groups", &table.groups.len()).finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `message_type` under `group`.
    pub fn subscribe(
        &self,
        message_type: &str,
        group: &str,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let id = table.next_id;
        table.next_id += 1;
        table
            .groups
            .entry(group.to_owned())
            .or_default()
            .entry(message_type.to_owned())
            .or_default()
            .push((id, Arc::new(callback)));
        trace!(group, message_type, id, "listener subscribed");

        Subscription {
            table: Arc::downgrade(&self.table),
            group: group.to_owned(),
            message_type: message_type.to_owned(),
            id,
        }
    }

    pub fn clear_group(&self, group: &str) {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if table.groups.remove(group).is_some() {
            trace!(group, "listener group cleared");
        }
    }

    pub fn clear_all(&self) {
        self.table.write().unwrap_or_else(PoisonError::into_inner).groups.clear();
    }

    /// Invoke callbacks for `message_type`: only `group`'s when given,
    /// every group's otherwise. Returns how many callbacks ran.
    ///
    /// Callbacks run after the table lock is released, so they may
    /// subscribe or clear groups themselves.
    pub fn dispatch(&self, message_type: &str, message: &Value, group: Option<&str>) -> usize {
        let mut callbacks: Vec<Callback> = Vec::new();
        {
            let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
            let mut collect = |types: &TypeTable| {
                if let Some(registered) = types.get(message_type) {
                    callbacks.extend(registered.iter().map(|(_, cb)| cb.clone()));
                }
            };
            match group {
                Some(group) => table.groups.get(group).into_iter().for_each(&mut collect),
                None => table.groups.values().for_each(&mut collect),
            }
        }

        for callback in &callbacks {
            callback(message);
        }
        callbacks.len()
    }

    /// Number of callbacks registered under `group` across all types.
    pub fn group_len(&self, group: &str) -> usize {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.groups.get(group).map(|types| types.values().map(Vec::len).sum()).unwrap_or(0)
    }
}

/// Handle to one registered callback.
///
/// Dropping it leaves the callback registered; call [`Subscription::cancel`]
/// or clear the group to remove it.
#[derive(Debug)]
#[must_use = "dropping a Subscription keeps the callback registered; bind it to cancel later"]
pub struct Subscription {
    table: Weak<RwLock<Table>>,
    group: String,
    message_type: String,
    id: u64,
}

impl Subscription {
    pub fn cancel(self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut table = table.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(types) = table.groups.get_mut(&self.group) {
            if let Some(callbacks) = types.get_mut(&self.message_type) {
                callbacks.retain(|(id, _)| *id != self.id);
            }
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }
}
