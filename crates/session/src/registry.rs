//! Call registry
//!
//! The only structure shared across calls. A call id is reserved before the
//! transport is created, sessions enter as pending when setup starts and are
//! promoted to active once media is enabled. The map itself is never exposed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::call::CallSession;

#[derive(Default)]
struct Entries {
    reserved: HashMap<String, uuid::Uuid>,
    pending: HashMap<String, Arc<CallSession>>,
    active: HashMap<String, Arc<CallSession>>,
}

impl Entries {
    fn knows(&self, call_id: &str) -> bool {
        self.reserved.contains_key(call_id)
            || self.pending.contains_key(call_id)
            || self.active.contains_key(call_id)
    }
}

/// Concurrent map from call id to session
#[derive(Default)]
pub struct CallRegistry {
    entries: RwLock<Entries>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold a call id while its session is being built
    ///
    /// Returns the token `claim` must present, or `None` if the id is taken.
    pub fn reserve(&self, call_id: &str) -> Option<uuid::Uuid> {
        let mut entries = self.entries.write();
        if entries.knows(call_id) {
            return None;
        }
        let token = uuid::Uuid::new_v4();
        entries.reserved.insert(call_id.to_string(), token);
        Some(token)
    }

    /// Drop a reservation; true if one was held
    ///
    /// A later `claim` for the same id fails, which is how a terminate
    /// that arrives before the session exists cancels the setup.
    pub fn cancel_reservation(&self, call_id: &str) -> bool {
        self.entries.write().reserved.remove(call_id).is_some()
    }

    /// Drop every reservation, returning how many were held
    pub fn cancel_reservations(&self) -> usize {
        let mut entries = self.entries.write();
        let count = entries.reserved.len();
        entries.reserved.clear();
        count
    }

    /// Turn a held reservation into a pending session
    pub fn claim(&self, session: Arc<CallSession>, token: uuid::Uuid) -> bool {
        let mut entries = self.entries.write();
        let id = session.call_id();
        if entries.reserved.get(id) != Some(&token) {
            return false;
        }
        entries.reserved.remove(id);
        entries.pending.insert(id.to_string(), session);
        true
    }

    /// Insert as pending unless the call id is already known
    pub fn begin(&self, session: Arc<CallSession>) -> bool {
        let mut entries = self.entries.write();
        let id = session.call_id();
        if entries.knows(id) {
            return false;
        }
        entries.pending.insert(id.to_string(), session);
        true
    }

    /// Promote a pending session; fails if it was removed meanwhile
    pub fn activate(&self, call_id: &str, session_uid: uuid::Uuid) -> bool {
        let mut entries = self.entries.write();
        match entries.pending.get(call_id) {
            Some(s) if s.uid() == session_uid => {},
            _ => return false,
        }
        if let Some(session) = entries.pending.remove(call_id) {
            entries.active.insert(call_id.to_string(), session);
            true
        } else {
            false
        }
    }

    pub fn get(&self, call_id: &str) -> Option<Arc<CallSession>> {
        let entries = self.entries.read();
        entries
            .active
            .get(call_id)
            .or_else(|| entries.pending.get(call_id))
            .cloned()
    }

    /// Remove a pending or active session; no-op when absent
    pub fn remove(&self, call_id: &str) -> Option<Arc<CallSession>> {
        let mut entries = self.entries.write();
        entries
            .active
            .remove(call_id)
            .or_else(|| entries.pending.remove(call_id))
    }

    /// Remove only if the entry is still the given session
    pub fn remove_if(&self, call_id: &str, session_uid: uuid::Uuid) -> bool {
        let mut guard = self.entries.write();
        let entries = &mut *guard;
        for map in [&mut entries.active, &mut entries.pending] {
            if map.get(call_id).is_some_and(|s| s.uid() == session_uid) {
                map.remove(call_id);
                return true;
            }
        }
        false
    }

    pub fn is_reserved(&self, call_id: &str) -> bool {
        self.entries.read().reserved.contains_key(call_id)
    }

    pub fn is_active(&self, call_id: &str) -> bool {
        self.entries.read().active.contains_key(call_id)
    }

    /// Snapshot of call ids with media flowing
    pub fn active_call_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().active.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of every session, pending or active
    pub fn sessions(&self) -> Vec<Arc<CallSession>> {
        let entries = self.entries.read();
        entries
            .active
            .values()
            .chain(entries.pending.values())
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.entries.read().active.len()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.read().pending.len()
    }

    /// Sessions held, pending or active; reservations are not counted
    pub fn len(&self) -> usize {
        let entries = self.entries.read();
        entries.active.len() + entries.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
