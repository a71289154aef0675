//! Router tables: channel registry and inflight dials
//!
//! Both tables and the connection-id counter live under one readers-writer
//! lock because a dial touches all three atomically. Critical sections are
//! O(1) and never perform I/O; liveness probes of a current holder happen
//! outside the lock, which is why [`Registry::bind`] re-checks the slot.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::conn::RelayConn;

#[derive(Default)]
struct State {
    channels: HashMap<String, Arc<RelayConn>>,
    inflight: HashMap<u64, Arc<RelayConn>>,
    next_connection_id: u64,
}

pub(crate) struct Registry {
    state: RwLock<State>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            state: RwLock::new(State::default()),
        }
    }

    /// Current control connection bound to `channel`, if any.
    pub fn holder(&self, channel: &str) -> Option<Arc<RelayConn>> {
        let state = self.state.read().unwrap();
        state.channels.get(channel).cloned()
    }

    /// Bind `channel` to `conn`.
    ///
    /// `displacing` names the holder the caller probed and found dead (or
    /// `None` when the slot looked empty). The bind only succeeds if the
    /// slot still matches that observation; a different live holder has
    /// won the race and the new registration must fail.
    pub fn bind(
        &self,
        channel: &str,
        conn: &Arc<RelayConn>,
        displacing: Option<&Arc<RelayConn>>,
    ) -> bool {
        let mut state = self.state.write().unwrap();
        let slot_matches = match (state.channels.get(channel), displacing) {
            (None, _) => true,
            (Some(current), Some(stale)) => Arc::ptr_eq(current, stale),
            (Some(_), None) => false,
        };
        if slot_matches {
            state.channels.insert(channel.to_string(), conn.clone());
        }
        slot_matches
    }

    /// Remove the binding for `channel` only if `conn` still holds it.
    /// A successor that displaced `conn` keeps its registration.
    pub fn unbind_if_holder(&self, channel: &str, conn: &Arc<RelayConn>) {
        let mut state = self.state.write().unwrap();
        if let Some(current) = state.channels.get(channel) {
            if Arc::ptr_eq(current, conn) {
                state.channels.remove(channel);
            }
        }
    }

    /// Start a dial against `channel`: look up the control connection,
    /// allocate a fresh connection id, and park the dialer in the
    /// inflight table under that id. Ids are never reused.
    pub fn begin_dial(
        &self,
        channel: &str,
        dialer: &Arc<RelayConn>,
    ) -> Option<(Arc<RelayConn>, u64)> {
        let mut state = self.state.write().unwrap();
        let control = state.channels.get(channel).cloned()?;
        let connection_id = state.next_connection_id;
        state.next_connection_id += 1;
        state.inflight.insert(connection_id, dialer.clone());
        Some((control, connection_id))
    }

    /// Remove and return the inflight entry for `connection_id`. At most
    /// one caller wins; the entry is gone afterwards.
    pub fn take_inflight(&self, connection_id: u64) -> Option<Arc<RelayConn>> {
        let mut state = self.state.write().unwrap();
        state.inflight.remove(&connection_id)
    }

    #[cfg(test)]
    pub fn channel_count(&self) -> usize {
        self.state.read().unwrap().channels.len()
    }

    #[cfg(test)]
    pub fn inflight_count(&self) -> usize {
        self.state.read().unwrap().inflight.len()
    }
}
