//! Server-side session registry
//!
//! Maps each client endpoint to the username it joined with. This is the
//! single source of truth for the participant list. The map itself is never
//! exposed; callers go through a narrow upsert/remove/snapshot API and every
//! method holds the lock only for the map operation.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::error::SessionError;
use crate::protocol::packet::MAX_NAME_LEN;

/// One joined client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub endpoint: SocketAddr,
    pub username: String,
    pub last_seen: Instant,
    /// Join order, used to keep the participant list stable
    join_seq: u64,
}

#[derive(Default)]
struct RegistryState {
    clients: HashMap<SocketAddr, ClientRecord>,
    next_seq: u64,
}

/// Thread-safe endpoint → username registry
#[derive(Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that a username can be carried in the relay header
    pub fn validate_username(username: &str) -> Result<(), SessionError> {
        if username.is_empty() {
            return Err(SessionError::EmptyUsername);
        }
        if username.len() > MAX_NAME_LEN {
            return Err(SessionError::UsernameTooLong(username.len()));
        }
        Ok(())
    }

    /// Insert or refresh the record for `endpoint`.
    ///
    /// Re-joining from the same endpoint keeps its place in the list but
    /// takes the new username. Returns `true` if the endpoint was new.
    pub fn upsert(&self, endpoint: SocketAddr, username: &str) -> Result<bool, SessionError> {
        Self::validate_username(username)?;

        let mut state = self.state.lock();
        let now = Instant::now();
        if let Some(record) = state.clients.get_mut(&endpoint) {
            record.username = username.to_string();
            record.last_seen = now;
            return Ok(false);
        }

        let join_seq = state.next_seq;
        state.next_seq += 1;
        state.clients.insert(
            endpoint,
            ClientRecord {
                endpoint,
                username: username.to_string(),
                last_seen: now,
                join_seq,
            },
        );
        Ok(true)
    }

    /// Remove the record for `endpoint`, if any
    pub fn remove(&self, endpoint: &SocketAddr) -> Option<ClientRecord> {
        self.state.lock().clients.remove(endpoint)
    }

    /// Refresh `last_seen`. Returns `false` for unknown endpoints.
    pub fn touch(&self, endpoint: &SocketAddr) -> bool {
        match self.state.lock().clients.get_mut(endpoint) {
            Some(record) => {
                record.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Username registered for `endpoint`
    pub fn username_of(&self, endpoint: &SocketAddr) -> Option<String> {
        self.state
            .lock()
            .clients
            .get(endpoint)
            .map(|r| r.username.clone())
    }

    pub fn contains(&self, endpoint: &SocketAddr) -> bool {
        self.state.lock().clients.contains_key(endpoint)
    }

    /// Usernames in join order
    pub fn participants(&self) -> Vec<String> {
        self.snapshot().into_iter().map(|r| r.username).collect()
    }

    /// Every registered endpoint
    pub fn endpoints(&self) -> Vec<SocketAddr> {
        self.state.lock().clients.keys().copied().collect()
    }

    /// Every registered endpoint except `sender`
    pub fn recipients_except(&self, sender: &SocketAddr) -> Vec<SocketAddr> {
        self.state
            .lock()
            .clients
            .keys()
            .filter(|addr| *addr != sender)
            .copied()
            .collect()
    }

    /// Copy of all records in join order
    pub fn snapshot(&self) -> Vec<ClientRecord> {
        let mut records: Vec<ClientRecord> =
            self.state.lock().clients.values().cloned().collect();
        records.sort_by_key(|r| r.join_seq);
        records
    }

    /// Drop every record idle for longer than `max_idle`
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<ClientRecord> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let stale: Vec<SocketAddr> = state
            .clients
            .values()
            .filter(|r| now.saturating_duration_since(r.last_seen) > max_idle)
            .map(|r| r.endpoint)
            .collect();

        stale
            .iter()
            .filter_map(|addr| state.clients.remove(addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().clients.is_empty()
    }
}
