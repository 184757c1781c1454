//! Peer directory
//!
//! In-memory map of the peers currently signed in to the rendezvous server.
//! Reads and writes take a lock only for the duration of the map access;
//! change listeners run after the lock is released, synchronously with the
//! mutation that triggered them, so a listener calling [`PeerDirectory::snapshot`]
//! sees the post-mutation state.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::Arc;

/// Server-assigned peer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub i32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PeerId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(PeerId)
    }
}

/// A peer known to the directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerEntry {
    pub id: PeerId,
    pub name: String,
}

/// Change notification emitted by the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryChange {
    /// A new id appeared
    Added(PeerEntry),
    /// A known id was re-announced under a different name
    Updated {
        previous: String,
        entry: PeerEntry,
    },
    /// An id left
    Removed(PeerEntry),
    /// Every entry was dropped at once
    Cleared,
}

type Listener = Arc<dyn Fn(&DirectoryChange) + Send + Sync>;

#[derive(Default)]
struct Inner {
    names: HashMap<PeerId, String>,
    /// Insertion order of the keys in `names`
    order: Vec<PeerId>,
}

/// Shared peer directory; clones refer to the same map
#[derive(Clone, Default)]
pub struct PeerDirectory {
    inner: Arc<RwLock<Inner>>,
    listeners: Arc<RwLock<Vec<Listener>>>,
}

impl fmt::Debug for PeerDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerDirectory")
            .field("peers", &self.snapshot())
            .finish()
    }
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for every subsequent change
    pub fn subscribe(&self, listener: impl Fn(&DirectoryChange) + Send + Sync + 'static) {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Insert `id`, or rename it if already present
    ///
    /// Returns the change that was emitted; re-adding an unchanged entry is a
    /// no-op and emits nothing.
    pub fn add(&self, id: PeerId, name: impl Into<String>) -> Option<DirectoryChange> {
        let name = name.into();
        let change = {
            let mut inner = self.inner.write();
            match inner.names.insert(id, name.clone()) {
                None => {
                    inner.order.push(id);
                    Some(DirectoryChange::Added(PeerEntry { id, name }))
                }
                Some(previous) if previous != name => Some(DirectoryChange::Updated {
                    previous,
                    entry: PeerEntry { id, name },
                }),
                Some(_) => None,
            }
        };
        if let Some(change) = &change {
            self.notify(change);
        }
        change
    }

    /// Remove `id`, returning the entry if it was present
    pub fn remove(&self, id: PeerId) -> Option<PeerEntry> {
        let removed = {
            let mut inner = self.inner.write();
            let name = inner.names.remove(&id)?;
            inner.order.retain(|known| *known != id);
            PeerEntry { id, name }
        };
        self.notify(&DirectoryChange::Removed(removed.clone()));
        Some(removed)
    }

    /// Drop every entry, returning how many there were
    pub fn clear(&self) -> usize {
        let count = {
            let mut inner = self.inner.write();
            inner.order.clear();
            let count = inner.names.len();
            inner.names.clear();
            count
        };
        if count > 0 {
            self.notify(&DirectoryChange::Cleared);
        }
        count
    }

    pub fn get(&self, id: PeerId) -> Option<PeerEntry> {
        self.inner.read().names.get(&id).map(|name| PeerEntry {
            id,
            name: name.clone(),
        })
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.inner.read().names.contains_key(&id)
    }

    /// First peer (in insertion order) announced as `name`
    pub fn find_by_name(&self, name: &str) -> Option<PeerEntry> {
        self.snapshot().into_iter().find(|entry| entry.name == name)
    }

    /// Copy of every entry, in insertion order
    pub fn snapshot(&self) -> Vec<PeerEntry> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| {
                inner.names.get(id).map(|name| PeerEntry {
                    id: *id,
                    name: name.clone(),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self, change: &DirectoryChange) {
        let listeners: Vec<Listener> = self.listeners.read().clone();
        for listener in listeners {
            listener(change);
        }
    }
}
