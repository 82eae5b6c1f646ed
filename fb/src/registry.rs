//! Worker registry owned by the broker
//!
//! Maps each spawned worker's name to its lifecycle state. Entries are created when a worker
//! is spawned or registered, only ever move forward, and are never removed during a run.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Lifecycle of a worker as seen by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    NotStarted,
    Loading,
    Ready,
    Closed,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::NotStarted => "not_started",
            WorkerState::Loading => "loading",
            WorkerState::Ready => "ready",
            WorkerState::Closed => "closed",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct Entry {
    state: WorkerState,
    /// Every state visited, in order
    path: Vec<WorkerState>,
}

/// Known workers and their lifecycle state
#[derive(Debug, Clone, Default)]
pub struct Registry {
    workers: BTreeMap<String, Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worker as `not_started`
    ///
    /// Registering a name twice keeps the existing entry.
    pub fn register(&mut self, name: &str) {
        debug!(%name, "Registry::register: called");
        if self.workers.contains_key(name) {
            warn!(%name, "Worker already registered, keeping existing state");
            return;
        }
        self.workers.insert(
            name.to_string(),
            Entry {
                state: WorkerState::NotStarted,
                path: vec![WorkerState::NotStarted],
            },
        );
    }

    /// Move a worker forward to `state`
    ///
    /// Returns true if the state changed. Unknown names and backwards moves are ignored.
    pub fn advance(&mut self, name: &str, state: WorkerState) -> bool {
        let Some(entry) = self.workers.get_mut(name) else {
            warn!(%name, %state, "Ignoring state update for unregistered worker");
            return false;
        };
        if state <= entry.state {
            return false;
        }
        debug!(%name, from = %entry.state, to = %state, "Registry::advance: worker state changed");
        entry.state = state;
        entry.path.push(state);
        true
    }

    pub fn get(&self, name: &str) -> Option<WorkerState> {
        self.workers.get(name).map(|e| e.state)
    }

    /// States the worker has passed through, oldest first
    pub fn path(&self, name: &str) -> Option<&[WorkerState]> {
        self.workers.get(name).map(|e| e.path.as_slice())
    }

    /// True when every registered worker is in `state` (vacuously true when empty)
    pub fn all_in(&self, state: WorkerState) -> bool {
        self.workers.values().all(|e| e.state == state)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.workers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot(self.workers.iter().map(|(k, e)| (k.clone(), e.state)).collect())
    }
}

/// Point-in-time copy of the registry, attached to fatal timeouts
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot(pub BTreeMap<String, WorkerState>);

impl RegistrySnapshot {
    pub fn get(&self, name: &str) -> Option<WorkerState> {
        self.0.get(name).copied()
    }
}

impl fmt::Display for RegistrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, state)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", name, state)?;
        }
        f.write_str("}")
    }
}
