use conductor_core::{is_reserved_destination, GENERIC_AGENT};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// A registered agent and the topic its worker listens on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEntry {
    /// Unique agent name.
    pub name: String,
    /// Capability description shown to the reasoner during selection.
    pub description: String,
    /// Topic task messages for this agent are published to.
    pub topic: String,
}

/// Immutable view of the registry at one point in time.
///
/// Entries are kept in registration order. A snapshot never changes after it
/// is taken, even if agents join or leave concurrently.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    entries: Arc<Vec<AgentEntry>>,
}

impl RegistrySnapshot {
    /// Look up an entry by name.
    pub fn get(&self, name: &str) -> Option<&AgentEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Whether `name` is a registered agent.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Entries in registration order.
    pub fn entries(&self) -> &[AgentEntry] {
        &self.entries
    }

    /// Registered agent names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no agent is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the descriptions the reasoner selects from, one agent per line.
    pub fn describe(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("AgentName: {}, Description: {}", e.name, e.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The set of currently known agents.
///
/// Readers only clone an `Arc` to the current entry list; writers build a new
/// list and swap it in. Both hold the mutex for a pointer copy at most.
pub struct AgentRegistry {
    current: Mutex<Arc<Vec<AgentEntry>>>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Arc::new(Vec::new())),
        }
    }

    /// Insert or overwrite an agent (last write wins, position is kept).
    ///
    /// Returns `false` if `name` is a reserved session destination, in which
    /// case nothing is stored.
    pub fn register(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        topic: impl Into<String>,
    ) -> bool {
        let entry = AgentEntry {
            name: name.into(),
            description: description.into(),
            topic: topic.into(),
        };
        if is_reserved_destination(&entry.name) {
            warn!(agent = %entry.name, "Refusing to register reserved destination name");
            return false;
        }

        let mut current = self.current.lock();
        let mut next = current.as_ref().clone();
        match next.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry.clone(),
            None => next.push(entry.clone()),
        }
        *current = Arc::new(next);
        info!(agent = %entry.name, topic = %entry.topic, "Registered agent");
        true
    }

    /// Remove an agent. Absent names are a no-op.
    ///
    /// Returns `true` if an entry was removed. The fallback agent cannot be
    /// removed.
    pub fn unregister(&self, name: &str) -> bool {
        if name == GENERIC_AGENT {
            warn!(agent = %name, "Refusing to remove the fallback agent");
            return false;
        }

        let mut current = self.current.lock();
        if !current.iter().any(|e| e.name == name) {
            info!(agent = %name, "Agent not found, nothing to remove");
            return false;
        }
        let next: Vec<AgentEntry> = current.iter().filter(|e| e.name != name).cloned().collect();
        *current = Arc::new(next);
        info!(agent = %name, "Removed agent");
        true
    }

    /// Take a snapshot for selection.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            entries: Arc::clone(&self.current.lock()),
        }
    }

    /// Number of registered agents.
    pub fn agent_count(&self) -> usize {
        self.current.lock().len()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
