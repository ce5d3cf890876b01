//! In-memory model of who is currently connected to the Murmur server.

use std::collections::HashMap;

use crate::event::LogEvent;

/// Location of a user who is connected but not in a named sub-channel.
pub const ROOT_LOCATION: &str = "root";

/// An independent copy of the presence map, taken at a point in time.
pub type Snapshot = HashMap<String, String>;

/// Mapping from identity to current location.
///
/// A user appears at most once; absence means "not currently present". The
/// store is mutated only by [`apply`](Self::apply) with parsed log events and
/// read by the report scheduler and notifier.
#[derive(Debug, Default, Clone)]
pub struct PresenceStore {
    users: HashMap<String, String>,
}

impl PresenceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one parsed event. Every recognized event mutates the store
    /// before any reporting decision is evaluated for its line.
    pub fn apply(&mut self, event: &LogEvent) {
        match event {
            LogEvent::Authenticated { who } => {
                self.users.insert(who.clone(), ROOT_LOCATION.to_string());
            }
            LogEvent::Disconnected { who } => {
                self.users.remove(who);
            }
            LogEvent::Moved { who, channel } => {
                self.users.insert(who.clone(), channel.clone());
            }
        }
    }

    /// Current location of a user, if present.
    pub fn location(&self, who: &str) -> Option<&str> {
        self.users.get(who).map(String::as_str)
    }

    /// Number of users currently present.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether nobody is present.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Independent copy of the current state.
    pub fn snapshot(&self) -> Snapshot {
        self.users.clone()
    }

    /// Iterate over `(identity, location)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.users.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
