//! Classification of Murmur log lines into presence events.
//!
//! Only three line shapes are recognized; everything else is ignored. The
//! shapes all carry a `<session:identity(userid)>` prefix, where the userid
//! is `-1` for unregistered users.

use std::sync::LazyLock;

use regex::Regex;

use crate::presence::ROOT_LOCATION;

// Identity is captured up to (not including) the first `(`. An identity that
// itself contains `(` truncates at that point; this matches the server's
// observed log format and is left as-is rather than guessed around.
static AUTHENTICATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<\d+:([^(]+)\(-?\d+\)> Authenticated").expect("authenticated pattern")
});

static CONNECTION_CLOSED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<\d+:([^(]+)\(-?\d+\)> Connection closed").expect("connection closed pattern")
});

static MOVED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<\d+:([^(]+)\(-?\d+\)> Moved .* to #(.+)\[\d+:\d+\]$").expect("moved pattern")
});

/// A presence-relevant event extracted from one log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// A user finished connecting; they start in the root channel.
    Authenticated { who: String },
    /// A user's connection closed; they are no longer present.
    Disconnected { who: String },
    /// A user moved to a named sub-channel.
    Moved { who: String, channel: String },
}

impl LogEvent {
    /// The identity the event is about.
    pub fn who(&self) -> &str {
        match self {
            Self::Authenticated { who } | Self::Disconnected { who } | Self::Moved { who, .. } => {
                who
            }
        }
    }

    /// The location the event puts the user in, if any.
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::Authenticated { .. } => Some(ROOT_LOCATION),
            Self::Moved { channel, .. } => Some(channel),
            Self::Disconnected { .. } => None,
        }
    }

    /// Whether this event is eligible to trigger a report.
    ///
    /// Disconnects update presence but never announce; only arrivals do.
    pub fn triggers_report(&self) -> bool {
        !matches!(self, Self::Disconnected { .. })
    }
}

/// Classify one log line (newline already stripped).
///
/// Returns `None` for every line that is not one of the three recognized
/// shapes; such lines have no effect anywhere downstream.
pub fn parse_line(line: &str) -> Option<LogEvent> {
    if let Some(caps) = AUTHENTICATED.captures(line) {
        return Some(LogEvent::Authenticated {
            who: caps[1].to_string(),
        });
    }
    if let Some(caps) = CONNECTION_CLOSED.captures(line) {
        return Some(LogEvent::Disconnected {
            who: caps[1].to_string(),
        });
    }
    if let Some(caps) = MOVED.captures(line) {
        return Some(LogEvent::Moved {
            who: caps[1].to_string(),
            channel: caps[2].to_string(),
        });
    }
    None
}
