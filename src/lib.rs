//! Murmur Herald - announces new Mumble arrivals to an IRC channel.
//!
//! The daemon tails a Murmur server log, maintains an in-memory model of who
//! is currently connected, and sends a rate-limited summary to IRC whenever
//! new users show up.
//!
//! # Architecture
//!
//! The crate follows a centralized state pattern: one [`Session`] owns all
//! mutable state and processes every external event from a single queue.
//!
//! - **Session** - controller; owns presence, scheduling, and the chat handle
//! - **LogSource** - priming read plus live follow of the log file
//! - **IRC client** - connection task behind the [`ChatSink`] seam
//!
//! # Modules
//!
//! - [`lines`] - incremental line splitting of streamed chunks
//! - [`event`] - classification of the three recognized log line shapes
//! - [`presence`] - identity → location map
//! - [`report`] - debounced announcement scheduling and formatting
//! - [`session`] - event loop and state ownership
//! - [`source`] - log file priming and following
//! - [`irc`] - minimal IRC client
//! - [`config`] - configuration loading/saving

pub mod config;
pub mod event;
pub mod irc;
pub mod lines;
pub mod presence;
pub mod report;
pub mod session;
pub mod source;

// Re-export commonly used types
pub use config::Config;
pub use event::{parse_line, LogEvent};
pub use irc::{ChatError, ChatSink, IrcConfig, IrcHandle};
pub use lines::LineBuffer;
pub use presence::{PresenceStore, Snapshot, ROOT_LOCATION};
pub use report::{Reporter, ScheduleOutcome};
pub use session::{Session, SessionEvent};
pub use source::{FollowHandle, LogSource};
