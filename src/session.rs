//! Session - the single long-lived controller owning all presence state.
//!
//! Every external stimulus (log data, log-stream closure, chat lifecycle,
//! the restart signal, shutdown) arrives as a [`SessionEvent`] on one mpsc
//! queue and is handled to completion before the next, so the presence
//! store, the report scheduler, and the line buffer are never touched
//! concurrently. The armed-report timer is a branch of the same `select!`
//! loop, enabled only while a report is pending.
//!
//! ```text
//!  log follow task ──┐
//!  irc task ─────────┼──► SessionEvent queue ──► Session::run
//!  signal tasks ─────┘                              │
//!                                                   ▼
//!                            lines → events → presence → reporter → chat
//! ```

use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::event::{parse_line, LogEvent};
use crate::irc::ChatSink;
use crate::lines::LineBuffer;
use crate::presence::{PresenceStore, Snapshot};
use crate::report::{Reporter, ScheduleOutcome};
use crate::source::{FollowHandle, LogSource};

/// External stimuli delivered to the session's event queue.
#[derive(Debug)]
pub enum SessionEvent {
    /// Bytes appended to the log since the last delivery.
    LogData(Vec<u8>),
    /// The follow stream ended unexpectedly.
    LogClosed,
    /// The chat client registered and joined the channel.
    ChatReady,
    /// The chat client failed; the session keeps running without it.
    ChatError(String),
    /// Re-arm log following from the current end of file (SIGHUP).
    RestartFollow,
    /// Orderly shutdown (SIGINT/SIGTERM).
    Shutdown,
}

/// Controller owning the presence store, scheduler, and chat handle.
pub struct Session<S: ChatSink> {
    channel: String,
    chat: S,
    source: LogSource,
    store: PresenceStore,
    splitter: LineBuffer,
    reporter: Reporter,
    priming: bool,
    follow: Option<FollowHandle>,
    events_tx: mpsc::Sender<SessionEvent>,
    quit: bool,
}

impl<S: ChatSink> Session<S> {
    /// Create a session. It starts in the priming phase: log content is
    /// replayed into the presence store without announcing anything until
    /// [`prime`](Self::prime) completes.
    pub fn new(
        channel: String,
        min_delay: Duration,
        chat: S,
        source: LogSource,
        events_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        log::info!(
            "session watching {} for {} (min {}s between announcements)",
            source.path().display(),
            channel,
            min_delay.as_secs()
        );
        Self {
            channel,
            chat,
            source,
            store: PresenceStore::new(),
            splitter: LineBuffer::new(),
            reporter: Reporter::new(min_delay),
            priming: true,
            follow: None,
            events_tx,
            quit: false,
        }
    }

    /// Replay the log's existing content without announcing, returning the
    /// offset live following should start from.
    pub async fn prime(&mut self) -> Result<u64> {
        let (content, offset) = self.source.read_all().await?;
        self.ingest(&content).await;
        self.priming = false;
        log::info!("primed from existing log: {} users present", self.store.len());
        Ok(offset)
    }

    /// Start (or restart) the live follow from `offset`, cancelling any
    /// previous follower first.
    pub fn start_follow(&mut self, offset: u64) -> Result<()> {
        if let Some(handle) = self.follow.take() {
            handle.cancel();
        }
        self.follow = Some(self.source.follow(offset, self.events_tx.clone())?);
        Ok(())
    }

    /// Current presence state.
    pub fn presence(&self) -> &PresenceStore {
        &self.store
    }

    /// Deadline of the pending announcement, if one is armed.
    pub fn report_deadline(&self) -> Option<Instant> {
        self.reporter.deadline()
    }

    /// Handle one event to completion.
    pub async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::LogData(bytes) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                self.ingest(&text).await;
            }
            SessionEvent::LogClosed => {
                log::error!("log stream closed; send SIGHUP to re-arm following");
            }
            SessionEvent::ChatReady => {
                log::info!("chat ready; announcing to {}", self.channel);
            }
            SessionEvent::ChatError(err) => {
                log::error!("chat error: {err}");
            }
            SessionEvent::RestartFollow => match self.source.end_offset().await {
                Ok(offset) => {
                    log::info!("restart requested; re-arming log follow from byte {offset}");
                    if let Err(e) = self.start_follow(offset) {
                        log::error!("failed to restart log follow: {e:#}");
                    }
                }
                Err(e) => {
                    log::error!("failed to restart log follow: {e:#}");
                }
            },
            SessionEvent::Shutdown => {
                log::info!("shutting down");
                self.quit = true;
            }
        }
    }

    /// Fire the armed announcement. Called when its deadline elapses.
    pub async fn flush_armed(&mut self) {
        if let Some(baseline) = self.reporter.disarm() {
            self.announce(&baseline).await;
        }
    }

    /// Process events until shutdown or until every sender is gone.
    pub async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) -> Result<()> {
        while !self.quit {
            let deadline = self.reporter.deadline();
            tokio::select! {
                maybe = events.recv() => match maybe {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = wait_until(deadline) => self.flush_armed().await,
            }
        }
        if let Some(handle) = self.follow.take() {
            handle.cancel();
        }
        Ok(())
    }

    async fn ingest(&mut self, text: &str) {
        let lines = self.splitter.feed(text);
        for line in lines {
            self.process_line(&line).await;
        }
    }

    async fn process_line(&mut self, line: &str) {
        let Some(event) = parse_line(line) else {
            return;
        };

        let before = self.store.snapshot();
        self.store.apply(&event);

        match &event {
            LogEvent::Authenticated { who } => {
                log::info!("{} connected ({} online)", who, self.store.len());
            }
            LogEvent::Disconnected { who } => {
                log::info!("{} disconnected ({} online)", who, self.store.len());
            }
            LogEvent::Moved { who, channel } => {
                log::info!("{} moved to {} ({} online)", who, channel, self.store.len());
            }
        }

        if self.priming || !event.triggers_report() {
            return;
        }
        // Only growth triggers an announcement; moves and re-authentications
        // keep the count flat and stay silent.
        if self.store.len() <= before.len() {
            return;
        }

        match self.reporter.schedule(Instant::now(), &before) {
            ScheduleOutcome::FireNow { baseline } => {
                log::info!("announcing immediately");
                self.announce(&baseline).await;
            }
            ScheduleOutcome::Armed { deadline } => {
                log::info!(
                    "announcement scheduled in {}s",
                    deadline.saturating_duration_since(Instant::now()).as_secs()
                );
            }
            ScheduleOutcome::Coalesced => {
                log::debug!("announcement already pending");
            }
        }
    }

    async fn announce(&mut self, baseline: &Snapshot) {
        let current = self.store.snapshot();
        let Some(message) = self.reporter.compose(Instant::now(), baseline, &current) else {
            log::debug!("announcement suppressed (nothing new)");
            return;
        };
        if let Err(e) = self.chat.send(&self.channel, &message).await {
            log::error!("failed to send announcement: {e}");
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irc::ChatError;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tempfile::NamedTempFile;

    #[derive(Clone, Default)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ChatSink for RecordingSink {
        async fn send(&self, target: &str, text: &str) -> Result<(), ChatError> {
            self.sent.lock().expect("sink lock").push(format!("{target} {text}"));
            Ok(())
        }
    }

    impl RecordingSink {
        fn messages(&self) -> Vec<String> {
            self.sent.lock().expect("sink lock").clone()
        }
    }

    fn make_session(
        min_delay: Duration,
        log_content: &str,
    ) -> (Session<RecordingSink>, RecordingSink, NamedTempFile) {
        let mut file = NamedTempFile::new().expect("create temp log");
        write!(file, "{log_content}").expect("write log");
        file.flush().expect("flush");

        let sink = RecordingSink::default();
        let (tx, _rx) = mpsc::channel(16);
        let session = Session::new(
            "#mumble".to_string(),
            min_delay,
            sink.clone(),
            LogSource::new(file.path().to_path_buf()),
            tx,
        );
        (session, sink, file)
    }

    async fn feed(session: &mut Session<RecordingSink>, line: &str) {
        session
            .handle_event(SessionEvent::LogData(format!("{line}\n").into_bytes()))
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_priming_populates_without_announcing() {
        let log = "<1:alice(-1)> Authenticated\n<2:bob(-1)> Authenticated\n";
        let (mut session, sink, _file) = make_session(Duration::ZERO, log);

        session.prime().await.expect("prime");

        assert_eq!(session.presence().len(), 2);
        assert!(sink.messages().is_empty());
        assert!(session.report_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_after_priming_announces_immediately() {
        let (mut session, sink, _file) = make_session(Duration::ZERO, "");
        session.prime().await.expect("prime");

        feed(&mut session, "<1:alice(-1)> Authenticated").await;

        assert_eq!(sink.messages(), vec!["#mumble alice joined mumble"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_never_announces() {
        let log = "<1:alice(-1)> Authenticated\n";
        let (mut session, sink, _file) = make_session(Duration::ZERO, log);
        session.prime().await.expect("prime");

        feed(&mut session, "<1:alice(-1)> Moved alice to #Games[2:1]").await;

        assert_eq!(session.presence().location("alice"), Some("Games"));
        assert!(sink.messages().is_empty());
        assert!(session.report_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reauthentication_without_growth_stays_silent() {
        let (mut session, sink, _file) = make_session(Duration::ZERO, "");
        session.prime().await.expect("prime");

        feed(&mut session, "<1:alice(-1)> Authenticated").await;
        assert_eq!(sink.messages().len(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        feed(&mut session, "<2:alice(-1)> Authenticated").await;
        assert_eq!(sink.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_never_announces() {
        let log = "<1:alice(-1)> Authenticated\n";
        let (mut session, sink, _file) = make_session(Duration::ZERO, log);
        session.prime().await.expect("prime");

        feed(&mut session, "<1:alice(-1)> Connection closed: gone").await;

        assert!(session.presence().is_empty());
        assert!(sink.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_joins_inside_window_coalesce_into_one_report() {
        let (mut session, sink, _file) = make_session(Duration::from_secs(300), "");
        session.prime().await.expect("prime");

        feed(&mut session, "<1:alice(-1)> Authenticated").await;
        assert_eq!(sink.messages(), vec!["#mumble alice joined mumble"]);

        tokio::time::advance(Duration::from_secs(10)).await;
        feed(&mut session, "<2:carol(-1)> Authenticated").await;
        let deadline = session.report_deadline().expect("armed");

        tokio::time::advance(Duration::from_secs(10)).await;
        feed(&mut session, "<3:bob(-1)> Authenticated").await;
        assert_eq!(session.report_deadline(), Some(deadline), "still one cycle");
        assert_eq!(sink.messages().len(), 1, "nothing sent inside the window");

        tokio::time::advance(Duration::from_secs(281)).await;
        session.flush_armed().await;

        assert_eq!(
            sink.messages(),
            vec![
                "#mumble alice joined mumble",
                "#mumble bob, carol joined mumble (3 users online)",
            ]
        );
        assert!(session.report_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_then_leave_inside_window_is_suppressed() {
        let (mut session, sink, _file) = make_session(Duration::from_secs(300), "");
        session.prime().await.expect("prime");

        feed(&mut session, "<1:alice(-1)> Authenticated").await;
        tokio::time::advance(Duration::from_secs(10)).await;
        feed(&mut session, "<2:bob(-1)> Authenticated").await;
        feed(&mut session, "<2:bob(-1)> Connection closed: gone").await;

        tokio::time::advance(Duration::from_secs(300)).await;
        session.flush_armed().await;

        // bob arrived and left inside the window: nothing new to say.
        assert_eq!(sink.messages(), vec!["#mumble alice joined mumble"]);
    }
}
