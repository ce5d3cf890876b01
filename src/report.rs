//! Debounced arrival reporting.
//!
//! The [`Reporter`] decides, each time presence grows, whether to announce
//! immediately, arm a delayed announcement, or fold the growth into an
//! already-armed one. It also computes the announcement text: the diff of
//! newly-arrived users against the baseline captured when the cycle began.
//!
//! Scheduling is an explicit two-state machine rather than a nullable timer
//! handle: `Idle` means no announcement is pending, `Armed` carries both the
//! fire deadline and the baseline snapshot for the pending cycle.

use std::time::Duration;

use tokio::time::Instant;

use crate::presence::Snapshot;

/// Scheduling state for the pending announcement, if any.
#[derive(Debug)]
enum ReportState {
    /// No announcement pending.
    Idle,
    /// One announcement pending. The baseline was captured when the cycle
    /// was armed and stays fixed while later arrivals coalesce into it.
    Armed { deadline: Instant, baseline: Snapshot },
}

/// What the scheduler decided for a growth event.
#[derive(Debug)]
pub enum ScheduleOutcome {
    /// Outside the cool-down window: announce right now with this baseline.
    FireNow { baseline: Snapshot },
    /// Inside the window with nothing pending: armed until `deadline`.
    Armed { deadline: Instant },
    /// Inside the window with a cycle already armed: folded into it.
    Coalesced,
}

/// Rate-limited announcement scheduler and formatter.
#[derive(Debug)]
pub struct Reporter {
    min_delay: Duration,
    state: ReportState,
    last_report_at: Option<Instant>,
    last_reported: Vec<String>,
}

impl Reporter {
    /// Create a scheduler enforcing `min_delay` between announcements.
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            state: ReportState::Idle,
            last_report_at: None,
            last_reported: Vec::new(),
        }
    }

    /// Deadline of the armed cycle, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        match &self.state {
            ReportState::Idle => None,
            ReportState::Armed { deadline, .. } => Some(*deadline),
        }
    }

    /// Record a presence growth at `now`, with the store state captured
    /// immediately before the triggering line's mutation.
    ///
    /// Implements the debounce: fire immediately when the cool-down from the
    /// last sent announcement has elapsed (discarding any pending cycle), arm
    /// a cycle when idle inside the window, and otherwise leave the pending
    /// cycle untouched so the window coalesces with its earliest baseline.
    pub fn schedule(&mut self, now: Instant, before: &Snapshot) -> ScheduleOutcome {
        let due = match self.last_report_at {
            None => true,
            Some(at) => now > at + self.min_delay,
        };

        if due {
            self.state = ReportState::Idle;
            return ScheduleOutcome::FireNow {
                baseline: before.clone(),
            };
        }

        match self.state {
            ReportState::Armed { .. } => ScheduleOutcome::Coalesced,
            ReportState::Idle => {
                let at = self
                    .last_report_at
                    .expect("inside the cool-down window implies a prior report");
                let deadline = at + self.min_delay;
                self.state = ReportState::Armed {
                    deadline,
                    baseline: before.clone(),
                };
                ScheduleOutcome::Armed { deadline }
            }
        }
    }

    /// Disarm the pending cycle and hand back its baseline.
    ///
    /// Called when the armed deadline elapses. Returns `None` when idle, so a
    /// cancelled cycle can never fire.
    pub fn disarm(&mut self) -> Option<Snapshot> {
        match std::mem::replace(&mut self.state, ReportState::Idle) {
            ReportState::Idle => None,
            ReportState::Armed { baseline, .. } => Some(baseline),
        }
    }

    /// Build the announcement for users present now but absent from
    /// `baseline`, or `None` if there is nothing new to say.
    ///
    /// Suppresses empty diffs and a diff identical to the previously sent
    /// one. On success the suppression set and the cool-down anchor are
    /// updated, so the caller should actually dispatch the returned text.
    pub fn compose(&mut self, now: Instant, baseline: &Snapshot, current: &Snapshot) -> Option<String> {
        let mut new: Vec<String> = current
            .keys()
            .filter(|who| !baseline.contains_key(*who))
            .cloned()
            .collect();
        new.sort();

        if new.is_empty() || new == self.last_reported {
            return None;
        }

        let mut message = format!("{} joined mumble", new.join(", "));
        if new.len() != current.len() {
            message.push_str(&format!(" ({} users online)", current.len()));
        }

        self.last_reported = new;
        self.last_report_at = Some(now);
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn snapshot(users: &[(&str, &str)]) -> Snapshot {
        users
            .iter()
            .map(|(who, loc)| (who.to_string(), loc.to_string()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_growth_fires_immediately() {
        let mut reporter = Reporter::new(Duration::from_secs(300));
        let outcome = reporter.schedule(Instant::now(), &HashMap::new());
        assert!(matches!(outcome, ScheduleOutcome::FireNow { .. }));
        assert!(reporter.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_growth_inside_window_arms_once_then_coalesces() {
        let mut reporter = Reporter::new(Duration::from_secs(300));
        let empty = HashMap::new();

        let now = Instant::now();
        reporter.schedule(now, &empty);
        reporter
            .compose(now, &empty, &snapshot(&[("alice", "root")]))
            .expect("first report should send");

        tokio::time::advance(Duration::from_secs(10)).await;
        let outcome = reporter.schedule(Instant::now(), &snapshot(&[("alice", "root")]));
        let ScheduleOutcome::Armed { deadline } = outcome else {
            panic!("second growth inside the window should arm");
        };
        assert_eq!(deadline, now + Duration::from_secs(300));

        tokio::time::advance(Duration::from_secs(10)).await;
        let outcome = reporter.schedule(
            Instant::now(),
            &snapshot(&[("alice", "root"), ("bob", "root")]),
        );
        assert!(matches!(outcome, ScheduleOutcome::Coalesced));
        // Deadline and baseline are unchanged by the coalesced growth.
        assert_eq!(reporter.deadline(), Some(deadline));
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalesced_cycle_uses_earliest_baseline() {
        let mut reporter = Reporter::new(Duration::from_secs(300));
        let empty = HashMap::new();

        let now = Instant::now();
        reporter.schedule(now, &empty);
        reporter
            .compose(now, &empty, &snapshot(&[("alice", "root")]))
            .expect("first report should send");

        // bob arms the cycle with the pre-bob baseline; carol coalesces.
        tokio::time::advance(Duration::from_secs(5)).await;
        reporter.schedule(Instant::now(), &snapshot(&[("alice", "root")]));
        tokio::time::advance(Duration::from_secs(5)).await;
        reporter.schedule(
            Instant::now(),
            &snapshot(&[("alice", "root"), ("bob", "root")]),
        );

        let baseline = reporter.disarm().expect("cycle should be armed");
        let current = snapshot(&[("alice", "root"), ("bob", "root"), ("carol", "root")]);
        let message = reporter
            .compose(Instant::now(), &baseline, &current)
            .expect("should send");
        assert_eq!(message, "bob, carol joined mumble (3 users online)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_growth_after_window_discards_pending_cycle() {
        let mut reporter = Reporter::new(Duration::from_secs(300));
        let empty = HashMap::new();

        let now = Instant::now();
        reporter.schedule(now, &empty);
        reporter
            .compose(now, &empty, &snapshot(&[("alice", "root")]))
            .expect("first report should send");

        tokio::time::advance(Duration::from_secs(10)).await;
        reporter.schedule(Instant::now(), &snapshot(&[("alice", "root")]));
        assert!(reporter.deadline().is_some());

        tokio::time::advance(Duration::from_secs(301)).await;
        let outcome = reporter.schedule(
            Instant::now(),
            &snapshot(&[("alice", "root"), ("bob", "root")]),
        );
        assert!(matches!(outcome, ScheduleOutcome::FireNow { .. }));
        assert!(reporter.deadline().is_none(), "pending cycle is discarded");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_parenthetical_when_everyone_is_new() {
        let mut reporter = Reporter::new(Duration::ZERO);
        let message = reporter
            .compose(
                Instant::now(),
                &HashMap::new(),
                &snapshot(&[("alice", "root")]),
            )
            .expect("should send");
        assert_eq!(message, "alice joined mumble");
    }

    #[tokio::test(start_paused = true)]
    async fn test_parenthetical_when_new_count_differs_from_total() {
        let mut reporter = Reporter::new(Duration::ZERO);
        let baseline = snapshot(&[("old", "root")]);
        let current = snapshot(&[("old", "root"), ("alice", "root"), ("bob", "Games")]);
        let message = reporter
            .compose(Instant::now(), &baseline, &current)
            .expect("should send");
        assert_eq!(message, "alice, bob joined mumble (3 users online)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_users_sorted_regardless_of_arrival_order() {
        let mut reporter = Reporter::new(Duration::ZERO);
        let current = snapshot(&[("zed", "root"), ("ann", "root")]);
        let message = reporter
            .compose(Instant::now(), &HashMap::new(), &current)
            .expect("should send");
        assert_eq!(message, "ann, zed joined mumble");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_diff_is_suppressed() {
        let mut reporter = Reporter::new(Duration::ZERO);
        let state = snapshot(&[("alice", "root")]);
        assert!(reporter.compose(Instant::now(), &state, &state).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_diff_is_suppressed() {
        let mut reporter = Reporter::new(Duration::ZERO);
        let current = snapshot(&[("alice", "root")]);
        assert!(reporter
            .compose(Instant::now(), &HashMap::new(), &current)
            .is_some());
        assert!(reporter
            .compose(Instant::now(), &HashMap::new(), &current)
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_when_idle_returns_none() {
        let mut reporter = Reporter::new(Duration::from_secs(300));
        assert!(reporter.disarm().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppressed_compose_keeps_cooldown_anchor() {
        let mut reporter = Reporter::new(Duration::from_secs(300));
        let empty = HashMap::new();
        let current = snapshot(&[("alice", "root")]);

        let now = Instant::now();
        reporter.schedule(now, &empty);
        reporter.compose(now, &empty, &current).expect("should send");

        // A suppressed attempt must not refresh the anchor: the next growth
        // after the window still fires immediately.
        tokio::time::advance(Duration::from_secs(200)).await;
        assert!(reporter.compose(Instant::now(), &empty, &current).is_none());

        tokio::time::advance(Duration::from_secs(101)).await;
        let outcome = reporter.schedule(Instant::now(), &current);
        assert!(matches!(outcome, ScheduleOutcome::FireNow { .. }));
    }
}
