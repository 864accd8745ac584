//! Polling timer and request bookkeeping for snapshot synchronization.
//!
//! The poller owns the only recurring task in the client. It never fetches
//! by itself; it hands out tagged fetch permits and the session controller
//! performs the I/O, so every state mutation stays in one place.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::snapshot::ThreadId;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Stopped,
}

/// Tag carried by every snapshot fetch. Responses that come back for a
/// different thread, or behind the applied-sequence watermark, are stale
/// and must be discarded instead of applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTag {
    pub thread: ThreadId,
    pub seq: u64,
}

pub(crate) struct Poller {
    state: PollerState,
    interval: Duration,
    tick_tx: UnboundedSender<()>,
    timer: Option<JoinHandle<()>>,
    in_flight: Option<u64>,
    next_seq: u64,
    applied_seq: u64,
}

impl Poller {
    pub fn new(interval: Duration, tick_tx: UnboundedSender<()>) -> Self {
        Self {
            state: PollerState::Idle,
            interval,
            tick_tx,
            timer: None,
            in_flight: None,
            next_seq: 0,
            applied_seq: 0,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Drives Idle <-> Polling from the activity predicate: a thread exists
    /// and the session is busy or waiting on a human gate. Stopped is
    /// permanent until `reset`.
    pub fn sync(&mut self, has_thread: bool, active: bool) {
        match self.state {
            PollerState::Idle if has_thread && active => {
                debug!("poller: idle -> polling");
                self.start_timer();
                self.state = PollerState::Polling;
            }
            PollerState::Polling if !has_thread => {
                debug!("poller: polling -> stopped (thread gone)");
                self.halt_timer();
                self.state = PollerState::Stopped;
            }
            PollerState::Polling if !active => {
                debug!("poller: polling -> idle");
                self.halt_timer();
                self.state = PollerState::Idle;
            }
            _ => {}
        }
    }

    /// Polling -> Stopped once a terminal snapshot has been applied. No
    /// fetch permit is issued afterwards.
    pub fn on_terminal(&mut self) {
        if self.state != PollerState::Stopped {
            debug!("poller: -> stopped (terminal snapshot)");
        }
        self.halt_timer();
        self.state = PollerState::Stopped;
    }

    /// Session teardown or reset: cancel the timer and start over for the
    /// next thread.
    pub fn reset(&mut self) {
        self.halt_timer();
        self.in_flight = None;
        self.state = PollerState::Idle;
    }

    /// Permit for a timer-driven fetch. Denied unless actively polling, and
    /// while a previous timer-driven fetch is still outstanding.
    pub fn begin_timed(&mut self, thread: &ThreadId) -> Option<FetchTag> {
        if self.state != PollerState::Polling || self.in_flight.is_some() {
            return None;
        }
        let tag = self.alloc(thread);
        self.in_flight = Some(tag.seq);
        Some(tag)
    }

    /// Permit for the out-of-band refresh right after a dispatched action.
    /// Skips the overlap guard; ordering is still enforced by the sequence
    /// watermark in `accept`.
    pub fn begin_refresh(&mut self, thread: &ThreadId) -> FetchTag {
        self.alloc(thread)
    }

    /// Marks the fetch for `tag` as settled, whatever its outcome.
    pub fn settle(&mut self, tag: &FetchTag) {
        if self.in_flight == Some(tag.seq) {
            self.in_flight = None;
        }
    }

    /// True when the response for `tag` is still current: same thread as
    /// the session and newer than anything already applied.
    pub fn accept(&mut self, tag: &FetchTag, current_thread: Option<&ThreadId>) -> bool {
        if current_thread != Some(&tag.thread) {
            debug!(thread = %tag.thread, seq = tag.seq, "dropping response for stale thread");
            return false;
        }
        if tag.seq <= self.applied_seq {
            debug!(seq = tag.seq, applied = self.applied_seq, "dropping out-of-order response");
            return false;
        }
        self.applied_seq = tag.seq;
        true
    }

    fn alloc(&mut self, thread: &ThreadId) -> FetchTag {
        self.next_seq += 1;
        FetchTag {
            thread: thread.clone(),
            seq: self.next_seq,
        }
    }

    fn start_timer(&mut self) {
        let tick_tx = self.tick_tx.clone();
        let period = self.interval;
        self.timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately; the controller already
            // refreshes directly on thread creation and after each action.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tick_tx.send(()).is_err() {
                    break;
                }
            }
        }));
    }

    fn halt_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.halt_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn poller() -> Poller {
        let (tick_tx, _tick_rx) = mpsc::unbounded_channel();
        Poller::new(Duration::from_millis(10), tick_tx)
    }

    #[tokio::test]
    async fn test_idle_until_thread_and_activity() {
        let mut p = poller();
        p.sync(false, true);
        assert_eq!(p.state(), PollerState::Idle);
        p.sync(true, false);
        assert_eq!(p.state(), PollerState::Idle);
        p.sync(true, true);
        assert_eq!(p.state(), PollerState::Polling);
    }

    #[tokio::test]
    async fn test_polling_pauses_when_inactive_and_resumes() {
        let mut p = poller();
        p.sync(true, true);
        p.sync(true, false);
        assert_eq!(p.state(), PollerState::Idle);
        p.sync(true, true);
        assert_eq!(p.state(), PollerState::Polling);
    }

    #[tokio::test]
    async fn test_terminal_stops_for_good() {
        let mut p = poller();
        let thread = ThreadId::new("t1");
        p.sync(true, true);
        p.on_terminal();
        assert_eq!(p.state(), PollerState::Stopped);
        // The activity predicate no longer restarts it.
        p.sync(true, true);
        assert_eq!(p.state(), PollerState::Stopped);
        assert!(p.begin_timed(&thread).is_none());
    }

    #[tokio::test]
    async fn test_reset_returns_to_idle() {
        let mut p = poller();
        p.sync(true, true);
        p.on_terminal();
        p.reset();
        assert_eq!(p.state(), PollerState::Idle);
        p.sync(true, true);
        assert_eq!(p.state(), PollerState::Polling);
    }

    #[tokio::test]
    async fn test_overlap_guard_allows_one_timed_fetch() {
        let mut p = poller();
        let thread = ThreadId::new("t1");
        p.sync(true, true);
        let first = p.begin_timed(&thread).expect("first permit");
        assert!(p.begin_timed(&thread).is_none());
        p.settle(&first);
        assert!(p.begin_timed(&thread).is_some());
    }

    #[tokio::test]
    async fn test_refresh_bypasses_overlap_guard() {
        let mut p = poller();
        let thread = ThreadId::new("t1");
        p.sync(true, true);
        let timed = p.begin_timed(&thread).expect("permit");
        let refresh = p.begin_refresh(&thread);
        assert!(refresh.seq > timed.seq);
    }

    #[tokio::test]
    async fn test_accept_discards_wrong_thread_and_old_seq() {
        let mut p = poller();
        let t1 = ThreadId::new("t1");
        let t2 = ThreadId::new("t2");
        p.sync(true, true);

        let early = p.begin_refresh(&t1);
        let late = p.begin_refresh(&t1);

        // Responses land out of order: the later request is applied first.
        assert!(p.accept(&late, Some(&t1)));
        assert!(!p.accept(&early, Some(&t1)));

        // A response for a previous thread never applies.
        let foreign = p.begin_refresh(&t1);
        assert!(!p.accept(&foreign, Some(&t2)));
        assert!(!p.accept(&foreign, None));
    }

    #[tokio::test]
    async fn test_sequences_stay_monotonic_across_reset() {
        let mut p = poller();
        let t1 = ThreadId::new("t1");
        let t2 = ThreadId::new("t2");
        let before = p.begin_refresh(&t1);
        assert!(p.accept(&before, Some(&t1)));
        p.reset();
        let after = p.begin_refresh(&t2);
        assert!(after.seq > before.seq);
        assert!(p.accept(&after, Some(&t2)));
    }
}
