//! # Per-client mailbox.
//!
//! An [`Inbox`] holds a client's pending events in two FIFO queues, one per
//! priority class, plus the bookkeeping that makes sticky delivery
//! once-per-client. A [`tokio::sync::Notify`] wakes the owning consumer.
//!
//! ## Rules
//! - HighPriority events drain before normal events; within a class the
//!   order is FIFO.
//! - An Exclusive push is dropped when an equivalent event (same kind and
//!   source) is already queued.
//! - A sticky event is accepted at most once per inbox, keyed by the
//!   event's sequence number. The bus replays retained sticky events on
//!   registration; the seen-set makes the replay race with a concurrent
//!   broadcast harmless.
//! - Exactly one task consumes each inbox. `Notify::notify_one` stores a
//!   single permit, which is sufficient because the consumer re-checks the
//!   queues before every wait.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

use super::event::{Event, EventFlags};

#[derive(Default)]
struct Queues {
    high: VecDeque<Event>,
    normal: VecDeque<Event>,
    sticky_seen: HashSet<u64>,
}

pub(crate) struct Inbox {
    queues: Mutex<Queues>,
    notify: Notify,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            notify: Notify::new(),
        }
    }

    /// Enqueues an event, honoring Exclusive dedup and sticky
    /// once-per-client delivery.
    pub(crate) fn push(&self, event: Event) {
        {
            let mut queues = self.queues.lock().expect("inbox lock poisoned");

            if event.flags().contains(EventFlags::EXCLUSIVE)
                && queues
                    .high
                    .iter()
                    .chain(queues.normal.iter())
                    .any(|queued| queued.is_equivalent(&event))
            {
                return;
            }

            if event.flags().contains(EventFlags::STICKY) && !queues.sticky_seen.insert(event.seq())
            {
                return;
            }

            if event.flags().contains(EventFlags::HIGH_PRIORITY) {
                queues.high.push_back(event);
            } else {
                queues.normal.push_back(event);
            }
        }
        self.notify.notify_one();
    }

    /// Non-blocking pop: next high-priority event, else next normal one.
    pub(crate) fn pop(&self) -> Option<Event> {
        let mut queues = self.queues.lock().expect("inbox lock poisoned");
        queues.high.pop_front().or_else(|| queues.normal.pop_front())
    }

    /// Blocks until an event is available or the timeout elapses.
    ///
    /// `None` waits indefinitely; a zero timeout degenerates to [`pop`].
    pub(crate) async fn pop_wait(&self, timeout: Option<Duration>) -> Option<Event> {
        if let Some(d) = timeout {
            if d.is_zero() {
                return self.pop();
            }
        }
        let deadline = timeout.map(|d| Instant::now() + d);

        loop {
            // Arm the waiter before checking so a push between the check
            // and the await leaves a permit behind.
            let notified = self.notify.notified();
            if let Some(event) = self.pop() {
                return Some(event);
            }
            match deadline {
                Some(at) => {
                    if timeout_at(at, notified).await.is_err() {
                        return self.pop();
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Discards all pending events; returns how many were dropped.
    pub(crate) fn drain(&self) -> usize {
        let mut queues = self.queues.lock().expect("inbox lock poisoned");
        let count = queues.high.len() + queues.normal.len();
        queues.high.clear();
        queues.normal.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::{ClientId, EventKind};

    #[test]
    fn high_priority_precedes_earlier_normal() {
        let inbox = Inbox::new();
        inbox.push(Event::new(EventKind::Reload));
        inbox.push(Event::new(EventKind::Timer).with_flags(EventFlags::HIGH_PRIORITY));

        assert_eq!(inbox.pop().unwrap().kind(), EventKind::Timer);
        assert_eq!(inbox.pop().unwrap().kind(), EventKind::Reload);
        assert!(inbox.pop().is_none());
    }

    #[test]
    fn fifo_within_priority_class() {
        let inbox = Inbox::new();
        let first = Event::new(EventKind::Reload);
        let second = Event::new(EventKind::Reload);
        let (a, b) = (first.seq(), second.seq());
        inbox.push(first);
        inbox.push(second);

        assert_eq!(inbox.pop().unwrap().seq(), a);
        assert_eq!(inbox.pop().unwrap().seq(), b);
    }

    #[test]
    fn exclusive_push_is_noop_when_equivalent_pending() {
        let inbox = Inbox::new();
        let source = ClientId(7);
        inbox.push(Event::fd_ready().with_source(source));
        inbox.push(Event::fd_ready().with_source(source));

        assert!(inbox.pop().is_some());
        assert!(inbox.pop().is_none());
    }

    #[test]
    fn sticky_delivered_once_per_inbox() {
        let inbox = Inbox::new();
        let quit = Event::quit();
        let replay = quit.try_clone().unwrap();
        inbox.push(quit);
        inbox.push(replay);

        assert_eq!(inbox.pop().unwrap().kind(), EventKind::Quit);
        assert!(inbox.pop().is_none());
    }

    #[tokio::test]
    async fn pop_wait_zero_timeout_is_nonblocking() {
        let inbox = Inbox::new();
        assert!(inbox.pop_wait(Some(Duration::ZERO)).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn pop_wait_times_out_empty() {
        let inbox = Inbox::new();
        assert!(inbox.pop_wait(Some(Duration::from_secs(1))).await.is_none());
    }
}
