//! # Fd readiness poller.
//!
//! An [`FdPoller`] watches a set of file descriptors on behalf of one
//! client. A dedicated task snapshots the interest map, calls `poll(2)`
//! with a bounded timeout, ORs the results into the latched map, and
//! pushes a single FDREADY event to the owner. The event carries
//! Exclusive|Persistent, so at most one is pending no matter how many poll
//! cycles complete before the owner drains its inbox; the owner inspects
//! individual descriptors with [`FdPoller::is_set`], which reports and
//! clears.
//!
//! ## Rules
//! - `set(fd, ..)` merges interest and clears any latched readiness for
//!   that fd.
//! - `clear(fd)` removes the descriptor from both maps.
//! - `is_set(fd, bit)` consumes the latched bit (read-and-clear).
//! - An empty interest set sleeps for two cycles instead of calling the OS
//!   with no descriptors.
//! - A poll error is logged and backed off, never fatal.
//! - Owners that add descriptors observe latency up to one poll cycle;
//!   there is no wake-on-set.

use std::collections::HashMap;
use std::os::fd::{BorrowedFd, RawFd};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitflags::bitflags;
use log::{debug, warn};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{Bus, ClientId, Event};

bitflags! {
    /// Readiness classes a descriptor can be watched for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FdInterest: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXCEPT = 0b100;
    }
}

impl FdInterest {
    fn poll_flags(self) -> PollFlags {
        let mut flags = PollFlags::empty();
        if self.contains(FdInterest::READ) {
            flags |= PollFlags::POLLIN;
        }
        if self.contains(FdInterest::WRITE) {
            flags |= PollFlags::POLLOUT;
        }
        if self.contains(FdInterest::EXCEPT) {
            flags |= PollFlags::POLLPRI;
        }
        flags
    }

    fn from_poll_flags(flags: PollFlags) -> Self {
        let mut interest = FdInterest::empty();
        if flags.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR) {
            interest |= FdInterest::READ;
        }
        if flags.contains(PollFlags::POLLOUT) {
            interest |= FdInterest::WRITE;
        }
        // POLLNVAL: the descriptor was closed behind our back; surface it
        // so the owner clears its registration.
        if flags.intersects(PollFlags::POLLPRI | PollFlags::POLLNVAL) {
            interest |= FdInterest::EXCEPT;
        }
        interest
    }
}

#[derive(Default)]
struct Maps {
    interest: HashMap<RawFd, FdInterest>,
    latched: HashMap<RawFd, FdInterest>,
}

/// Readiness poller owned by one event client.
pub struct FdPoller {
    maps: Arc<Mutex<Maps>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl FdPoller {
    /// Spawns the poll loop. Readiness is reported to `owner` as FDREADY
    /// events; `cycle` bounds each OS wait.
    pub fn new(bus: &Bus, owner: ClientId, cycle: Duration) -> Self {
        let maps = Arc::new(Mutex::new(Maps::default()));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            bus.clone(),
            owner,
            maps.clone(),
            cancel.clone(),
            cycle,
        ));
        Self {
            maps,
            cancel,
            task: Some(task),
        }
    }

    /// Adds interest in `whence` for `fd`. Any latched readiness for the
    /// descriptor is discarded.
    pub fn set(&self, fd: RawFd, whence: FdInterest) {
        let mut maps = self.maps.lock().expect("poller lock poisoned");
        *maps.interest.entry(fd).or_default() |= whence;
        maps.latched.remove(&fd);
    }

    /// Stops watching `fd` entirely.
    pub fn clear(&self, fd: RawFd) {
        let mut maps = self.maps.lock().expect("poller lock poisoned");
        maps.interest.remove(&fd);
        maps.latched.remove(&fd);
    }

    /// Drops all interest and all latched readiness.
    pub fn reset(&self) {
        let mut maps = self.maps.lock().expect("poller lock poisoned");
        maps.interest.clear();
        maps.latched.clear();
    }

    /// Reports whether `whence` readiness was latched for `fd`, clearing
    /// the reported bits.
    pub fn is_set(&self, fd: RawFd, whence: FdInterest) -> bool {
        let mut maps = self.maps.lock().expect("poller lock poisoned");
        let Some(latched) = maps.latched.get_mut(&fd) else {
            return false;
        };
        let hit = latched.intersects(whence);
        latched.remove(whence);
        hit
    }

    /// Stops the poll loop and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for FdPoller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop(
    bus: Bus,
    owner: ClientId,
    maps: Arc<Mutex<Maps>>,
    cancel: CancellationToken,
    cycle: Duration,
) {
    debug!("fd poller started for {owner}");
    let idle = cycle * 2;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let snapshot: Vec<(RawFd, FdInterest)> = {
            let maps = maps.lock().expect("poller lock poisoned");
            maps.interest.iter().map(|(fd, i)| (*fd, *i)).collect()
        };

        if snapshot.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep(idle) => continue,
                _ = cancel.cancelled() => return,
            }
        }

        let timeout = PollTimeout::from(cycle.as_millis().min(u16::MAX as u128) as u16);
        let polled = tokio::task::spawn_blocking(move || poll_once(&snapshot, timeout)).await;

        let ready = match polled {
            Ok(Ok(ready)) => ready,
            Ok(Err(err)) => {
                warn!("poll: {err}");
                tokio::select! {
                    _ = tokio::time::sleep(idle) => continue,
                    _ = cancel.cancelled() => return,
                }
            }
            Err(_) => return,
        };

        if ready.is_empty() {
            continue;
        }

        {
            let mut maps = maps.lock().expect("poller lock poisoned");
            for (fd, bits) in ready {
                // Interest may have changed while polling; latch only what
                // is still watched.
                let Some(interest) = maps.interest.get(&fd).copied() else {
                    continue;
                };
                let bits = bits & interest;
                if !bits.is_empty() {
                    *maps.latched.entry(fd).or_default() |= bits;
                }
            }
        }

        if !bus.push(Event::fd_ready(), owner) {
            debug!("fd poller owner {owner} is gone");
            return;
        }
    }
}

/// One blocking poll pass over the snapshot.
fn poll_once(
    snapshot: &[(RawFd, FdInterest)],
    timeout: PollTimeout,
) -> nix::Result<Vec<(RawFd, FdInterest)>> {
    let mut fds: Vec<PollFd> = snapshot
        .iter()
        .map(|(fd, interest)| {
            // The caller guarantees the descriptor outlives its interest
            // registration; the poller never closes it.
            let borrowed = unsafe { BorrowedFd::borrow_raw(*fd) };
            PollFd::new(borrowed, interest.poll_flags())
        })
        .collect();

    let n = poll(&mut fds, timeout)?;
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut ready = Vec::new();
    for (slot, (fd, _)) in fds.iter().zip(snapshot.iter()) {
        if let Some(revents) = slot.revents() {
            let bits = FdInterest::from_poll_flags(revents);
            if !bits.is_empty() {
                ready.push((*fd, bits));
            }
        }
    }
    Ok(ready)
}
