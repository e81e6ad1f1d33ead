//! # Timer service: second-tick driver over logical timers.
//!
//! A [`Timer`] counts down `value` seconds, fires one TIMER event at its
//! target (or the supervisor when it has none), then reloads `value` from
//! `interval`. A zero interval stops the timer after the first firing.
//! Timer ids are informational; several timers may share one.
//!
//! The [`TimerRegistry`] is the shared state: a vector of timers advanced
//! once per tick, in insertion order. The [`TimerService`] worker drives
//! the tick from a monotonic one-second interval.
//!
//! ## Rules
//! - One decrement per whole second, never faster; ticks are serialized.
//! - Ordering of timers firing in the same tick is insertion order.
//! - Dispatch happens after the registry lock is released; the ticker
//!   never holds a lock while pushing events.
//! - `remove` waits for an in-progress tick to release the registry.
//! - Value, interval, running, and extend are individually locked per
//!   timer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::error::RuntimeError;
use crate::events::{ClientId, Event, EventClient, EventKind};
use crate::services::SystemServices;
use crate::worker::Worker;

struct TimerState {
    value: i64,
    interval: i64,
    running: bool,
}

/// A logical countdown timer registered with the timer service.
pub struct Timer {
    id: u64,
    target: Option<ClientId>,
    state: Mutex<TimerState>,
}

impl Timer {
    /// Creates a stopped timer. Call [`Timer::start`] after registering it
    /// with [`TimerRegistry::add`].
    pub fn new(id: u64, value: u64, interval: u64, target: Option<ClientId>) -> Arc<Self> {
        Arc::new(Self {
            id,
            target,
            state: Mutex::new(TimerState {
                value: value as i64,
                interval: interval as i64,
                running: false,
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn start(&self) {
        self.state.lock().expect("timer lock poisoned").running = true;
    }

    pub fn stop(&self) {
        self.state.lock().expect("timer lock poisoned").running = false;
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().expect("timer lock poisoned").running
    }

    pub fn set_value(&self, value: u64) {
        self.state.lock().expect("timer lock poisoned").value = value as i64;
        debug!("Set timer value: id: {}, value: {value}", self.id);
    }

    pub fn set_interval(&self, interval: u64) {
        self.state.lock().expect("timer lock poisoned").interval = interval as i64;
        debug!("Set timer interval: id: {}, interval: {interval}", self.id);
    }

    /// Adds `value` seconds to the current countdown.
    pub fn extend(&self, value: u64) {
        let mut state = self.state.lock().expect("timer lock poisoned");
        state.value += value as i64;
        debug!("Extend timer value: id: {}, value: {} (+{value})", self.id, state.value);
    }

    /// Seconds remaining until the next firing.
    pub fn remaining(&self) -> u64 {
        self.state.lock().expect("timer lock poisoned").value.max(0) as u64
    }

    pub fn interval(&self) -> u64 {
        self.state.lock().expect("timer lock poisoned").interval.max(0) as u64
    }
}

/// Shared registry of timers, advanced once per tick.
pub struct TimerRegistry {
    timers: Mutex<Vec<Arc<Timer>>>,
    supervisor: ClientId,
}

impl TimerRegistry {
    pub(crate) fn new(supervisor: ClientId) -> Arc<Self> {
        Arc::new(Self {
            timers: Mutex::new(Vec::new()),
            supervisor,
        })
    }

    pub fn add(&self, timer: Arc<Timer>) {
        debug!(
            "Created timer: id: {}, value: {}, interval: {}",
            timer.id(),
            timer.remaining(),
            timer.interval()
        );
        self.timers
            .lock()
            .expect("timer registry lock poisoned")
            .push(timer);
    }

    /// Deregisters a timer. Blocks until an in-progress tick has released
    /// the registry, so the timer cannot fire after this returns.
    pub fn remove(&self, timer: &Arc<Timer>) {
        self.timers
            .lock()
            .expect("timer registry lock poisoned")
            .retain(|t| !Arc::ptr_eq(t, timer));
    }

    /// Advances all running timers by one second and collects the due
    /// dispatches. Dispatch itself happens lock-free in the caller.
    fn advance(&self) -> Vec<(u64, ClientId)> {
        let mut due = Vec::new();
        let timers = self.timers.lock().expect("timer registry lock poisoned");
        for timer in timers.iter() {
            let mut state = timer.state.lock().expect("timer lock poisoned");
            if !state.running {
                continue;
            }
            state.value -= 1;
            if state.value <= 0 {
                due.push((timer.id, timer.target.unwrap_or(self.supervisor)));
                state.value = state.interval;
                state.running = state.interval > 0;
            }
        }
        due
    }
}

/// Worker driving the one-second tick.
pub struct TimerService {
    registry: Arc<TimerRegistry>,
}

impl TimerService {
    /// Builds the service and installs its registry as the process
    /// singleton. Fails with `AlreadyExists` on a second construction.
    pub fn new(
        services: &SystemServices,
        supervisor: ClientId,
    ) -> Result<Box<Self>, RuntimeError> {
        let registry = TimerRegistry::new(supervisor);
        services.install_timer(registry.clone())?;
        Ok(Box::new(Self { registry }))
    }
}

#[async_trait]
impl Worker for TimerService {
    fn name(&self) -> &str {
        "timer-service"
    }

    async fn run(self: Box<Self>, client: EventClient) {
        debug!("Timer service started.");

        // First tick one full second out; interval() would fire immediately.
        let mut tick = time::interval_at(
            Instant::now() + Duration::from_secs(1),
            Duration::from_secs(1),
        );
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    for (timer_id, target) in self.registry.advance() {
                        if !client.bus().push(Event::timer(timer_id), target) {
                            debug!("timer {timer_id}: target {target} is gone");
                        }
                    }
                }
                ev = client.pop_wait(None) => {
                    match ev {
                        Some(ev) if ev.kind() == EventKind::Quit => {
                            debug!("Timer service terminated.");
                            return;
                        }
                        Some(ev) => debug!("timer: unhandled event: {:?}", ev.kind()),
                        None => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_timer_does_not_advance() {
        let registry = TimerRegistry::new(ClientId(1));
        let timer = Timer::new(1, 2, 0, None);
        registry.add(timer.clone());

        assert!(registry.advance().is_empty());
        assert_eq!(timer.remaining(), 2);
    }

    #[test]
    fn one_shot_fires_once_then_stops() {
        let registry = TimerRegistry::new(ClientId(1));
        let timer = Timer::new(7, 1, 0, None);
        registry.add(timer.clone());
        timer.start();

        assert_eq!(registry.advance(), vec![(7, ClientId(1))]);
        assert!(!timer.is_running());
        assert!(registry.advance().is_empty());
        assert!(registry.advance().is_empty());
    }

    #[test]
    fn interval_timer_reloads() {
        let target = ClientId(9);
        let registry = TimerRegistry::new(ClientId(1));
        let timer = Timer::new(3, 2, 3, Some(target));
        registry.add(timer.clone());
        timer.start();

        assert!(registry.advance().is_empty());
        assert_eq!(registry.advance(), vec![(3, target)]);
        assert!(timer.is_running());
        assert_eq!(timer.remaining(), 3);

        assert!(registry.advance().is_empty());
        assert!(registry.advance().is_empty());
        assert_eq!(registry.advance(), vec![(3, target)]);
    }

    #[test]
    fn extend_postpones_firing() {
        let registry = TimerRegistry::new(ClientId(1));
        let timer = Timer::new(1, 1, 0, None);
        registry.add(timer.clone());
        timer.start();
        timer.extend(2);

        assert!(registry.advance().is_empty());
        assert!(registry.advance().is_empty());
        assert_eq!(registry.advance().len(), 1);
    }

    #[test]
    fn removed_timer_never_fires() {
        let registry = TimerRegistry::new(ClientId(1));
        let timer = Timer::new(1, 1, 1, None);
        registry.add(timer.clone());
        timer.start();
        registry.remove(&timer);

        assert!(registry.advance().is_empty());
    }

    #[test]
    fn same_tick_order_is_insertion_order() {
        let registry = TimerRegistry::new(ClientId(1));
        for id in [4u64, 2, 9] {
            let t = Timer::new(id, 1, 0, None);
            registry.add(t.clone());
            t.start();
        }

        let fired: Vec<u64> = registry.advance().into_iter().map(|(id, _)| id).collect();
        assert_eq!(fired, vec![4, 2, 9]);
    }
}
