use crate::config::ActiveWindow;
use chrono::{DateTime, Timelike};
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Whether the tracker should currently be operating.
///
/// Single writer (the time policy), read by the supervisor.
pub struct ActiveHours {
    active: Mutex<bool>,
    changed: Condvar,
}

impl ActiveHours {
    pub fn new(active: bool) -> Self {
        Self {
            active: Mutex::new(active),
            changed: Condvar::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        *crate::lock(&self.active)
    }

    pub fn set(&self, active: bool) {
        let mut current = crate::lock(&self.active);
        if *current != active {
            info!("Schedule: active hours {}", if active { "started" } else { "ended" });
            *current = active;
            self.changed.notify_all();
        }
    }

    /// Block until the flag differs from `from` or `timeout` passes; returns the flag.
    pub fn wait_for_change(&self, from: bool, timeout: Duration) -> bool {
        let guard = crate::lock(&self.active);
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |active| *active == from)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard
    }
}

impl Default for ActiveHours {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Wall-clock time anchored on the last GPS fix.
#[derive(Default)]
pub struct ClockSync {
    anchor: Mutex<Option<(i64, Instant)>>,
}

impl ClockSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sync(&self, epoch: i64) {
        let mut anchor = crate::lock(&self.anchor);
        if anchor.is_none() {
            info!("Schedule: clock synced from GPS ({})", epoch);
        }
        *anchor = Some((epoch, Instant::now()));
    }

    /// Current UTC epoch seconds, `None` until the first fix.
    pub fn now(&self) -> Option<i64> {
        crate::lock(&self.anchor)
            .map(|(epoch, at)| epoch + at.elapsed().as_secs() as i64)
    }
}

impl ActiveWindow {
    /// Whether the local hour of `epoch` falls in the window.
    pub fn contains(&self, epoch: i64) -> bool {
        if self.start_hour == self.end_hour {
            return true;
        }
        let local = epoch + i64::from(self.utc_offset_minutes) * 60;
        let Some(time) = DateTime::from_timestamp(local, 0) else {
            return true;
        };
        let hour = time.hour() as u8;
        if self.start_hour < self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Drives [`ActiveHours`] from the synced clock and the configured window.
pub struct TimePolicy<'a> {
    pub clock: &'a ClockSync,
    pub hours: &'a ActiveHours,
    pub window: ActiveWindow,
}

impl TimePolicy<'_> {
    /// One evaluation. Before the first sync the flag is left alone.
    pub fn evaluate(&self) {
        if let Some(now) = self.clock.now() {
            self.hours.set(self.window.contains(now));
        }
    }

    pub fn run(&self, running: &AtomicBool, interval: Duration) {
        info!("Schedule: time policy started");
        while running.load(Ordering::Relaxed) {
            self.evaluate();
            std::thread::sleep(interval);
        }
        info!("Schedule: time policy stopped");
    }
}
