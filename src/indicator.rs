use crate::platform::DigitalLine;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Blink patterns understood by the status LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Healthy = 1,
    NoFix = 2,
    Fault = 3,
}

impl Signal {
    pub fn blinks(self) -> u8 {
        self as u8
    }
}

/// Latest-value request slot: a newer request replaces an unconsumed older one.
#[derive(Default)]
pub struct IndicatorRequest {
    pending: Mutex<Option<u8>>,
    ready: Condvar,
}

impl IndicatorRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, blinks: u8) {
        let mut pending = crate::lock(&self.pending);
        *pending = Some(blinks);
        self.ready.notify_one();
    }

    pub fn signal(&self, signal: Signal) {
        self.request(signal.blinks());
    }

    pub fn try_take(&self) -> Option<u8> {
        crate::lock(&self.pending).take()
    }

    /// Wait up to `timeout` for a request and consume it.
    pub fn wait_take(&self, timeout: Duration) -> Option<u8> {
        let guard = crate::lock(&self.pending);
        let (mut guard, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |pending| pending.is_none())
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.take()
    }
}

/// Status LED renderer.
pub struct Indicator {
    line: Box<dyn DigitalLine>,
    pulse: Duration,
}

impl Indicator {
    pub fn new(line: Box<dyn DigitalLine>, pulse: Duration) -> Self {
        Self { line, pulse }
    }

    /// `blinks` pulses of one `pulse` on and one `pulse` off.
    pub fn render(&mut self, blinks: u8) {
        debug!("Indicator: {} blink(s)", blinks);
        for _ in 0..blinks {
            self.drive(true);
            std::thread::sleep(self.pulse);
            self.drive(false);
            std::thread::sleep(self.pulse);
        }
    }

    /// Render requests as they arrive until `running` clears. Starts with one blink.
    pub fn run(&mut self, requests: &IndicatorRequest, running: &AtomicBool) {
        info!("Indicator: started");
        requests.signal(Signal::Healthy);
        while running.load(Ordering::Relaxed) {
            if let Some(blinks) = requests.wait_take(Duration::from_millis(250)) {
                self.render(blinks);
            }
        }
        self.drive(false);
        info!("Indicator: stopped");
    }

    fn drive(&mut self, high: bool) {
        if let Err(e) = self.line.set_level(high) {
            warn!("Indicator: LED write failed: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MockLine;
    use std::sync::Arc;

    #[test]
    fn test_newer_request_replaces_older() {
        let requests = IndicatorRequest::new();
        requests.signal(Signal::Fault);
        requests.signal(Signal::Healthy);

        let line = MockLine::new();
        let mut indicator = Indicator::new(Box::new(line.clone()), Duration::ZERO);
        while let Some(blinks) = requests.try_take() {
            indicator.render(blinks);
        }
        assert_eq!(line.rising_edges(), 1);
    }

    #[test]
    fn test_render_pattern() {
        let line = MockLine::new();
        let mut indicator = Indicator::new(Box::new(line.clone()), Duration::ZERO);
        indicator.render(Signal::NoFix.blinks());
        assert_eq!(line.levels(), vec![true, false, true, false]);
    }

    #[test]
    fn test_wait_take_wakes_on_request() {
        let requests = Arc::new(IndicatorRequest::new());
        let writer = Arc::clone(&requests);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            writer.request(3);
        });
        assert_eq!(requests.wait_take(Duration::from_secs(5)), Some(3));
        handle.join().unwrap();
        assert_eq!(requests.wait_take(Duration::from_millis(5)), None);
    }

    #[test]
    fn test_run_renders_default_then_stops() {
        let requests = Arc::new(IndicatorRequest::new());
        let running = Arc::new(AtomicBool::new(true));
        let line = MockLine::new();
        let mut indicator = Indicator::new(Box::new(line.clone()), Duration::ZERO);

        let handle = {
            let requests = Arc::clone(&requests);
            let running = Arc::clone(&running);
            std::thread::spawn(move || indicator.run(&requests, &running))
        };
        std::thread::sleep(Duration::from_millis(50));
        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();

        assert_eq!(line.rising_edges(), 1);
    }
}
