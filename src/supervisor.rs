use crate::app::AppContext;
use crate::indicator::Signal;
use crate::publisher::{PublisherCommand, RestartReason};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
}

/// Battery and active-hours watchdog owning the module power line.
pub struct Supervisor {
    ctx: Arc<AppContext>,
    publisher: Sender<PublisherCommand>,
    state: PowerState,
}

impl Supervisor {
    pub fn new(ctx: Arc<AppContext>, publisher: Sender<PublisherCommand>) -> Self {
        Self {
            ctx,
            publisher,
            state: PowerState::Off,
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn run(&mut self, running: &AtomicBool) {
        info!("Supervisor: started");
        let interval = Duration::from_millis(self.ctx.config.schedule.supervisor_interval_ms);
        while running.load(Ordering::Relaxed) {
            self.tick(running);
            std::thread::sleep(interval);
        }
        info!("Supervisor: stopped");
    }

    /// One evaluation. If the module has to go down this blocks until it may come back
    /// (or `running` clears).
    pub fn tick(&mut self, running: &AtomicBool) {
        let volts = match self.ctx.battery.sample() {
            Ok(volts) => volts,
            Err(e) => {
                warn!("Supervisor: battery sample failed, skipping: {:?}", e);
                return;
            }
        };

        let low = self.ctx.battery.is_low(volts);
        let active = self.ctx.hours.is_active();
        if low || !active {
            if low {
                warn!("Supervisor: battery low ({:.2} V)", volts);
            } else {
                info!("Supervisor: outside active hours");
            }
            self.shut_down();
            if !self.wait_for_recovery(running) {
                return;
            }
        }

        self.power_up();
    }

    fn shut_down(&mut self) {
        self.send(PublisherCommand::Pause);

        if self.state == PowerState::On {
            self.ctx.mqtt.teardown();
            if !self.ctx.module.shutdown() {
                error!("❌ Supervisor: module did not acknowledge power off");
            }
            std::thread::sleep(Duration::from_millis(
                self.ctx.config.schedule.power_off_delay_ms,
            ));
        }

        self.ctx.module.power_off();
        self.state = PowerState::Off;
        self.ctx.indicator.signal(Signal::Fault);
        info!("Supervisor: module powered down");
    }

    /// Keep signalling the fault until active hours return and the battery is healthy.
    /// Returns false if asked to stop first.
    fn wait_for_recovery(&self, running: &AtomicBool) -> bool {
        let interval =
            Duration::from_millis(self.ctx.config.schedule.shutdown_signal_interval_ms);

        while running.load(Ordering::Relaxed) {
            let active = if self.ctx.hours.is_active() {
                std::thread::sleep(interval);
                true
            } else {
                self.ctx.hours.wait_for_change(false, interval)
            };

            if active {
                match self.ctx.battery.sample() {
                    Ok(volts) if !self.ctx.battery.is_low(volts) => {
                        info!("Supervisor: conditions recovered ({:.2} V)", volts);
                        return true;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Supervisor: battery sample failed: {:?}", e),
                }
            }
            self.ctx.indicator.signal(Signal::Fault);
        }
        false
    }

    fn power_up(&mut self) {
        if self.state == PowerState::On {
            return;
        }
        self.ctx.module.power_on();
        self.state = PowerState::On;
        info!("✅ Supervisor: module powered up");
        self.send(PublisherCommand::Restart(RestartReason::PowerCycle));
    }

    fn send(&self, command: PublisherCommand) {
        if self.publisher.send(command).is_err() {
            warn!("Supervisor: publisher is gone, dropped {:?}", command);
        }
    }
}
