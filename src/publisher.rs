use crate::app::AppContext;
use crate::gps::Fix;
use crate::indicator::Signal;
use anyhow::Result;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::value::RawValue;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// Module was just powered; wait for boot before touching it.
    PowerCycle,
    /// Broker link dropped while the module stayed up.
    LinkLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherCommand {
    Pause,
    Restart(RestartReason),
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Running,
    Paused,
    Restarting(RestartReason),
}

/// JSON document published for every fix. Key order is part of the wire format.
#[derive(Debug, Serialize)]
pub struct PositionReport {
    latitude: Box<RawValue>,
    longitude: Box<RawValue>,
    speed: Box<RawValue>,
    course: Box<RawValue>,
    timestamp: i64,
    battery: Box<RawValue>,
}

impl PositionReport {
    pub fn new(fix: &Fix, battery: f64) -> Result<Self> {
        Ok(Self {
            latitude: fixed(fix.latitude, 8)?,
            longitude: fixed(fix.longitude, 8)?,
            speed: fixed(fix.speed_kmh, 2)?,
            course: fixed(fix.course, 2)?,
            timestamp: fix.timestamp,
            battery: fixed(battery, 2)?,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Number with a fixed count of decimals, emitted verbatim.
fn fixed(value: f64, decimals: usize) -> Result<Box<RawValue>> {
    if !value.is_finite() {
        anyhow::bail!("non-finite value {} in report", value);
    }
    Ok(RawValue::from_string(format!("{:.*}", decimals, value))?)
}

/// Fix-and-publish loop.
///
/// Starts paused; the supervisor's first power-up sends `Restart(PowerCycle)`. The
/// command channel doubles as the cadence timer, so a command is acted on at the
/// latest one interval after it was sent.
pub struct Publisher {
    ctx: Arc<AppContext>,
    commands: Receiver<PublisherCommand>,
    state: PublisherState,
}

impl Publisher {
    pub fn new(ctx: Arc<AppContext>, commands: Receiver<PublisherCommand>) -> Self {
        Self {
            ctx,
            commands,
            state: PublisherState::Paused,
        }
    }

    pub fn state(&self) -> PublisherState {
        self.state
    }

    pub fn run(mut self) {
        info!("Publisher: started");
        let interval = Duration::from_millis(self.ctx.config.schedule.publish_interval_ms);

        loop {
            let command = match self.state {
                PublisherState::Restarting(reason) => {
                    if !self.restart(reason) {
                        break;
                    }
                    continue;
                }
                PublisherState::Running => {
                    self.publish_once();
                    match self.commands.recv_timeout(interval) {
                        Ok(command) => command,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                PublisherState::Paused => match self.commands.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                },
            };

            if !self.apply(command) {
                break;
            }
        }
        info!("Publisher: stopped");
    }

    /// Returns false on `Stop`.
    fn apply(&mut self, command: PublisherCommand) -> bool {
        debug!("Publisher: {:?} while {:?}", command, self.state);
        self.state = match (command, self.state) {
            (PublisherCommand::Stop, _) => return false,
            (PublisherCommand::Pause, _) => PublisherState::Paused,
            // The module is down; only a power cycle brings it back.
            (PublisherCommand::Restart(RestartReason::LinkLost), PublisherState::Paused) => {
                PublisherState::Paused
            }
            (PublisherCommand::Restart(reason), _) => PublisherState::Restarting(reason),
        };
        true
    }

    /// Bring the module back to publishing. Commands that arrive meanwhile are applied
    /// between steps and cut the restart short. Returns false on `Stop`.
    fn restart(&mut self, reason: RestartReason) -> bool {
        info!("Publisher: restarting ({:?})", reason);
        self.state = PublisherState::Running;
        match reason {
            RestartReason::PowerCycle => {
                if !self.ctx.module.wait_ready() {
                    warn!("❌ SIM7600: boot banner not seen");
                }
                if self.ctx.module.echo_off() {
                    info!("✅ SIM7600: echo off");
                } else {
                    warn!("❌ SIM7600: echo did not switch off");
                }
            }
            RestartReason::LinkLost => self.ctx.mqtt.teardown(),
        }

        if let Some(keep_running) = self.interrupted() {
            return keep_running;
        }
        self.ctx.establish_link();

        if let Some(keep_running) = self.interrupted() {
            return keep_running;
        }
        if self.ctx.gps.begin() {
            info!("✅ GPS: receiver on");
        } else {
            warn!("❌ GPS: receiver did not start");
        }

        self.interrupted().unwrap_or(true)
    }

    /// Apply queued commands without blocking. `Some` means the restart must stop
    /// here, carrying the loop's keep-running flag.
    fn interrupted(&mut self) -> Option<bool> {
        loop {
            match self.commands.try_recv() {
                Ok(command) => {
                    if !self.apply(command) {
                        return Some(false);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Some(false),
            }
        }
        if self.state == PublisherState::Running {
            None
        } else {
            info!("Publisher: restart superseded, now {:?}", self.state);
            Some(true)
        }
    }

    /// One decode/publish cycle; returns the signal it requested.
    pub fn publish_once(&self) -> Signal {
        let ctx = &self.ctx;
        let fix = if ctx.gps.decode(ctx.config.gps.use_gnss) {
            ctx.gps.fix()
        } else {
            None
        };
        let signal = match fix {
            Some(fix) => {
                ctx.clock.sync(fix.timestamp);
                if self.report(&fix) {
                    Signal::Healthy
                } else {
                    Signal::Fault
                }
            }
            None => Signal::NoFix,
        };
        ctx.indicator.signal(signal);
        signal
    }

    fn report(&self, fix: &Fix) -> bool {
        let ctx = &self.ctx;
        let battery = match ctx.battery.sample() {
            Ok(volts) => volts,
            Err(e) => match ctx.battery.last_reading() {
                Some(volts) => {
                    warn!("Publisher: battery sample failed, reusing {:.2} V: {:?}", volts, e);
                    volts
                }
                None => {
                    warn!("Publisher: no battery reading, report skipped: {:?}", e);
                    return false;
                }
            },
        };

        let payload = match PositionReport::new(fix, battery).and_then(|r| r.to_json()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Publisher: could not build report: {:?}", e);
                return false;
            }
        };
        info!("Publisher: {}", payload);

        let topic = ctx.config.broker.topic.as_str();
        ctx.mqtt.stage_topic_and_payload(topic, &payload) && ctx.mqtt.publish()
    }
}
