use crate::battery::BatteryMonitor;
use crate::config::TrackerConfig;
use crate::gps::{EpochAdjustment, GpsSession};
use crate::indicator::{Indicator, IndicatorRequest, Signal};
use crate::link_monitor::LinkMonitor;
use crate::modem::{CommandEngine, ModuleControl, SharedModem};
use crate::mqtt::MqttSession;
use crate::platform::{AnalogInput, DigitalLine, Transport};
use crate::publisher::{Publisher, PublisherCommand};
use crate::schedule::{ActiveHours, ClockSync, TimePolicy};
use crate::secure::{CredentialStore, SecureContext};
use crate::supervisor::Supervisor;
use anyhow::Result;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Everything the board provides to the tracker.
pub struct Hardware {
    pub transport: Box<dyn Transport>,
    pub power_line: Box<dyn DigitalLine>,
    pub measure_line: Box<dyn DigitalLine>,
    pub led_line: Box<dyn DigitalLine>,
    pub adc: Box<dyn AnalogInput>,
}

/// Shared services, built once at startup and handed to every worker.
pub struct AppContext {
    pub config: TrackerConfig,
    pub modem: SharedModem,
    pub module: ModuleControl,
    pub gps: GpsSession,
    pub ssl: SecureContext,
    pub mqtt: MqttSession,
    pub battery: BatteryMonitor,
    pub indicator: IndicatorRequest,
    pub hours: ActiveHours,
    pub clock: ClockSync,
    credentials: Option<Box<dyn CredentialStore>>,
}

impl AppContext {
    /// Wire up the services. The LED renderer is returned separately since it runs
    /// on its own thread and owns its line.
    pub fn new(
        config: TrackerConfig,
        hardware: Hardware,
        credentials: Option<Box<dyn CredentialStore>>,
    ) -> (Self, Indicator) {
        let timeouts = config.timeouts;
        let modem = SharedModem::new(CommandEngine::new(hardware.transport, config.engine));
        let adjustment = EpochAdjustment {
            offset_secs: config.gps.epoch_offset_secs,
        };

        let indicator = Indicator::new(
            hardware.led_line,
            Duration::from_millis(config.schedule.indicator_pulse_ms),
        );
        let ctx = Self {
            module: ModuleControl::new(modem.clone(), hardware.power_line, timeouts),
            gps: GpsSession::new(modem.clone(), timeouts, adjustment),
            ssl: SecureContext::new(modem.clone(), timeouts),
            mqtt: MqttSession::new(modem.clone(), timeouts, config.broker.client_id.as_str()),
            battery: BatteryMonitor::new(hardware.measure_line, hardware.adc, config.battery.clone()),
            indicator: IndicatorRequest::new(),
            hours: ActiveHours::default(),
            clock: ClockSync::new(),
            modem,
            credentials,
            config,
        };
        (ctx, indicator)
    }

    /// Bring the TLS context and broker session up from whatever state the modem is in.
    pub fn establish_link(&self) -> bool {
        info!("Link: establishing broker session");
        let names = &self.config.credentials;

        let present = match &self.credentials {
            Some(store) => self.ssl.provision_missing(names, &**store),
            None => self.ssl.check_presence(names),
        };
        if present {
            info!("✅ SSL: certificates present");
        } else {
            error!("❌ SSL: certificates not found");
        }

        if self.ssl.configure(names) {
            info!("✅ SSL: configured");
        } else {
            error!("❌ SSL: configuration failed");
        }

        self.mqtt.begin();
        self.mqtt.acquire_client();
        self.mqtt.set_ssl_context();
        // Clears a session left over from before a restart.
        self.mqtt.disconnect();

        let broker = &self.config.broker;
        let connected = self.mqtt.connect(broker.server.as_str(), broker.port);
        self.indicator.signal(if connected {
            Signal::Healthy
        } else {
            Signal::Fault
        });
        connected
    }
}

/// Handles on the background threads.
pub struct Workers {
    running: Arc<AtomicBool>,
    publisher: Sender<PublisherCommand>,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    pub fn spawn(ctx: Arc<AppContext>, mut indicator: Indicator) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel();
        let mut handles = Vec::new();

        {
            let ctx = Arc::clone(&ctx);
            let running = Arc::clone(&running);
            handles.push(
                std::thread::Builder::new()
                    .stack_size(4096)
                    .name("indicator".to_string())
                    .spawn(move || indicator.run(&ctx.indicator, &running))?,
            );
        }

        {
            let ctx = Arc::clone(&ctx);
            let running = Arc::clone(&running);
            handles.push(
                std::thread::Builder::new()
                    .stack_size(4096)
                    .name("time_policy".to_string())
                    .spawn(move || {
                        let policy = TimePolicy {
                            clock: &ctx.clock,
                            hours: &ctx.hours,
                            window: ctx.config.active_window,
                        };
                        let interval =
                            Duration::from_millis(ctx.config.schedule.time_policy_interval_ms);
                        policy.run(&running, interval);
                    })?,
            );
        }

        {
            let publisher = Publisher::new(Arc::clone(&ctx), rx);
            handles.push(
                std::thread::Builder::new()
                    .stack_size(24576)
                    .name("publisher".to_string())
                    .spawn(move || publisher.run())?,
            );
        }

        {
            let mut supervisor = Supervisor::new(Arc::clone(&ctx), tx.clone());
            let running = Arc::clone(&running);
            handles.push(
                std::thread::Builder::new()
                    .stack_size(12288)
                    .name("supervisor".to_string())
                    .spawn(move || supervisor.run(&running))?,
            );
        }

        if ctx.config.schedule.link_monitor {
            let monitor = LinkMonitor::new(Arc::clone(&ctx), tx.clone());
            let running = Arc::clone(&running);
            handles.push(
                std::thread::Builder::new()
                    .stack_size(8192)
                    .name("link_monitor".to_string())
                    .spawn(move || monitor.run(&running))?,
            );
        }

        info!("✅ {} workers running", handles.len());
        Ok(Self {
            running,
            publisher: tx,
            handles,
        })
    }

    /// Stop every worker and wait for it to exit.
    pub fn shutdown(self) {
        info!("Stopping workers");
        self.running.store(false, Ordering::Relaxed);
        if self.publisher.send(PublisherCommand::Stop).is_err() {
            warn!("Publisher already stopped");
        }
        for handle in self.handles {
            let name = handle.thread().name().unwrap_or("?").to_string();
            if handle.join().is_err() {
                error!("❌ Worker '{}' panicked", name);
            }
        }
    }
}
