use log::error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_SERVER: &str = "tcp://your-aws-endpoint-here";

/// Bounded copy of a built-in default. Every default below fits its field.
fn bounded<const N: usize>(value: &'static str) -> heapless::String<N> {
    heapless::String::try_from(value).unwrap_or_default()
}

/// Build-time override of a default. An override too long for the field is logged
/// and the default kept.
fn overridden<const N: usize>(value: Option<&str>, default: &'static str) -> heapless::String<N> {
    match value.map(heapless::String::try_from) {
        Some(Ok(value)) => value,
        Some(Err(())) => {
            error!("Config: override longer than {} bytes ignored, using '{}'", N, default);
            bounded(default)
        }
        None => bounded(default),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Endpoint including the `tcp://` scheme the modem expects.
    pub server: heapless::String<128>,
    pub port: u16,
    pub client_id: heapless::String<32>,
    pub topic: heapless::String<64>,
}

/// Names under which the three TLS artifacts are stored on the modem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialNames {
    pub ca_cert: heapless::String<64>,
    pub client_cert: heapless::String<64>,
    pub client_key: heapless::String<64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    /// Voltage divider gain applied to the measured pin voltage
    pub divider_slope: f64,
    /// Fixed correction added after scaling (V)
    pub offset_volts: f64,
    /// Absolute minimum pack voltage (V)
    pub minimum_volts: f64,
    /// Margin above the minimum at which the module is shut down (V)
    pub margin_volts: f64,
    /// Delay between enabling the divider and sampling (ms)
    pub settle_ms: u64,
}

/// Response budgets per kind of exchange, in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub standard_ms: u64,
    /// GPS enable acknowledgment
    pub extended_ms: u64,
    pub connect_ms: u64,
    pub publish_ms: u64,
    /// `>` prompt of a staged upload
    pub prompt_ms: u64,
    pub release_ms: u64,
    /// Fix queries
    pub query_ms: u64,
    /// Boot banner after power-up
    pub boot_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Turnaround delay after every exchange (ms)
    pub settle_ms: u64,
    /// Silence that ends a time-bounded read (ms)
    pub idle_gap_ms: u64,
    /// Longest single UART read inside an exchange (ms)
    pub poll_slice_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub supervisor_interval_ms: u64,
    pub publish_interval_ms: u64,
    /// Fault indicator refresh while shut down
    pub shutdown_signal_interval_ms: u64,
    /// Pause between `AT+CPOF` and dropping the power line
    pub power_off_delay_ms: u64,
    pub indicator_pulse_ms: u64,
    pub time_policy_interval_ms: u64,
    pub link_poll_interval_ms: u64,
    /// How long the link monitor listens per poll
    pub link_listen_ms: u64,
    pub link_monitor: bool,
}

/// Hours (local time) during which the tracker operates. Equal start and end means
/// always active; `start > end` wraps past midnight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveWindow {
    pub start_hour: u8,
    pub end_hour: u8,
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    /// Query the multi-constellation record instead of GPS-only
    pub use_gnss: bool,
    /// Opt-in epoch correction added to decoded timestamps (s)
    pub epoch_offset_secs: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub broker: BrokerConfig,
    pub credentials: CredentialNames,
    pub battery: BatteryConfig,
    pub timeouts: Timeouts,
    pub engine: EngineConfig,
    pub schedule: ScheduleConfig,
    pub active_window: ActiveWindow,
    pub gps: GpsConfig,
}

impl TrackerConfig {
    /// Overlay a JSON document on the defaults; missing keys keep their default.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Timeouts {
    pub fn standard(&self) -> Duration {
        Duration::from_millis(self.standard_ms)
    }

    pub fn extended(&self) -> Duration {
        Duration::from_millis(self.extended_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn publish(&self) -> Duration {
        Duration::from_millis(self.publish_ms)
    }

    pub fn prompt(&self) -> Duration {
        Duration::from_millis(self.prompt_ms)
    }

    pub fn release(&self) -> Duration {
        Duration::from_millis(self.release_ms)
    }

    pub fn query(&self) -> Duration {
        Duration::from_millis(self.query_ms)
    }

    pub fn boot(&self) -> Duration {
        Duration::from_millis(self.boot_ms)
    }
}

impl EngineConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn idle_gap(&self) -> Duration {
        Duration::from_millis(self.idle_gap_ms)
    }

    pub fn poll_slice(&self) -> Duration {
        Duration::from_millis(self.poll_slice_ms)
    }
}

impl BatteryConfig {
    /// Below this the module is shut down.
    pub fn low_threshold(&self) -> f64 {
        self.minimum_volts + self.margin_volts
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            server: overridden(option_env!("TRACKER_BROKER_SERVER"), DEFAULT_SERVER),
            port: 8883,
            client_id: bounded("SIM7600_Test"),
            topic: bounded("sim7600/pub"),
        }
    }
}

impl Default for CredentialNames {
    fn default() -> Self {
        Self {
            ca_cert: bounded("Amazon-Root-Certificate-Filename"),
            client_cert: bounded("Thing-Certificate-Filename"),
            client_key: bounded("Private-Key-Filename"),
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            divider_slope: 5.70,
            offset_volts: 0.075,
            minimum_volts: 6.00,
            margin_volts: 0.3,
            settle_ms: 50,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            standard_ms: 3000,
            extended_ms: 7000,
            connect_ms: 5000,
            publish_ms: 5000,
            prompt_ms: 1000,
            release_ms: 1000,
            query_ms: 1000,
            boot_ms: 25000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settle_ms: 500,
            idle_gap_ms: 100,
            poll_slice_ms: 20,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            supervisor_interval_ms: 5000,
            publish_interval_ms: 5000,
            shutdown_signal_interval_ms: 2000,
            power_off_delay_ms: 200,
            indicator_pulse_ms: 100,
            time_policy_interval_ms: 1000,
            link_poll_interval_ms: 1000,
            link_listen_ms: 50,
            link_monitor: true,
        }
    }
}

impl Default for ActiveWindow {
    fn default() -> Self {
        Self {
            start_hour: 0,
            end_hour: 0,
            utc_offset_minutes: 0,
        }
    }
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            use_gnss: true,
            epoch_offset_secs: 0,
        }
    }
}
