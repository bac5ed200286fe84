//! ESP32 Cellular GPS Tracker Library
//!
//! This library drives a SIM7600 modem over AT commands: GPS fixes, a TLS MQTT
//! session to the broker, and battery/active-hours power supervision.

pub mod app;
pub mod battery;
pub mod config;
pub mod gps;
pub mod indicator;
pub mod link_monitor;
pub mod modem;
pub mod mqtt;
pub mod platform;
pub mod publisher;
pub mod schedule;
pub mod secure;
pub mod supervisor;

pub use app::{AppContext, Hardware, Workers};
pub use battery::BatteryMonitor;
pub use config::TrackerConfig;
pub use gps::{Fix, FixError, GpsSession};
pub use indicator::{Indicator, IndicatorRequest, Signal};
pub use modem::{CommandEngine, ModemError, ModemResult, ModuleControl, SharedModem};
pub use mqtt::{MqttSession, SessionState};
pub use publisher::{PositionReport, Publisher, PublisherCommand, RestartReason};
pub use secure::{CredentialKind, CredentialStore, SecureContext};
pub use supervisor::{PowerState, Supervisor};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock, recovering the data if another thread panicked while holding it.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
