use super::SharedModem;
use crate::config::Timeouts;
use crate::platform::DigitalLine;
use log::{info, warn};
use std::sync::Mutex;

/// Power line plus the module-level one-shot commands.
pub struct ModuleControl {
    modem: SharedModem,
    power_line: Mutex<Box<dyn DigitalLine>>,
    timeouts: Timeouts,
}

impl ModuleControl {
    pub fn new(modem: SharedModem, power_line: Box<dyn DigitalLine>, timeouts: Timeouts) -> Self {
        Self {
            modem,
            power_line: Mutex::new(power_line),
            timeouts,
        }
    }

    pub fn echo_off(&self) -> bool {
        self.modem.execute("ATE0", "OK", self.timeouts.standard())
    }

    pub fn reset(&self) -> bool {
        self.modem.execute("AT+CRESET", "OK", self.timeouts.standard())
    }

    pub fn shutdown(&self) -> bool {
        self.modem.execute("AT+CPOF", "OK", self.timeouts.standard())
    }

    /// Liveness probe; the power line itself is never read back.
    pub fn is_alive(&self) -> bool {
        self.modem.execute("AT", "OK", self.timeouts.standard())
    }

    /// Wait for the boot banner after power-up.
    pub fn wait_ready(&self) -> bool {
        self.modem.lock().await_token("PB DONE", self.timeouts.boot())
    }

    pub fn power_on(&self) {
        self.drive(true);
    }

    pub fn power_off(&self) {
        self.drive(false);
    }

    fn drive(&self, high: bool) {
        let mut line = crate::lock(&self.power_line);
        match line.set_level(high) {
            Ok(()) => info!("SIM7600: power line {}", if high { "HIGH" } else { "LOW" }),
            Err(e) => warn!("SIM7600: failed to drive power line: {:?}", e),
        }
    }
}
