use crate::config::BatteryConfig;
use crate::platform::{AnalogInput, DigitalLine};
use anyhow::Result;
use log::debug;
use std::sync::Mutex;
use std::time::Duration;

struct Probe {
    enable: Box<dyn DigitalLine>,
    adc: Box<dyn AnalogInput>,
}

/// Switched voltage divider on the battery pack.
pub struct BatteryMonitor {
    probe: Mutex<Probe>,
    last: Mutex<Option<f64>>,
    config: BatteryConfig,
}

impl BatteryMonitor {
    pub fn new(enable: Box<dyn DigitalLine>, adc: Box<dyn AnalogInput>, config: BatteryConfig) -> Self {
        Self {
            probe: Mutex::new(Probe { enable, adc }),
            last: Mutex::new(None),
            config,
        }
    }

    /// Enable the divider, let it settle, sample, disable. Returns pack volts.
    pub fn sample(&self) -> Result<f64> {
        let mut probe = crate::lock(&self.probe);
        probe.enable.set_level(true)?;
        std::thread::sleep(Duration::from_millis(self.config.settle_ms));
        let reading = probe.adc.read_millivolts();
        // Always switch the divider off again, even if the read failed.
        probe.enable.set_level(false)?;

        let millivolts = reading?;
        let volts = self.pack_volts(millivolts);
        debug!("Battery: {} mV at pin -> {:.3} V", millivolts, volts);
        *crate::lock(&self.last) = Some(volts);
        Ok(volts)
    }

    /// Most recent successful sample, if any.
    pub fn last_reading(&self) -> Option<f64> {
        *crate::lock(&self.last)
    }

    pub fn pack_volts(&self, pin_millivolts: u32) -> f64 {
        self.config.divider_slope * (f64::from(pin_millivolts) / 1000.0) + self.config.offset_volts
    }

    pub fn is_low(&self, volts: f64) -> bool {
        volts < self.config.low_threshold()
    }
}
