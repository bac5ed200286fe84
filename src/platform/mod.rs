//! Hardware seams used by the tracker core.
//!
//! The modem UART, the digital control lines and the battery ADC are reached only
//! through these traits, so everything above this module runs unchanged on the
//! ESP32 and in host unit tests.

use crate::modem::ModemResult;
use std::time::Duration;

#[cfg(target_os = "espidf")]
pub mod esp;
#[cfg(test)]
pub mod mock;

/// Duplex byte stream to the modem.
pub trait Transport: Send {
    /// Write every byte or fail.
    fn write_all(&mut self, bytes: &[u8]) -> ModemResult<()>;

    /// Read whatever arrives within `timeout`. `Ok(0)` means nothing arrived.
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> ModemResult<usize>;
}

/// Active-high digital output (module power, measurement enable, LED).
pub trait DigitalLine: Send {
    fn set_level(&mut self, high: bool) -> anyhow::Result<()>;
}

impl<P> DigitalLine for P
where
    P: embedded_hal::digital::v2::OutputPin + Send,
    P::Error: core::fmt::Debug,
{
    fn set_level(&mut self, high: bool) -> anyhow::Result<()> {
        let result = if high { self.set_high() } else { self.set_low() };
        result.map_err(|e| anyhow::anyhow!("GPIO error: {:?}", e))
    }
}

/// Analog input feeding the battery divider.
pub trait AnalogInput: Send {
    fn read_millivolts(&mut self) -> anyhow::Result<u32>;
}
