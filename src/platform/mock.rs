//! Test doubles for the hardware seams.

use super::{AnalogInput, Transport};
use crate::app::{AppContext, Hardware};
use crate::config::{EngineConfig, ScheduleConfig, Timeouts, TrackerConfig};
use crate::indicator::Indicator;
use crate::modem::{CommandEngine, ModemResult, SharedModem};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Rule {
    input: Vec<u8>,
    reply: Vec<u8>,
}

#[derive(Default)]
struct Script {
    rules: VecDeque<Rule>,
    pending: Vec<u8>,
    rx: VecDeque<u8>,
    sent: Vec<String>,
}

/// Scripted modem: each expected input (a command line or a raw upload) releases a
/// canned reply. Anything unscripted gets no reply, so the exchange times out.
#[derive(Clone, Default)]
pub struct ScriptedModem {
    script: Arc<Mutex<Script>>,
}

impl ScriptedModem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to the next `command` (sent with a trailing `\r`).
    pub fn on(&self, command: &str, reply: &str) -> &Self {
        let mut input = command.as_bytes().to_vec();
        input.push(b'\r');
        self.push_rule(input, reply);
        self
    }

    /// Reply once `bytes` have been streamed without a terminator.
    pub fn on_raw(&self, bytes: &str, reply: &str) -> &Self {
        self.push_rule(bytes.as_bytes().to_vec(), reply);
        self
    }

    /// Inject text the modem sends on its own.
    pub fn unsolicited(&self, text: &str) {
        self.script.lock().unwrap().rx.extend(text.bytes());
    }

    /// Everything written so far, one entry per command or raw upload.
    pub fn sent(&self) -> Vec<String> {
        self.script.lock().unwrap().sent.clone()
    }

    pub fn sent_count(&self, prefix: &str) -> usize {
        self.sent().iter().filter(|s| s.starts_with(prefix)).count()
    }

    fn push_rule(&self, input: Vec<u8>, reply: &str) {
        self.script.lock().unwrap().rules.push_back(Rule {
            input,
            reply: reply.as_bytes().to_vec(),
        });
    }
}

impl Transport for ScriptedModem {
    fn write_all(&mut self, bytes: &[u8]) -> ModemResult<()> {
        let mut script = self.script.lock().unwrap();
        script.pending.extend_from_slice(bytes);

        loop {
            let matched = match script.rules.front() {
                Some(rule) => script.pending.starts_with(&rule.input),
                None => false,
            };
            if matched {
                let rule = script.rules.pop_front().unwrap();
                script.pending.drain(..rule.input.len());
                let text = String::from_utf8_lossy(&rule.input);
                script.sent.push(text.trim_end_matches('\r').to_string());
                script.rx.extend(rule.reply);
                continue;
            }
            // Unscripted command line: record it and stay silent.
            if let Some(end) = script.pending.iter().position(|&b| b == b'\r') {
                let line: Vec<u8> = script.pending.drain(..=end).collect();
                let text = String::from_utf8_lossy(&line[..end]).to_string();
                script.sent.push(text);
                continue;
            }
            break;
        }
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> ModemResult<usize> {
        let count = {
            let mut script = self.script.lock().unwrap();
            let count = buffer.len().min(script.rx.len());
            for (slot, byte) in buffer.iter_mut().zip(script.rx.drain(..count)) {
                *slot = byte;
            }
            count
        };
        if count == 0 {
            std::thread::sleep(timeout.min(Duration::from_millis(1)));
        }
        Ok(count)
    }
}

/// Output line that records every level it is driven to.
#[derive(Clone, Default)]
pub struct MockLine {
    levels: Arc<Mutex<Vec<bool>>>,
}

impl MockLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn levels(&self) -> Vec<bool> {
        self.levels.lock().unwrap().clone()
    }

    /// Number of low-to-high edges seen.
    pub fn rising_edges(&self) -> usize {
        let levels = self.levels();
        let mut previous = false;
        let mut edges = 0;
        for level in levels {
            if level && !previous {
                edges += 1;
            }
            previous = level;
        }
        edges
    }
}

impl embedded_hal::digital::v2::OutputPin for MockLine {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.levels.lock().unwrap().push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.levels.lock().unwrap().push(true);
        Ok(())
    }
}

/// Pin reading that puts the pack at about 7.5 V.
pub const HEALTHY_MV: u32 = 1300;
/// Pin reading that puts the pack at about 5.8 V, below the shutdown threshold.
pub const LOW_MV: u32 = 1000;

/// ADC returning an adjustable reading.
#[derive(Clone)]
pub struct MockAdc {
    millivolts: Arc<Mutex<u32>>,
    failing: Arc<AtomicBool>,
}

impl MockAdc {
    pub fn new(millivolts: u32) -> Self {
        Self {
            millivolts: Arc::new(Mutex::new(millivolts)),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set(&self, millivolts: u32) {
        *self.millivolts.lock().unwrap() = millivolts;
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }
}

impl AnalogInput for MockAdc {
    fn read_millivolts(&mut self) -> anyhow::Result<u32> {
        if self.failing.load(Ordering::Relaxed) {
            anyhow::bail!("ADC read failed");
        }
        Ok(*self.millivolts.lock().unwrap())
    }
}

/// Millisecond-scale budgets so timeouts in tests stay cheap.
pub fn fast_timeouts() -> Timeouts {
    Timeouts {
        standard_ms: 40,
        extended_ms: 60,
        connect_ms: 60,
        publish_ms: 60,
        prompt_ms: 30,
        release_ms: 30,
        query_ms: 40,
        boot_ms: 60,
    }
}

pub fn fast_engine() -> EngineConfig {
    EngineConfig {
        settle_ms: 0,
        idle_gap_ms: 5,
        poll_slice_ms: 2,
    }
}

/// Engine over a fresh scripted modem.
pub fn scripted_modem() -> (SharedModem, ScriptedModem) {
    let script = ScriptedModem::new();
    let engine = CommandEngine::new(Box::new(script.clone()), fast_engine());
    (SharedModem::new(engine), script)
}

/// Defaults with every delay shrunk to milliseconds.
pub fn fast_config() -> TrackerConfig {
    let mut config = TrackerConfig {
        timeouts: fast_timeouts(),
        engine: fast_engine(),
        schedule: ScheduleConfig {
            supervisor_interval_ms: 10,
            publish_interval_ms: 10,
            shutdown_signal_interval_ms: 10,
            power_off_delay_ms: 0,
            indicator_pulse_ms: 0,
            time_policy_interval_ms: 10,
            link_poll_interval_ms: 5,
            link_listen_ms: 2,
            link_monitor: true,
        },
        ..TrackerConfig::default()
    };
    config.battery.settle_ms = 0;
    config.broker.server = heapless::String::try_from("tcp://broker").unwrap();
    config
}

/// Handles on every mocked peripheral behind a [`mock_context`].
pub struct MockRig {
    pub script: ScriptedModem,
    pub power: MockLine,
    pub measure: MockLine,
    pub led: MockLine,
    pub adc: MockAdc,
    pub indicator: Indicator,
}

/// Full application context over mocks: healthy battery, active hours, no credential store.
pub fn mock_context() -> (Arc<AppContext>, MockRig) {
    let script = ScriptedModem::new();
    let power = MockLine::new();
    let measure = MockLine::new();
    let led = MockLine::new();
    let adc = MockAdc::new(HEALTHY_MV);

    let hardware = Hardware {
        transport: Box::new(script.clone()),
        power_line: Box::new(power.clone()),
        measure_line: Box::new(measure.clone()),
        led_line: Box::new(led.clone()),
        adc: Box::new(adc.clone()),
    };
    let (ctx, indicator) = AppContext::new(fast_config(), hardware, None);

    (
        Arc::new(ctx),
        MockRig {
            script,
            power,
            measure,
            led,
            adc,
            indicator,
        },
    )
}
