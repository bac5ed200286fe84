use super::fix::{parse_record, EpochAdjustment, Fix, FixError, RecordKind};
use crate::config::Timeouts;
use crate::modem::{Completion, SharedModem};
use log::{info, warn};
use std::sync::Mutex;

/// GPS receiver lifecycle and fix decoding.
///
/// The receiver state is never cached: every lifecycle decision asks the modem.
pub struct GpsSession {
    modem: SharedModem,
    timeouts: Timeouts,
    adjustment: EpochAdjustment,
    fix: Mutex<Option<Fix>>,
}

impl GpsSession {
    pub fn new(modem: SharedModem, timeouts: Timeouts, adjustment: EpochAdjustment) -> Self {
        Self {
            modem,
            timeouts,
            adjustment,
            fix: Mutex::new(None),
        }
    }

    pub fn is_on(&self) -> bool {
        self.modem
            .execute("AT+CGPS?", "+CGPS: 1,1", self.timeouts.standard())
    }

    pub fn begin(&self) -> bool {
        if self.is_on() {
            return true;
        }

        info!("GPS: starting receiver");
        if !self
            .modem
            .execute("AT+CGPS=1", "OK", self.timeouts.extended())
        {
            warn!("❌ GPS: enable not acknowledged");
            return false;
        }

        // The acknowledgment alone is not trusted.
        self.is_on()
    }

    pub fn stop(&self) -> bool {
        if !self.is_on() {
            return true;
        }

        self.modem
            .lock()
            .exchange(
                "AT+CGPS=0",
                "+CGPS: 0",
                self.timeouts.standard(),
                Completion::Token,
            )
            .matched
    }

    pub fn cold_start(&self) -> bool {
        self.restart("AT+CGPSCOLD")
    }

    pub fn hot_start(&self) -> bool {
        self.restart("AT+CGPSHOT")
    }

    fn restart(&self, command: &str) -> bool {
        if self.is_on() && !self.stop() {
            warn!("❌ GPS: could not stop receiver before {}", command);
            return false;
        }
        self.modem.execute(command, "OK", self.timeouts.standard())
    }

    /// Query and decode one fix. On failure the stored fix is left untouched.
    pub fn decode(&self, use_gnss: bool) -> bool {
        match self.read_fix(RecordKind::from_gnss_flag(use_gnss)) {
            Ok(fix) => {
                *crate::lock(&self.fix) = Some(fix);
                true
            }
            Err(FixError::NoFix) => {
                info!("GPS: no fix yet");
                false
            }
            Err(e) => {
                warn!("GPS: decode failed: {}", e);
                false
            }
        }
    }

    /// Last successfully decoded fix. Only fresh if the last `decode` returned true.
    pub fn fix(&self) -> Option<Fix> {
        *crate::lock(&self.fix)
    }

    fn read_fix(&self, kind: RecordKind) -> Result<Fix, FixError> {
        if !self.is_on() {
            return Err(FixError::NotOn);
        }

        let response = self.modem.lock().exchange(
            kind.query(),
            kind.header(),
            self.timeouts.query(),
            Completion::FinalResult,
        );
        let line = response.find(kind.header()).ok_or(FixError::MissingRecord)?;
        let record = line[kind.header().len()..].trim_start();
        parse_record(record, kind, self.adjustment)
    }
}
