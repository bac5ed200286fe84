//! Decoding of the positional `+CGNSSINFO` / `+CGPSINFO` records.

use chrono::{Datelike, NaiveDate, NaiveDateTime};

pub const KNOTS_TO_KMH: f64 = 1.852;

/// Seconds between 1970-01-01 and 2000-01-01. Toolchains whose `time_t` counts
/// from 2000 need this added to line up with Unix time.
pub const Y2K_EPOCH_OFFSET_SECS: i64 = 946_684_800;

/// Opt-in correction added to every decoded epoch value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EpochAdjustment {
    pub offset_secs: i64,
}

impl EpochAdjustment {
    pub const NONE: Self = Self { offset_secs: 0 };
    pub const Y2K: Self = Self {
        offset_secs: Y2K_EPOCH_OFFSET_SECS,
    };

    pub fn apply(self, epoch: i64) -> i64 {
        epoch + self.offset_secs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Multi-constellation: 16 fields
    Gnss,
    /// GPS only: 9 fields
    Gps,
}

impl RecordKind {
    pub fn from_gnss_flag(use_gnss: bool) -> Self {
        if use_gnss {
            RecordKind::Gnss
        } else {
            RecordKind::Gps
        }
    }

    pub fn query(self) -> &'static str {
        match self {
            RecordKind::Gnss => "AT+CGNSSINFO",
            RecordKind::Gps => "AT+CGPSINFO",
        }
    }

    pub fn header(self) -> &'static str {
        match self {
            RecordKind::Gnss => "+CGNSSINFO:",
            RecordKind::Gps => "+CGPSINFO:",
        }
    }

    pub fn field_count(self) -> usize {
        match self {
            RecordKind::Gnss => 16,
            RecordKind::Gps => 9,
        }
    }

    /// Index of the latitude field; everything after it is shared by both layouts.
    fn position_offset(self) -> usize {
        match self {
            RecordKind::Gnss => 4,
            RecordKind::Gps => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Satellites {
    pub gps: u8,
    pub glonass: u8,
    pub beidou: u8,
}

/// Dilution of precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dop {
    pub pdop: f64,
    pub hdop: f64,
    pub vdop: f64,
}

/// One decoded positioning solution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    /// Fix mode code (multi-constellation only)
    pub fix_mode: Option<u8>,
    pub satellites: Option<Satellites>,
    /// Decimal degrees, negative south
    pub latitude: f64,
    /// Decimal degrees, negative west
    pub longitude: f64,
    /// Meters
    pub altitude: f64,
    pub speed_kmh: f64,
    /// Degrees
    pub course: f64,
    pub dop: Option<Dop>,
    /// UTC calendar time reported by the receiver
    pub time: NaiveDateTime,
    /// Epoch seconds of `time`, after any [`EpochAdjustment`]
    pub timestamp: i64,
}

impl Fix {
    /// Zero-based month, as calendar structures count it.
    pub fn month0(&self) -> u32 {
        self.time.month0()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixError {
    /// The receiver is not running.
    NotOn,
    /// No record line came back.
    MissingRecord,
    /// The record starts with a delimiter.
    NoFix,
    FieldCount { expected: usize, found: usize },
    InvalidField(&'static str),
    InvalidHemisphere(String),
    InvalidDateTime,
}

impl std::fmt::Display for FixError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FixError::NotOn => write!(f, "GPS is not on"),
            FixError::MissingRecord => write!(f, "no position record received"),
            FixError::NoFix => write!(f, "no fix"),
            FixError::FieldCount { expected, found } => {
                write!(f, "expected {} fields, found {}", expected, found)
            }
            FixError::InvalidField(name) => write!(f, "invalid {} field", name),
            FixError::InvalidHemisphere(h) => write!(f, "invalid hemisphere '{}'", h),
            FixError::InvalidDateTime => write!(f, "invalid date/time"),
        }
    }
}

impl std::error::Error for FixError {}

/// `ddmm.mmmmm` plus hemisphere letter to signed decimal degrees.
pub fn degrees(raw: f64, hemisphere: &str) -> Result<f64, FixError> {
    let value = (raw / 100.0).floor() + (raw % 100.0) / 60.0;
    match hemisphere {
        "N" | "E" => Ok(value),
        "S" | "W" => Ok(-value),
        other => Err(FixError::InvalidHemisphere(other.to_string())),
    }
}

pub fn knots_to_kmh(knots: f64) -> f64 {
    knots * KNOTS_TO_KMH
}

/// Combine `ddmmyy` and `hhmmss.s` into a UTC calendar time. Two-digit years are
/// in the 2000s; fractional seconds are dropped.
pub fn calendar(date: &str, time: &str) -> Result<NaiveDateTime, FixError> {
    let date: u32 = date.parse().map_err(|_| FixError::InvalidField("date"))?;
    let time: f64 = time.parse().map_err(|_| FixError::InvalidField("time"))?;
    if !(0.0..240_000.0).contains(&time) {
        return Err(FixError::InvalidDateTime);
    }
    let time = time.floor() as u32;

    let year = 2000 + (date % 100) as i32;
    let month = (date / 100) % 100;
    let day = date / 10_000;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(time / 10_000, (time / 100) % 100, time % 100))
        .ok_or(FixError::InvalidDateTime)
}

fn number(field: &str, name: &'static str) -> Result<f64, FixError> {
    field.trim().parse().map_err(|_| FixError::InvalidField(name))
}

fn count(field: &str, name: &'static str) -> Result<u8, FixError> {
    field.trim().parse().map_err(|_| FixError::InvalidField(name))
}

/// Decode the record text that follows the `+CGNSSINFO: ` / `+CGPSINFO: ` header.
///
/// Fields are positional and none is optional. The field count is checked before
/// any field is read; extra trailing fields are ignored.
pub fn parse_record(
    record: &str,
    kind: RecordKind,
    adjustment: EpochAdjustment,
) -> Result<Fix, FixError> {
    let record = record.trim();
    if record.is_empty() || record.starts_with(',') {
        return Err(FixError::NoFix);
    }

    let fields: Vec<&str> = record.split(',').map(str::trim).collect();
    if fields.len() < kind.field_count() {
        return Err(FixError::FieldCount {
            expected: kind.field_count(),
            found: fields.len(),
        });
    }

    let (fix_mode, satellites, dop) = match kind {
        RecordKind::Gnss => (
            Some(count(fields[0], "fix mode")?),
            Some(Satellites {
                gps: count(fields[1], "GPS satellites")?,
                glonass: count(fields[2], "GLONASS satellites")?,
                beidou: count(fields[3], "BeiDou satellites")?,
            }),
            Some(Dop {
                pdop: number(fields[13], "PDOP")?,
                hdop: number(fields[14], "HDOP")?,
                vdop: number(fields[15], "VDOP")?,
            }),
        ),
        RecordKind::Gps => (None, None, None),
    };

    let p = &fields[kind.position_offset()..];
    let latitude = degrees(number(p[0], "latitude")?, p[1])?;
    let longitude = degrees(number(p[2], "longitude")?, p[3])?;
    let time = calendar(p[4], p[5])?;

    Ok(Fix {
        fix_mode,
        satellites,
        latitude,
        longitude,
        altitude: number(p[6], "altitude")?,
        speed_kmh: knots_to_kmh(number(p[7], "speed")?),
        course: number(p[8], "course")?,
        dop,
        time,
        timestamp: adjustment.apply(time.and_utc().timestamp()),
    })
}
