pub mod fix;
pub mod session;

pub use fix::{EpochAdjustment, Fix, FixError, RecordKind};
pub use session::GpsSession;
