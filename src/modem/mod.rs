pub mod control;
pub mod engine;
pub mod error;
pub mod line;

pub use control::ModuleControl;
pub use engine::{CommandEngine, Completion, Response};
pub use error::{ModemError, ModemResult};
pub use line::{FinalResult, Line};

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

/// The one command engine, shared by every role that talks to the modem.
///
/// Holding the guard is what makes the modem "busy": multi-step choreographies keep
/// it for their whole duration, and the passive listener only polls via
/// [`SharedModem::try_lock`].
#[derive(Clone)]
pub struct SharedModem {
    engine: Arc<Mutex<CommandEngine>>,
}

impl SharedModem {
    pub fn new(engine: CommandEngine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, CommandEngine> {
        crate::lock(&self.engine)
    }

    /// `None` while another caller is mid-exchange.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, CommandEngine>> {
        match self.engine.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    pub fn execute(&self, command: &str, expected: &str, timeout: Duration) -> bool {
        self.lock().execute(command, expected, timeout)
    }
}
