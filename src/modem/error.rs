#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemError {
    /// The UART refused or truncated a write.
    WriteError,
    /// The UART reported a receive failure.
    ReadError,
    /// A single response line exceeded the receive buffer.
    LineOverflow,
}

impl std::fmt::Display for ModemError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ModemError::WriteError => write!(f, "Modem write error"),
            ModemError::ReadError => write!(f, "Modem read error"),
            ModemError::LineOverflow => write!(f, "Modem line overflow"),
        }
    }
}

impl std::error::Error for ModemError {}

pub type ModemResult<T> = Result<T, ModemError>;
