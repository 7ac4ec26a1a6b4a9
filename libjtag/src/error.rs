use core::fmt;

use crate::jtag::Signal;

/// Reasons `Driver::cfg` refuses an allocation. A refused allocation
/// leaves the driver and the port untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CfgError {
    PinOutOfRange(u8),
    PinConflict { pin: u8, owner: Signal },
}

impl fmt::Display for CfgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CfgError::PinOutOfRange(pin) => write!(f, "pin {} is out of range", pin),
            CfgError::PinConflict { pin, owner } => {
                write!(f, "pin {} is already allocated to {}", pin, owner)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CfgError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainError {
    /// A zero shifted into IR-Shift never came out on TDO.
    IrLengthNotFound,
    /// TDO never went high while shifting ones through the bypass registers.
    NoDevices,
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::IrLengthNotFound => write!(f, "could not determine the IR length"),
            ChainError::NoDevices => write!(f, "no devices found on the chain"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ChainError {}

/// Reasons a console command is answered with an error reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandError {
    UnknownCommand,
    MissingParameter(&'static str),
    NotANumber(&'static str),
    InvalidSignal,
    InvalidState,
    InvalidMode,
    LevelOutOfRange { max: u8 },
    PinOutOfRange { max: u8 },
    PinCount { min: u8, max: u8 },
    Cfg(CfgError),
    Chain(ChainError),
    /// The reply could not be written.
    Output,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::UnknownCommand => write!(f, "unknown command, try help."),
            CommandError::MissingParameter(name) => write!(f, "missing parameter {}.", name),
            CommandError::NotANumber(name) => write!(f, "{} needs to be a number.", name),
            CommandError::InvalidSignal => write!(f, "invalid signal."),
            CommandError::InvalidState => write!(f, "invalid state."),
            CommandError::InvalidMode => write!(f, "invalid mode."),
            CommandError::LevelOutOfRange { max } => {
                write!(f, "Level must be between 0 and {} inclusive.", max)
            }
            CommandError::PinOutOfRange { max } => {
                write!(f, "Pin must be between 0 and {} inclusive.", max)
            }
            CommandError::PinCount { min, max } => write!(
                f,
                "At least {} pins are required for a scan. Max {}.",
                min, max
            ),
            CommandError::Cfg(e) => write!(f, "Configuration failed: {}.", e),
            CommandError::Chain(e) => {
                write!(f, "{}. Are the signal assignments correct?", e)
            }
            CommandError::Output => write!(f, "failed to write the reply"),
        }
    }
}

impl From<CfgError> for CommandError {
    fn from(e: CfgError) -> Self {
        CommandError::Cfg(e)
    }
}

impl From<ChainError> for CommandError {
    fn from(e: ChainError) -> Self {
        CommandError::Chain(e)
    }
}

impl From<fmt::Error> for CommandError {
    fn from(_: fmt::Error) -> Self {
        CommandError::Output
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CommandError {}
