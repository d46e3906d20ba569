//! Crate-wide error type.

use std::fmt;

/// Everything that can go wrong talking to a board.
///
/// Mirrors the numeric-status convention of the original driver: every
/// variant has a small stable [`DaqError::code`] for callers that want to
/// log or branch on a number rather than match the enum.
#[derive(Debug)]
pub enum DaqError {
    /// A `read`/`write`/`ioctl` on the device node returned short or failed.
    Io(std::io::Error),
    /// The exclusive advisory lock on a device node could not be acquired.
    DeviceBusy,
    /// `master_path` and `slave_path` both identify boards that report the
    /// same master/slave flag in their firmware-version register.
    IdentityMismatch { expected_master: bool, board: &'static str },
    /// ADC lane-delay calibration exhausted its retry budget.
    CalibrationFailed,
    /// A register echoed an address other than the one requested.
    RegisterEcho { requested: u8, echoed: u8 },
    /// GPIO line could not be requested or driven.
    Gpio(String),
    /// Caller asked for a slave-only operation on a device with no slave.
    NoSlave,
}

impl fmt::Display for DaqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaqError::Io(e) => write!(f, "I/O error: {e}"),
            DaqError::DeviceBusy => write!(f, "device node is locked by another process"),
            DaqError::IdentityMismatch { expected_master, board } => write!(
                f,
                "{board} board identifies as {}, expected {}",
                if *expected_master { "slave" } else { "master" },
                if *expected_master { "master" } else { "slave" },
            ),
            DaqError::CalibrationFailed => write!(f, "ADC lane-delay calibration exhausted its retry budget"),
            DaqError::RegisterEcho { requested, echoed } => {
                write!(f, "register echo mismatch: requested {requested:#04x}, got {echoed:#04x}")
            }
            DaqError::Gpio(msg) => write!(f, "GPIO error: {msg}"),
            DaqError::NoSlave => write!(f, "operation requires a slave board but none is configured"),
        }
    }
}

impl std::error::Error for DaqError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DaqError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DaqError {
    fn from(e: std::io::Error) -> Self {
        DaqError::Io(e)
    }
}

impl DaqError {
    /// Stable small-integer status code, for FFI/C-ABI-style callers.
    pub fn code(&self) -> i32 {
        match self {
            DaqError::Io(_) => 1,
            DaqError::DeviceBusy => 2,
            DaqError::IdentityMismatch { .. } => 3,
            DaqError::CalibrationFailed => 4,
            DaqError::RegisterEcho { .. } => 5,
            DaqError::Gpio(_) => 6,
            DaqError::NoSlave => 7,
        }
    }
}

/// Outcome of a [`crate::device::Device::wait`] call.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum WaitOutcome {
    /// At least one buffer is ready; carries the ready mask.
    Ready(u8),
    /// Another wait was already in progress on this handle.
    Busy,
    /// The wait was cancelled via [`crate::device::Device::cancel_wait`].
    Cancelled,
    /// The timeout elapsed with no buffer becoming ready.
    TimedOut,
}
