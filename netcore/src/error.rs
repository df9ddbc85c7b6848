//! Error taxonomy. Kinds, not type names: every fallible public
//! entry point in this crate returns `Result<T, NetError>`.

use core::fmt;

/// A network engine error. Variants mirror 's taxonomy exactly:
/// `InvalidParameter` (pre-dispatch validation), `WrongState` (API called in
/// an incompatible FSM state), `Busy` (transient resource unavailability,
/// retry), `Error` (unrecoverable local failure, e.g. no route), `Timeout`
/// (probe/lease/connect deadline), `DriverError` (driver returned non-OK).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetError {
    InvalidParameter,
    WrongState,
    Busy,
    Error,
    Timeout,
    DriverError,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetError::InvalidParameter => "invalid parameter",
            NetError::WrongState => "wrong state",
            NetError::Busy => "busy",
            NetError::Error => "unrecoverable local failure",
            NetError::Timeout => "timeout",
            NetError::DriverError => "driver error",
        };
        f.write_str(s)
    }
}

impl core::error::Error for NetError {}

pub type NetResult<T> = Result<T, NetError>;

impl From<netcore_hal::DriverError> for NetError {
    fn from(_: netcore_hal::DriverError) -> Self {
        NetError::DriverError
    }
}
