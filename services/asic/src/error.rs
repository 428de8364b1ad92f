//! # S-ASIC Errors
//!
//! Every operation reports synchronously to its caller. Nothing here aborts
//! the service; the only pushed notification is the fault signal.

use crate::host::HostError;

/// Result alias used throughout S-ASIC.
pub type AsicResult<T> = Result<T, AsicError>;

/// Error taxonomy an operator reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Usage bug: wrong index, wrong size, zero address
    Configuration,
    /// Out of vectors, translation space, slots or memory
    Exhaustion,
    /// Device detached underneath the caller
    DeviceAbsent,
    /// Bus error reported, waiting for acknowledgment
    Fault,
    /// Blocking wait cut short by a signal, caller may retry
    Interrupted,
    /// Non-blocking request with nothing to report
    WouldBlock,
    /// Request not supported by this device type
    Unsupported,
}

/// S-ASIC errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsicError {
    /// Window index outside 0..6
    InvalidWindow,
    /// Window exists but has no backing memory
    EmptyWindow,
    /// Mapping longer than the page-rounded window
    MappingTooLarge,
    /// Read or write buffer does not match the protocol size
    BadLength { expected: usize, actual: usize },
    /// Zero address or zero length for a DMA request
    InvalidDmaRequest,
    /// Vector index outside the negotiated range
    InvalidVector,
    /// Malformed argument not covered above
    InvalidArgument,
    /// Unknown control command
    UnknownCommand(u32),
    /// Request not supported by this device type
    NotSupported,
    /// No free minor number
    NoMinor,
    /// Session table for the device is full
    TooManySessions,
    /// Host could not produce a bus address
    TranslationFailed,
    /// Host could not map a window into user space
    MapFailed,
    /// Host refused resources during attach
    ResourceUnavailable,
    /// Minor number already bound to a device
    Busy,
    /// No device at that minor, or it was detached
    NoDevice,
    /// Bus error asserted; access suppressed until acknowledged
    Faulted,
    /// Woken by a pending signal before any event arrived
    Interrupted,
    /// Non-blocking read found no new events
    WouldBlock,
}

impl AsicError {
    /// Returns the class this error falls into.
    pub fn class(&self) -> ErrorClass {
        match self {
            AsicError::InvalidWindow
            | AsicError::EmptyWindow
            | AsicError::MappingTooLarge
            | AsicError::BadLength { .. }
            | AsicError::InvalidDmaRequest
            | AsicError::InvalidVector
            | AsicError::InvalidArgument
            | AsicError::UnknownCommand(_)
            | AsicError::Busy => ErrorClass::Configuration,
            AsicError::NotSupported => ErrorClass::Unsupported,
            AsicError::NoMinor
            | AsicError::TooManySessions
            | AsicError::TranslationFailed
            | AsicError::MapFailed
            | AsicError::ResourceUnavailable => ErrorClass::Exhaustion,
            AsicError::NoDevice => ErrorClass::DeviceAbsent,
            AsicError::Faulted => ErrorClass::Fault,
            AsicError::Interrupted => ErrorClass::Interrupted,
            AsicError::WouldBlock => ErrorClass::WouldBlock,
        }
    }

    /// Negative errno handed back across the syscall boundary.
    pub fn to_errno(&self) -> i32 {
        match self {
            AsicError::InvalidWindow
            | AsicError::EmptyWindow
            | AsicError::MappingTooLarge
            | AsicError::BadLength { .. }
            | AsicError::InvalidDmaRequest
            | AsicError::InvalidVector
            | AsicError::InvalidArgument => errno::EINVAL,
            AsicError::UnknownCommand(_) | AsicError::NotSupported => errno::ENOTTY,
            AsicError::NoMinor | AsicError::TooManySessions => errno::ENOSPC,
            AsicError::TranslationFailed | AsicError::ResourceUnavailable => errno::ENOMEM,
            AsicError::MapFailed => errno::EAGAIN,
            AsicError::Busy => errno::EBUSY,
            AsicError::NoDevice => errno::ENODEV,
            AsicError::Faulted => errno::EIO,
            AsicError::Interrupted => errno::ERESTARTSYS,
            AsicError::WouldBlock => errno::EAGAIN,
        }
    }

    /// True when the caller should simply reissue the request.
    pub fn is_restartable(&self) -> bool {
        matches!(self, AsicError::Interrupted | AsicError::WouldBlock)
    }
}

impl From<HostError> for AsicError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::NoVectors | HostError::NoMemory | HostError::Busy => {
                AsicError::ResourceUnavailable
            }
            HostError::AddressSpaceExhausted => AsicError::TranslationFailed,
            HostError::InvalidArgument => AsicError::InvalidArgument,
            HostError::Unsupported => AsicError::NotSupported,
            HostError::Io => AsicError::Faulted,
        }
    }
}

impl core::fmt::Display for AsicError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AsicError::InvalidWindow => write!(f, "Window index out of range"),
            AsicError::EmptyWindow => write!(f, "Window has no memory behind it"),
            AsicError::MappingTooLarge => write!(f, "Mapping exceeds window size"),
            AsicError::BadLength { expected, actual } => {
                write!(f, "Bad buffer length: expected {}, got {}", expected, actual)
            }
            AsicError::InvalidDmaRequest => write!(f, "DMA request with zero address or length"),
            AsicError::InvalidVector => write!(f, "Vector index out of range"),
            AsicError::InvalidArgument => write!(f, "Invalid argument"),
            AsicError::UnknownCommand(cmd) => write!(f, "Unknown control command {:#010x}", cmd),
            AsicError::NotSupported => write!(f, "Not supported by this device type"),
            AsicError::NoMinor => write!(f, "No free minor number"),
            AsicError::TooManySessions => write!(f, "Too many open sessions"),
            AsicError::TranslationFailed => write!(f, "DMA translation failed"),
            AsicError::MapFailed => write!(f, "Window mapping failed"),
            AsicError::ResourceUnavailable => write!(f, "Host resources unavailable"),
            AsicError::Busy => write!(f, "Minor number already in use"),
            AsicError::NoDevice => write!(f, "No such device"),
            AsicError::Faulted => write!(f, "Device in bus error state"),
            AsicError::Interrupted => write!(f, "Interrupted, retry"),
            AsicError::WouldBlock => write!(f, "No new events"),
        }
    }
}

/// Errno values used by [`AsicError::to_errno`].
pub mod errno {
    pub const EIO: i32 = -5;
    pub const EAGAIN: i32 = -11;
    pub const ENOMEM: i32 = -12;
    pub const EBUSY: i32 = -16;
    pub const ENODEV: i32 = -19;
    pub const EINVAL: i32 = -22;
    pub const ENOTTY: i32 = -25;
    pub const ENOSPC: i32 = -28;
    pub const ERESTARTSYS: i32 = -512;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(AsicError::EmptyWindow.class(), ErrorClass::Configuration);
        assert_eq!(AsicError::TranslationFailed.class(), ErrorClass::Exhaustion);
        assert_eq!(AsicError::NoDevice.class(), ErrorClass::DeviceAbsent);
        assert_eq!(AsicError::Faulted.class(), ErrorClass::Fault);
        assert_eq!(AsicError::Interrupted.class(), ErrorClass::Interrupted);
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(AsicError::Interrupted.to_errno(), errno::ERESTARTSYS);
        assert_eq!(AsicError::Faulted.to_errno(), errno::EIO);
        assert_eq!(AsicError::WouldBlock.to_errno(), errno::EAGAIN);
        assert_eq!(
            AsicError::BadLength { expected: 8, actual: 4 }.to_errno(),
            errno::EINVAL
        );
        assert!(AsicError::Interrupted.is_restartable());
        assert!(!AsicError::Faulted.is_restartable());
    }

    #[test]
    fn test_host_error_conversion() {
        assert_eq!(
            AsicError::from(HostError::AddressSpaceExhausted),
            AsicError::TranslationFailed
        );
        assert_eq!(AsicError::from(HostError::NoVectors), AsicError::ResourceUnavailable);
    }
}
