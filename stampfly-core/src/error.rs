//! Manager error taxonomy

use core::fmt;

use stampfly_hal::Fault;

/// Errors returned by every manager operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Operation issued outside the lifecycle state it requires
    InvalidState,
    /// Malformed or out-of-range parameter
    InvalidArgument,
    /// Unknown resource ID, handle or key
    NotFound,
    /// Resource table or driver allocation exhausted
    NoMemory,
    /// Platform does not provide the capability
    Unsupported,
    /// Underlying transaction failed
    Io(Fault),
}

/// Result alias used throughout the crate
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// Check for an I/O failure reported by the backend
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

impl From<Fault> for Error {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::InvalidArgument => Error::InvalidArgument,
            Fault::InvalidState => Error::InvalidState,
            Fault::NotFound => Error::NotFound,
            Fault::NoMemory => Error::NoMemory,
            Fault::Unsupported => Error::Unsupported,
            other => Error::Io(other),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidState => f.write_str("invalid state"),
            Error::InvalidArgument => f.write_str("invalid argument"),
            Error::NotFound => f.write_str("not found"),
            Error::NoMemory => f.write_str("out of memory"),
            Error::Unsupported => f.write_str("unsupported"),
            Error::Io(fault) => write!(f, "i/o failure: {}", fault),
        }
    }
}

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        use embedded_io::ErrorKind;

        match self {
            Error::InvalidState => ErrorKind::Other,
            Error::InvalidArgument => ErrorKind::InvalidInput,
            Error::NotFound => ErrorKind::NotFound,
            Error::NoMemory => ErrorKind::OutOfMemory,
            Error::Unsupported => ErrorKind::Unsupported,
            Error::Io(Fault::Timeout) => ErrorKind::TimedOut,
            Error::Io(_) => ErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Error as _, ErrorKind};

    #[test]
    fn test_fault_folding() {
        assert_eq!(Error::from(Fault::InvalidArgument), Error::InvalidArgument);
        assert_eq!(Error::from(Fault::NotFound), Error::NotFound);
        assert_eq!(Error::from(Fault::NoMemory), Error::NoMemory);
        assert_eq!(Error::from(Fault::Nack), Error::Io(Fault::Nack));
        assert_eq!(Error::from(Fault::Timeout), Error::Io(Fault::Timeout));
        assert!(Error::from(Fault::Bus).is_io());
    }

    #[test]
    fn test_io_kinds() {
        assert_eq!(Error::Io(Fault::Timeout).kind(), ErrorKind::TimedOut);
        assert_eq!(Error::NotFound.kind(), ErrorKind::NotFound);
        assert_eq!(Error::InvalidArgument.kind(), ErrorKind::InvalidInput);
    }
}
