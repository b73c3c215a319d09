//! Backend fault codes
//!
//! Every backend trait reports failures with [`Fault`]. The managers fold
//! these into their own error taxonomy.

use core::fmt;

/// Errors reported by a peripheral backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fault {
    /// Addressed device did not acknowledge
    Nack,
    /// Operation did not complete within its timeout
    Timeout,
    /// Bus level error (arbitration lost, framing, stuck line)
    Bus,
    /// Parameter rejected by the driver
    InvalidArgument,
    /// Driver is not in a state that allows the operation
    InvalidState,
    /// Requested item does not exist
    NotFound,
    /// Driver could not allocate a resource
    NoMemory,
    /// Feature not available on this chip
    Unsupported,
    /// Any other hardware failure
    Hardware,
}

impl Fault {
    /// Check whether this fault means "nobody answered" rather than a
    /// broken transaction
    pub fn is_absence(&self) -> bool {
        matches!(self, Fault::Nack)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Fault::Nack => "no acknowledge",
            Fault::Timeout => "timeout",
            Fault::Bus => "bus error",
            Fault::InvalidArgument => "invalid argument",
            Fault::InvalidState => "invalid state",
            Fault::NotFound => "not found",
            Fault::NoMemory => "out of memory",
            Fault::Unsupported => "unsupported",
            Fault::Hardware => "hardware failure",
        };
        f.write_str(text)
    }
}

impl embedded_hal::i2c::Error for Fault {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

        match self {
            Fault::Nack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown),
            Fault::Bus => ErrorKind::Bus,
            _ => ErrorKind::Other,
        }
    }
}

impl embedded_hal::spi::Error for Fault {
    fn kind(&self) -> embedded_hal::spi::ErrorKind {
        embedded_hal::spi::ErrorKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{Error as _, ErrorKind};

    #[test]
    fn test_only_nack_is_absence() {
        assert!(Fault::Nack.is_absence());
        assert!(!Fault::Timeout.is_absence());
        assert!(!Fault::Bus.is_absence());
    }

    #[test]
    fn test_i2c_error_kind() {
        assert!(matches!(Fault::Nack.kind(), ErrorKind::NoAcknowledge(_)));
        assert_eq!(Fault::Bus.kind(), ErrorKind::Bus);
        assert_eq!(Fault::Hardware.kind(), ErrorKind::Other);
    }
}
