//! Flash storage abstractions
//!
//! Provides the trait for the persistent key-value partition that backs
//! non-volatile storage. Entries live under a namespace and a key; both
//! are short ASCII names. The partition stores opaque bytes, encoding is
//! left to the caller.

use crate::error::Fault;

/// Longest namespace or key name in bytes
pub const MAX_NAME_LEN: usize = 15;

/// Check a namespace or key name
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LEN && name.is_ascii()
}

/// Entry statistics for a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PartitionUsage {
    /// Entries holding data
    pub used_entries: usize,
    /// Entries available for new data
    pub free_entries: usize,
    /// Total entry capacity
    pub total_entries: usize,
    /// Number of namespaces present
    pub namespace_count: usize,
}

/// Persistent key-value partition
///
/// Implementations should handle:
/// - Wear leveling across flash sectors
/// - Data integrity (CRC or similar)
/// - Atomic replacement of a single entry
pub trait NvsPartition {
    /// Mount the partition with the given label
    ///
    /// Returns [`Fault::NoMemory`] when the partition has no free pages and
    /// must be erased before use.
    fn init(&mut self, label: &str) -> Result<(), Fault>;

    /// Unmount the partition
    fn deinit(&mut self) -> Result<(), Fault>;

    /// Read an entry into `buf`
    ///
    /// # Returns
    /// The number of bytes read, [`Fault::NotFound`] when the entry is
    /// missing, or [`Fault::NoMemory`] when `buf` is too small.
    fn read(&mut self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, Fault>;

    /// Create or replace an entry
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), Fault>;

    /// Remove an entry
    fn remove(&mut self, namespace: &str, key: &str) -> Result<(), Fault>;

    /// Remove every entry in a namespace
    fn remove_namespace(&mut self, namespace: &str) -> Result<(), Fault>;

    /// Erase the entire partition
    ///
    /// Use with caution!
    fn erase_all(&mut self) -> Result<(), Fault>;

    /// Entry statistics
    fn usage(&self) -> Result<PartitionUsage, Fault>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_rules() {
        assert!(is_valid_name("storage"));
        assert!(is_valid_name("fifteen_chars_x"));
        assert!(!is_valid_name("sixteen_chars_xx"));
        assert!(!is_valid_name(""));
    }
}
