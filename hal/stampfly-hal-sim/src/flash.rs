//! Simulated NVS partition
//!
//! Contents live as long as any clone of the handle, so a second manager
//! opened on the same handle sees what the first one committed.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use stampfly_hal::flash::{is_valid_name, NvsPartition, PartitionUsage};
use stampfly_hal::Fault;

use crate::lock;

/// Bytes of payload per NVS entry
const ENTRY_SIZE: usize = 32;

/// Entries in the default partition (a 24 KiB partition holds 756)
const DEFAULT_ENTRIES: usize = 756;

fn entries_for(len: usize) -> usize {
    1 + len.div_ceil(ENTRY_SIZE)
}

#[derive(Debug)]
struct FlashState {
    mounted: Option<String>,
    entries: BTreeMap<(String, String), Vec<u8>>,
    capacity: usize,
    needs_erase: bool,
    writes: u32,
}

/// Simulated flash partition
#[derive(Debug, Clone)]
pub struct SimFlash {
    state: Arc<Mutex<FlashState>>,
}

impl Default for SimFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl SimFlash {
    /// Blank partition of the default size
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ENTRIES)
    }

    /// Blank partition holding `entries` entries
    pub fn with_capacity(entries: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(FlashState {
                mounted: None,
                entries: BTreeMap::new(),
                capacity: entries,
                needs_erase: false,
                writes: 0,
            })),
        }
    }

    /// Make the next mount fail as if the partition had no free pages
    pub fn corrupt(&self) {
        lock(&self.state).needs_erase = true;
    }

    /// Raw stored bytes of an entry
    pub fn raw(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        lock(&self.state)
            .entries
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }

    /// Number of entry writes that reached flash
    pub fn writes(&self) -> u32 {
        lock(&self.state).writes
    }

    /// Label of the mounted partition
    pub fn mounted(&self) -> Option<String> {
        lock(&self.state).mounted.clone()
    }
}

fn key_of(namespace: &str, key: &str) -> Result<(String, String), Fault> {
    if !is_valid_name(namespace) || !is_valid_name(key) {
        return Err(Fault::InvalidArgument);
    }
    Ok((namespace.to_string(), key.to_string()))
}

impl FlashState {
    fn mounted(&self) -> Result<(), Fault> {
        if self.mounted.is_some() {
            Ok(())
        } else {
            Err(Fault::InvalidState)
        }
    }

    fn used(&self) -> usize {
        self.entries.values().map(|v| entries_for(v.len())).sum()
    }
}

impl NvsPartition for SimFlash {
    fn init(&mut self, label: &str) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        if state.needs_erase {
            return Err(Fault::NoMemory);
        }
        if state.mounted.is_some() {
            return Err(Fault::InvalidState);
        }
        state.mounted = Some(label.to_string());
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        state.mounted()?;
        state.mounted = None;
        Ok(())
    }

    fn read(&mut self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, Fault> {
        let state = lock(&self.state);
        state.mounted()?;
        let data = state.entries.get(&key_of(namespace, key)?).ok_or(Fault::NotFound)?;
        let out = buf.get_mut(..data.len()).ok_or(Fault::NoMemory)?;
        out.copy_from_slice(data);
        Ok(data.len())
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        state.mounted()?;
        let id = key_of(namespace, key)?;
        let replaced = state.entries.get(&id).map_or(0, |v| entries_for(v.len()));
        if state.used() - replaced + entries_for(data.len()) > state.capacity {
            return Err(Fault::NoMemory);
        }
        state.entries.insert(id, data.to_vec());
        state.writes += 1;
        Ok(())
    }

    fn remove(&mut self, namespace: &str, key: &str) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        state.mounted()?;
        state
            .entries
            .remove(&key_of(namespace, key)?)
            .map(|_| ())
            .ok_or(Fault::NotFound)
    }

    fn remove_namespace(&mut self, namespace: &str) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        state.mounted()?;
        state.entries.retain(|(ns, _), _| ns != namespace);
        Ok(())
    }

    fn erase_all(&mut self) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        state.entries.clear();
        state.needs_erase = false;
        Ok(())
    }

    fn usage(&self) -> Result<PartitionUsage, Fault> {
        let state = lock(&self.state);
        state.mounted()?;
        let used = state.used();
        let mut namespaces: Vec<&str> = state.entries.keys().map(|(ns, _)| ns.as_str()).collect();
        namespaces.dedup();
        Ok(PartitionUsage {
            used_entries: used,
            free_entries: state.capacity.saturating_sub(used),
            total_entries: state.capacity,
            namespace_count: namespaces.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contents_survive_remount() {
        let mut flash = SimFlash::new();
        flash.init("nvs").unwrap();
        flash.write("cfg", "x", &[1, 2, 3]).unwrap();
        flash.deinit().unwrap();

        let mut again = flash.clone();
        again.init("nvs").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(again.read("cfg", "x", &mut buf), Ok(3));
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_capacity_enforced() {
        let mut flash = SimFlash::with_capacity(3);
        flash.init("nvs").unwrap();
        flash.write("a", "k", &[0; 32]).unwrap();
        assert_eq!(flash.write("a", "j", &[0; 8]), Err(Fault::NoMemory));
        let usage = flash.usage().unwrap();
        assert_eq!(usage.used_entries, 2);
        assert_eq!(usage.namespace_count, 1);
    }

    #[test]
    fn test_corrupt_partition_needs_erase() {
        let mut flash = SimFlash::new();
        flash.corrupt();
        assert_eq!(flash.init("nvs"), Err(Fault::NoMemory));
        flash.erase_all().unwrap();
        flash.init("nvs").unwrap();
    }
}
