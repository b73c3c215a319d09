//! Persistent key-value store manager
//!
//! Keys live in named namespaces on one flash partition. Writes and key
//! erasures are staged in RAM and reach flash only on [`NvsManager::commit`]
//! or [`NvsManager::commit_all`]; reads see staged changes first.
//! Namespace and partition erasure bypass staging and apply immediately.

pub mod value;

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::{String, Vec};
use serde::de::DeserializeOwned;
use serde::Serialize;
use stampfly_hal::flash::{is_valid_name, NvsPartition, PartitionUsage, MAX_NAME_LEN};
use stampfly_hal::Fault;

use crate::error::{Error, Result};
use crate::lifecycle::{Event, Lifecycle, Peripheral};

pub use value::{Scalar, StoredValue, MAX_PAYLOAD_LEN};
use value::MAX_ENCODED_LEN;

/// Maximum number of open namespaces
pub const MAX_NAMESPACES: usize = 8;

/// Maximum number of uncommitted changes
pub const MAX_STAGED: usize = 32;

type Name = String<MAX_NAME_LEN>;

/// Namespace access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessMode {
    ReadOnly,
    #[default]
    ReadWrite,
}

#[derive(Debug)]
struct Namespace {
    name: Name,
    mode: AccessMode,
}

/// One uncommitted change; `None` erases the key
#[derive(Debug)]
struct Staged {
    namespace: Name,
    key: Name,
    value: Option<Vec<u8, MAX_ENCODED_LEN>>,
}

fn name(text: &str) -> Result<Name> {
    if !is_valid_name(text) {
        return Err(Error::InvalidArgument);
    }
    let mut name = Name::new();
    name.push_str(text).map_err(|_| Error::InvalidArgument)?;
    Ok(name)
}

struct Inner<P> {
    lifecycle: Lifecycle,
    partition: P,
    label: &'static str,
    mounted: bool,
    namespaces: Vec<Namespace, MAX_NAMESPACES>,
    staged: Vec<Staged, MAX_STAGED>,
}

impl<P: NvsPartition> Inner<P> {
    fn require_mounted(&self) -> Result<()> {
        self.lifecycle.require_ready()?;
        if !self.mounted {
            return Err(Error::InvalidState);
        }
        Ok(())
    }

    fn mount(&mut self) -> Result<()> {
        if self.mounted {
            return Ok(());
        }
        if !is_valid_name(self.label) {
            return Err(Error::InvalidArgument);
        }
        match self.partition.init(self.label) {
            Ok(()) => {}
            Err(Fault::NoMemory) => {
                warn!("nvs: partition {} has no free pages, erasing", self.label);
                self.partition.erase_all()?;
                self.partition.init(self.label)?;
            }
            Err(fault) => return Err(fault.into()),
        }
        self.mounted = true;
        info!("nvs: mounted {}", self.label);
        Ok(())
    }

    /// Drop staged changes and namespaces, unmount
    fn release(&mut self) -> Result<()> {
        if !self.staged.is_empty() {
            warn!("nvs: discarding {} uncommitted changes", self.staged.len());
        }
        self.staged.clear();
        self.namespaces.clear();
        if self.mounted {
            self.mounted = false;
            self.partition.deinit()?;
        }
        Ok(())
    }

    fn namespace_mode(&self, namespace: &str) -> Option<AccessMode> {
        self.namespaces
            .iter()
            .find(|ns| ns.name.as_str() == namespace)
            .map(|ns| ns.mode)
    }

    fn open(&mut self, namespace: &str, mode: AccessMode) -> Result<AccessMode> {
        if let Some(mode) = self.namespace_mode(namespace) {
            return Ok(mode);
        }
        let entry = Namespace {
            name: name(namespace)?,
            mode,
        };
        self.namespaces.push(entry).map_err(|_| Error::NoMemory)?;
        debug!("nvs: opened {} ({:?})", namespace, mode);
        Ok(mode)
    }

    fn writable(&mut self, namespace: &str) -> Result<()> {
        match self.open(namespace, AccessMode::ReadWrite)? {
            AccessMode::ReadWrite => Ok(()),
            AccessMode::ReadOnly => Err(Error::InvalidState),
        }
    }

    fn staged(&self, namespace: &str, key: &str) -> Option<&Staged> {
        self.staged
            .iter()
            .find(|s| s.namespace.as_str() == namespace && s.key.as_str() == key)
    }

    fn stage(&mut self, namespace: &str, key: &str, value: Option<Vec<u8, MAX_ENCODED_LEN>>) -> Result<()> {
        if let Some(existing) = self
            .staged
            .iter_mut()
            .find(|s| s.namespace.as_str() == namespace && s.key.as_str() == key)
        {
            existing.value = value;
            return Ok(());
        }
        let entry = Staged {
            namespace: name(namespace)?,
            key: name(key)?,
            value,
        };
        self.staged.push(entry).map_err(|_| Error::NoMemory)
    }

    /// Check if a key exists, staged changes first
    fn exists(&mut self, namespace: &str, key: &str) -> Result<bool> {
        if let Some(staged) = self.staged(namespace, key) {
            return Ok(staged.value.is_some());
        }
        let mut buf = [0u8; MAX_ENCODED_LEN];
        match self.partition.read(namespace, key, &mut buf) {
            Ok(_) => Ok(true),
            Err(Fault::NotFound) => Ok(false),
            Err(fault) => Err(fault.into()),
        }
    }

    /// Write staged changes to flash, oldest first
    ///
    /// Stops at the first failure; changes already written are unstaged.
    fn commit(&mut self, namespace: Option<&str>) -> Result<usize> {
        let mut written = 0;
        let mut i = 0;
        while i < self.staged.len() {
            let entry = &self.staged[i];
            if namespace.is_some_and(|ns| entry.namespace.as_str() != ns) {
                i += 1;
                continue;
            }
            match &entry.value {
                Some(bytes) => self.partition.write(&entry.namespace, &entry.key, bytes)?,
                None => match self.partition.remove(&entry.namespace, &entry.key) {
                    Ok(()) | Err(Fault::NotFound) => {}
                    Err(fault) => return Err(fault.into()),
                },
            }
            self.staged.remove(i);
            written += 1;
        }
        Ok(written)
    }

    fn discard(&mut self, namespace: &str) {
        self.staged.retain(|s| s.namespace.as_str() != namespace);
    }
}

/// Key-value store manager for one flash partition
pub struct NvsManager<M: RawMutex, P: NvsPartition> {
    inner: Mutex<M, RefCell<Inner<P>>>,
}

macro_rules! typed_access {
    ($($ty:ty => $write:ident, $read:ident;)*) => {
        $(
            pub fn $write(&self, namespace: &str, key: &str, value: $ty) -> Result<()> {
                self.write_scalar(namespace, key, value)
            }

            pub fn $read(&self, namespace: &str, key: &str) -> Result<$ty> {
                self.read_scalar(namespace, key)
            }
        )*
    };
}

impl<M: RawMutex, P: NvsPartition> NvsManager<M, P> {
    /// Create a manager for the partition named `label`
    pub const fn new(partition: P, label: &'static str) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                lifecycle: Lifecycle::new("nvs"),
                partition,
                label,
                mounted: false,
                namespaces: Vec::new(),
                staged: Vec::new(),
            })),
        }
    }

    /// Open a namespace
    ///
    /// Opening an already open namespace keeps its original mode.
    pub fn open_namespace(&self, namespace: &str, mode: AccessMode) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.require_mounted()?;
            inner.open(namespace, mode)?;
            Ok(())
        })
    }

    /// Close a namespace, dropping its uncommitted changes
    pub fn close_namespace(&self, namespace: &str) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.require_mounted()?;
            let index = inner
                .namespaces
                .iter()
                .position(|ns| ns.name.as_str() == namespace)
                .ok_or(Error::NotFound)?;
            inner.namespaces.swap_remove(index);
            inner.discard(namespace);
            Ok(())
        })
    }

    /// Close every namespace, dropping all uncommitted changes
    pub fn close_all(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.require_mounted()?;
            inner.namespaces.clear();
            inner.staged.clear();
            Ok(())
        })
    }

    /// Mode of an open namespace
    pub fn namespace_mode(&self, namespace: &str) -> Option<AccessMode> {
        self.inner
            .lock(|inner| inner.borrow().namespace_mode(namespace))
    }

    fn store(&self, namespace: &str, key: &str, value: &StoredValue<'_>) -> Result<()> {
        if !is_valid_name(key) {
            return Err(Error::InvalidArgument);
        }
        let mut buf = [0u8; MAX_ENCODED_LEN];
        let len = value::encode(value, &mut buf)?;
        let bytes = Vec::from_slice(&buf[..len]).map_err(|_| Error::InvalidArgument)?;

        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.require_mounted()?;
            inner.writable(namespace)?;
            inner.stage(namespace, key, Some(bytes))
        })
    }

    /// Look up a key and hand its value to `f`
    fn load<R>(
        &self,
        namespace: &str,
        key: &str,
        f: impl FnOnce(StoredValue<'_>) -> Result<R>,
    ) -> Result<R> {
        if !is_valid_name(key) {
            return Err(Error::InvalidArgument);
        }
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.require_mounted()?;
            inner.open(namespace, AccessMode::ReadWrite)?;

            if let Some(staged) = inner.staged(namespace, key) {
                let bytes = staged.value.as_ref().ok_or(Error::NotFound)?;
                return f(value::decode(bytes)?);
            }
            let mut buf = [0u8; MAX_ENCODED_LEN];
            let len = inner.partition.read(namespace, key, &mut buf)?;
            f(value::decode(&buf[..len])?)
        })
    }

    /// Stage a fixed-width value
    pub fn write_scalar<T: Scalar>(&self, namespace: &str, key: &str, value: T) -> Result<()> {
        self.store(namespace, key, &value.to_stored())
    }

    /// Read a fixed-width value
    ///
    /// A key written with a different type reads as [`Error::NotFound`].
    pub fn read_scalar<T: Scalar>(&self, namespace: &str, key: &str) -> Result<T> {
        self.load(namespace, key, |value| T::from_stored(value).ok_or(Error::NotFound))
    }

    typed_access! {
        i8 => write_i8, read_i8;
        u8 => write_u8, read_u8;
        i16 => write_i16, read_i16;
        u16 => write_u16, read_u16;
        i32 => write_i32, read_i32;
        u32 => write_u32, read_u32;
        i64 => write_i64, read_i64;
        u64 => write_u64, read_u64;
        f32 => write_f32, read_f32;
        f64 => write_f64, read_f64;
    }

    pub fn write_str(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.store(namespace, key, &StoredValue::Str(value))
    }

    /// Read a string into `buf`
    ///
    /// Fails with [`Error::InvalidArgument`] if `buf` is too small.
    pub fn read_str<'b>(&self, namespace: &str, key: &str, buf: &'b mut [u8]) -> Result<&'b str> {
        let len = self.load(namespace, key, |value| match value {
            StoredValue::Str(s) => {
                let out = buf.get_mut(..s.len()).ok_or(Error::InvalidArgument)?;
                out.copy_from_slice(s.as_bytes());
                Ok(s.len())
            }
            _ => Err(Error::NotFound),
        })?;
        core::str::from_utf8(&buf[..len]).map_err(|_| Error::NotFound)
    }

    pub fn write_blob(&self, namespace: &str, key: &str, data: &[u8]) -> Result<()> {
        self.store(namespace, key, &StoredValue::Blob(data))
    }

    /// Read a blob into `buf`, returning its length
    pub fn read_blob(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize> {
        self.load(namespace, key, |value| match value {
            StoredValue::Blob(data) => {
                let out = buf.get_mut(..data.len()).ok_or(Error::InvalidArgument)?;
                out.copy_from_slice(data);
                Ok(data.len())
            }
            _ => Err(Error::NotFound),
        })
    }

    /// Stage a structured value, serialized with postcard
    pub fn write_value<T: Serialize>(&self, namespace: &str, key: &str, value: &T) -> Result<()> {
        let mut buf = [0u8; MAX_PAYLOAD_LEN];
        let encoded = postcard::to_slice(value, &mut buf).map_err(|_| Error::InvalidArgument)?;
        self.write_blob(namespace, key, encoded)
    }

    /// Read a value stored with [`NvsManager::write_value`]
    pub fn read_value<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Result<T> {
        self.load(namespace, key, |value| match value {
            StoredValue::Blob(data) => postcard::from_bytes(data).map_err(|_| Error::NotFound),
            _ => Err(Error::NotFound),
        })
    }

    pub fn has_key(&self, namespace: &str, key: &str) -> Result<bool> {
        match self.load(namespace, key, |_| Ok(())) {
            Ok(()) => Ok(true),
            Err(Error::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Payload size of a key: string or blob length, or the integer width
    pub fn data_size(&self, namespace: &str, key: &str) -> Result<usize> {
        self.load(namespace, key, |value| Ok(value.size()))
    }

    /// Stage removal of a key
    pub fn erase_key(&self, namespace: &str, key: &str) -> Result<()> {
        if !is_valid_name(key) {
            return Err(Error::InvalidArgument);
        }
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.require_mounted()?;
            inner.writable(namespace)?;
            if !inner.exists(namespace, key)? {
                return Err(Error::NotFound);
            }
            inner.stage(namespace, key, None)
        })
    }

    /// Remove every key of a namespace from flash immediately
    pub fn erase_namespace(&self, namespace: &str) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.require_mounted()?;
            inner.writable(namespace)?;
            inner.discard(namespace);
            inner.partition.remove_namespace(namespace)?;
            Ok(())
        })
    }

    /// Wipe the whole partition immediately
    ///
    /// Staged changes are dropped; namespaces stay open.
    pub fn erase_all(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.require_mounted()?;
            inner.staged.clear();
            inner.partition.erase_all()?;
            warn!("nvs: partition {} erased", inner.label);
            Ok(())
        })
    }

    /// Make the staged changes of one namespace durable
    pub fn commit(&self, namespace: &str) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.require_mounted()?;
            if inner.namespace_mode(namespace).is_none() {
                return Err(Error::NotFound);
            }
            let written = inner.commit(Some(namespace))?;
            debug!("nvs: committed {} changes to {}", written, namespace);
            Ok(())
        })
    }

    /// Make every staged change durable
    pub fn commit_all(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.require_mounted()?;
            inner.commit(None)?;
            Ok(())
        })
    }

    /// Number of uncommitted changes
    pub fn pending(&self) -> usize {
        self.inner.lock(|inner| inner.borrow().staged.len())
    }

    /// Entry usage of the partition
    pub fn statistics(&self) -> Result<PartitionUsage> {
        self.inner.lock(|inner| {
            let inner = inner.borrow();
            inner.require_mounted()?;
            Ok(inner.partition.usage()?)
        })
    }
}

impl<M: RawMutex, P: NvsPartition> Peripheral for NvsManager<M, P> {
    /// Mount the partition, erasing it first if it has no free pages
    fn initialize(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.apply(Event::Initialize)?;
            if let Err(e) = inner.mount() {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::InitComplete)?;
            Ok(())
        })
    }

    fn configure(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.check(Event::Configure)?;
            if let Err(e) = inner.mount() {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::Configure)?;
            Ok(())
        })
    }

    fn start(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.check(Event::Start)?;
            if let Err(e) = inner.mount() {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::Start)?;
            Ok(())
        })
    }

    /// Commit everything staged
    fn stop(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.check(Event::Stop)?;
            if let Err(e) = inner.commit(None) {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::Stop)?;
            Ok(())
        })
    }

    /// Discard staged changes, close every namespace and remount
    fn reset(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if let Err(e) = inner.release().and_then(|()| inner.mount()) {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::Reset)?;
            Ok(())
        })
    }

    lifecycle_accessors!();
}

impl<M: RawMutex, P: NvsPartition> Drop for NvsManager<M, P> {
    fn drop(&mut self) {
        self.inner.lock(|inner| {
            let _ = inner.borrow_mut().release();
        });
    }
}
