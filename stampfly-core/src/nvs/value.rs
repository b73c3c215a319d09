//! Stored value encoding
//!
//! Every entry is a postcard-encoded [`StoredValue`]. The variant tag
//! records the type it was written with, so reading a key back as a
//! different type is detected instead of reinterpreting bytes.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest string or blob payload
pub const MAX_PAYLOAD_LEN: usize = 256;

/// Largest encoded entry: tag, length prefix and payload
pub const MAX_ENCODED_LEN: usize = MAX_PAYLOAD_LEN + 4;

/// Typed entry as written to flash
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StoredValue<'a> {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Str(&'a str),
    Blob(&'a [u8]),
}

impl StoredValue<'_> {
    /// Payload size in bytes
    pub fn size(&self) -> usize {
        match self {
            StoredValue::I8(_) | StoredValue::U8(_) => 1,
            StoredValue::I16(_) | StoredValue::U16(_) => 2,
            StoredValue::I32(_) | StoredValue::U32(_) => 4,
            StoredValue::I64(_) | StoredValue::U64(_) => 8,
            StoredValue::Str(s) => s.len(),
            StoredValue::Blob(b) => b.len(),
        }
    }
}

/// Encode into `buf`, returning the encoded length
pub fn encode(value: &StoredValue<'_>, buf: &mut [u8]) -> Result<usize> {
    if value.size() > MAX_PAYLOAD_LEN {
        return Err(Error::InvalidArgument);
    }
    postcard::to_slice(value, buf)
        .map(|used| used.len())
        .map_err(|_| Error::InvalidArgument)
}

/// Decode an entry
///
/// Anything that does not parse is treated as a missing value.
pub fn decode(bytes: &[u8]) -> Result<StoredValue<'_>> {
    postcard::from_bytes(bytes).map_err(|_| Error::NotFound)
}

/// Fixed-width value readable and writable by type
pub trait Scalar: Copy {
    fn to_stored(self) -> StoredValue<'static>;
    fn from_stored(value: StoredValue<'_>) -> Option<Self>;
}

macro_rules! scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Scalar for $ty {
                fn to_stored(self) -> StoredValue<'static> {
                    StoredValue::$variant(self)
                }

                fn from_stored(value: StoredValue<'_>) -> Option<Self> {
                    match value {
                        StoredValue::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

scalar!(
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
);

// Floats are stored as the bit pattern of the same-width unsigned integer

impl Scalar for f32 {
    fn to_stored(self) -> StoredValue<'static> {
        StoredValue::U32(self.to_bits())
    }

    fn from_stored(value: StoredValue<'_>) -> Option<Self> {
        u32::from_stored(value).map(f32::from_bits)
    }
}

impl Scalar for f64 {
    fn to_stored(self) -> StoredValue<'static> {
        StoredValue::U64(self.to_bits())
    }

    fn from_stored(value: StoredValue<'_>) -> Option<Self> {
        u64::from_stored(value).map(f64::from_bits)
    }
}
