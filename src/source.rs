//! Bounds-checked, read-only view over the input file.

use std::fmt;
use byteorder::{ByteOrder, LittleEndian};

/// A read would have touched bytes outside the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("read of {len} bytes at offset 0x{offset:x} exceeds buffer of {available} bytes")]
pub struct OutOfBounds {
    /// Offset of the attempted read
    pub offset: u64,
    /// Number of bytes requested
    pub len: u64,
    /// Length of the view
    pub available: u64,
}

/// Immutable byte buffer with checked accessors.
///
/// Every accessor validates `offset + len` against the view length and
/// returns [`OutOfBounds`] instead of panicking. Sub-views created with
/// [`ByteSource::window`] share the same backing bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ByteSource<'a> {
    data: &'a [u8],
}

impl<'a> ByteSource<'a> {
    /// Wrap a byte buffer.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the view holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The whole underlying buffer.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Borrow `len` bytes starting at `offset`.
    pub fn slice(&self, offset: u64, len: u64) -> Result<&'a [u8], OutOfBounds> {
        let err = OutOfBounds {
            offset,
            len,
            available: self.data.len() as u64,
        };
        let end = offset.checked_add(len).ok_or(err)?;
        if end > self.data.len() as u64 {
            return Err(err);
        }
        // both bounds fit in usize because they are <= data.len()
        Ok(&self.data[offset as usize..end as usize])
    }

    /// A sub-view over `len` bytes starting at `offset`.
    pub fn window(&self, offset: u64, len: u64) -> Result<ByteSource<'a>, OutOfBounds> {
        self.slice(offset, len).map(ByteSource::new)
    }

    /// Everything from `offset` to the end of the view.
    pub fn tail(&self, offset: u64) -> Result<&'a [u8], OutOfBounds> {
        let available = self.data.len() as u64;
        if offset > available {
            return Err(OutOfBounds { offset, len: 0, available });
        }
        Ok(&self.data[offset as usize..])
    }

    /// Single byte at `offset`.
    pub fn byte(&self, offset: u64) -> Result<u8, OutOfBounds> {
        self.slice(offset, 1).map(|b| b[0])
    }

    pub fn read_u16(&self, offset: u64) -> Result<u16, OutOfBounds> {
        self.slice(offset, 2).map(LittleEndian::read_u16)
    }

    pub fn read_u32(&self, offset: u64) -> Result<u32, OutOfBounds> {
        self.slice(offset, 4).map(LittleEndian::read_u32)
    }

    pub fn read_u64(&self, offset: u64) -> Result<u64, OutOfBounds> {
        self.slice(offset, 8).map(LittleEndian::read_u64)
    }
}

impl fmt::Debug for ByteSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteSource")
            .field("len", &self.data.len())
            .finish()
    }
}
