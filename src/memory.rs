//! Access to guest linear memory.
//!
//! Guest pointers are 32-bit offsets into a byte slice owned by the embedder.
//! Every access is bounds checked; nothing here ever hands out a reference
//! past the end of the slice.

use crate::types::Size;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuestError {
    #[error("Pointer out of bounds: {len} bytes at {offset:#x}")]
    PtrOutOfBounds { offset: u32, len: u32 },
    #[error("Pointer overflow")]
    PtrOverflow,
    #[error("Invalid UTF-8 encountered: {0:?}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("Invalid flag value for {0}")]
    InvalidFlagValue(&'static str),
    #[error("Invalid enum value for {0}")]
    InvalidEnumValue(&'static str),
    #[error("Int conversion error: {0}")]
    TryFromIntError(#[from] std::num::TryFromIntError),
}

/// A `(buf, buf_len)` pair read from a guest `iovec`/`ciovec` array.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GuestIoVec {
    pub buf: u32,
    pub buf_len: Size,
}

const IOVEC_SIZE: u32 = 8;

/// A guest's linear memory.
///
/// Implementors only expose the backing bytes; the provided methods do all
/// bounds checking and little-endian decoding.
pub trait GuestMemory {
    fn base(&self) -> &[u8];
    fn base_mut(&mut self) -> &mut [u8];

    fn slice(&self, offset: u32, len: u32) -> Result<&[u8], GuestError> {
        let range = checked_range(self.base().len(), offset, len)?;
        Ok(&self.base()[range])
    }

    fn slice_mut(&mut self, offset: u32, len: u32) -> Result<&mut [u8], GuestError> {
        let range = checked_range(self.base().len(), offset, len)?;
        Ok(&mut self.base_mut()[range])
    }

    fn read_bytes(&self, offset: u32, len: u32) -> Result<Vec<u8>, GuestError> {
        Ok(self.slice(offset, len)?.to_vec())
    }

    fn write_bytes(&mut self, offset: u32, bytes: &[u8]) -> Result<(), GuestError> {
        let len = u32::try_from(bytes.len())?;
        self.slice_mut(offset, len)?.copy_from_slice(bytes);
        Ok(())
    }

    fn read_u8(&self, offset: u32) -> Result<u8, GuestError> {
        Ok(self.slice(offset, 1)?[0])
    }

    fn read_u32(&self, offset: u32) -> Result<u32, GuestError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.slice(offset, 4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn write_u32(&mut self, offset: u32, val: u32) -> Result<(), GuestError> {
        self.write_bytes(offset, &val.to_le_bytes())
    }

    fn write_u64(&mut self, offset: u32, val: u64) -> Result<(), GuestError> {
        self.write_bytes(offset, &val.to_le_bytes())
    }

    /// Read `len` consecutive 8-byte iovec records starting at `ptr`.
    fn read_iovecs(&self, ptr: u32, len: u32) -> Result<Vec<GuestIoVec>, GuestError> {
        let total = len.checked_mul(IOVEC_SIZE).ok_or(GuestError::PtrOverflow)?;
        let raw = self.slice(ptr, total)?;
        Ok(raw
            .chunks_exact(IOVEC_SIZE as usize)
            .map(|chunk| GuestIoVec {
                buf: u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                buf_len: u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
            })
            .collect())
    }

    fn read_str(&self, ptr: u32, len: u32) -> Result<&str, GuestError> {
        Ok(std::str::from_utf8(self.slice(ptr, len)?)?)
    }
}

fn checked_range(
    mem_len: usize,
    offset: u32,
    len: u32,
) -> Result<std::ops::Range<usize>, GuestError> {
    let end = offset.checked_add(len).ok_or(GuestError::PtrOverflow)?;
    if end as usize > mem_len {
        return Err(GuestError::PtrOutOfBounds { offset, len });
    }
    Ok(offset as usize..end as usize)
}

impl GuestMemory for [u8] {
    fn base(&self) -> &[u8] {
        self
    }
    fn base_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl GuestMemory for Vec<u8> {
    fn base(&self) -> &[u8] {
        self
    }
    fn base_mut(&mut self) -> &mut [u8] {
        self
    }
}
