//! Bounds-checked big-endian field access.
//!
//! Fields are addressed by absolute offset into a byte slice. An access that
//! would run past the end of the slice fails with [`BoundsError`] and never
//! touches adjacent memory.

use std::ops::Range;

/// Out-of-range access into a wire buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("out of bounds: {width} bytes at offset {offset} (buffer is {len} bytes)")]
pub struct BoundsError {
    pub offset: usize,
    pub width: usize,
    pub len: usize,
}

fn span(len: usize, offset: usize, width: usize) -> Result<Range<usize>, BoundsError> {
    match offset.checked_add(width) {
        Some(end) if end <= len => Ok(offset..end),
        _ => Err(BoundsError { offset, width, len }),
    }
}

/// Borrow `width` bytes starting at `offset`.
pub fn read_bytes(buf: &[u8], offset: usize, width: usize) -> Result<&[u8], BoundsError> {
    let range = span(buf.len(), offset, width)?;
    Ok(&buf[range])
}

/// Copy a fixed-size array starting at `offset`.
pub fn read_array<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N], BoundsError> {
    let mut out = [0u8; N];
    out.copy_from_slice(read_bytes(buf, offset, N)?);
    Ok(out)
}

pub fn read_u8(buf: &[u8], offset: usize) -> Result<u8, BoundsError> {
    Ok(read_array::<1>(buf, offset)?[0])
}

pub fn read_u16(buf: &[u8], offset: usize) -> Result<u16, BoundsError> {
    read_array(buf, offset).map(u16::from_be_bytes)
}

pub fn read_u32(buf: &[u8], offset: usize) -> Result<u32, BoundsError> {
    read_array(buf, offset).map(u32::from_be_bytes)
}

/// Overwrite `src.len()` bytes starting at `offset`.
pub fn write_bytes(buf: &mut [u8], offset: usize, src: &[u8]) -> Result<(), BoundsError> {
    let range = span(buf.len(), offset, src.len())?;
    buf[range].copy_from_slice(src);
    Ok(())
}

pub fn write_u8(buf: &mut [u8], offset: usize, value: u8) -> Result<(), BoundsError> {
    write_bytes(buf, offset, &[value])
}

pub fn write_u16(buf: &mut [u8], offset: usize, value: u16) -> Result<(), BoundsError> {
    write_bytes(buf, offset, &value.to_be_bytes())
}

pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) -> Result<(), BoundsError> {
    write_bytes(buf, offset, &value.to_be_bytes())
}
