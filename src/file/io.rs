//! Safe little-endian binary I/O for module images.
//!
//! This module provides the low-level, bounds-checked primitives every reader and writer in
//! the crate is built on. All metadata structures of a module image are little-endian, so
//! only little-endian helpers are offered.
//!
//! # Key Components
//!
//! - [`crate::file::io::CilIO`] - Trait implemented by the primitive integers used in metadata
//! - [`crate::file::io::read_le`] / [`crate::file::io::read_le_at`] - Bounds-checked reads
//! - [`crate::file::io::read_le_at_dyn`] - 2- or 4-byte heap/table index reads
//! - [`crate::file::io::write_le_at`] / [`crate::file::io::write_le_at_dyn`] - Bounds-checked writes
//! - [`crate::file::io::write_compressed_uint`] - ECMA-335 II.23.2 compressed integer encoding
//!
//! # Thread Safety
//!
//! All functions are pure and operate only on the buffers passed in; they can be used
//! concurrently from multiple threads as long as each thread owns its offset variable.

use crate::Result;

/// Trait for implementing type-specific safe binary data reading and writing operations.
///
/// Each implementation defines a `Bytes` associated type that represents the fixed-size
/// byte array required for that particular type (e.g., `[u8; 4]` for `u32`).
pub trait CilIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io!(u8 => 1, u16 => 2, u32 => 4, u64 => 8);

/// Safely reads a value of type `T` in little-endian byte order from the start of a buffer.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at `offset`, advancing the
/// offset by the number of bytes read.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
///
/// # Examples
///
/// ```rust,ignore
/// let data = [0x01, 0x00, 0x02, 0x00];
/// let mut offset = 0;
/// assert_eq!(read_le_at::<u16>(&data, &mut offset)?, 1);
/// assert_eq!(read_le_at::<u16>(&data, &mut offset)?, 2);
/// assert_eq!(offset, 4);
/// ```
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Dynamically reads either a 2-byte or 4-byte value in little-endian byte order.
///
/// Heap and table indexes in the `#~` stream are 2 bytes wide unless the referenced heap or
/// table is large, in which case they are 4 bytes wide. The value is always promoted to `u32`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at_dyn(data: &[u8], offset: &mut usize, is_large: bool) -> Result<u32> {
    let res = if is_large {
        read_le_at::<u32>(data, offset)?
    } else {
        u32::from(read_le_at::<u16>(data, offset)?)
    };

    Ok(res)
}

/// Safely writes a value of type `T` in little-endian byte order at `offset`, advancing the
/// offset by the number of bytes written.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    data[*offset..end].copy_from_slice(value.to_le_bytes().as_ref());
    *offset = end;

    Ok(())
}

/// Dynamically writes either a 2-byte or 4-byte value in little-endian byte order.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small, or
/// [`crate::Error::Malformed`] if a value does not fit into a small index.
pub fn write_le_at_dyn(data: &mut [u8], offset: &mut usize, value: u32, is_large: bool) -> Result<()> {
    if is_large {
        write_le_at::<u32>(data, offset, value)
    } else {
        let small = u16::try_from(value)
            .map_err(|_| malformed_error!("Index {} does not fit into a 2-byte column", value))?;
        write_le_at::<u16>(data, offset, small)
    }
}

/// Appends `value` using the ECMA-335 II.23.2 compressed unsigned integer encoding.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for values above `0x1FFF_FFFF`, which cannot be encoded.
pub fn write_compressed_uint(buffer: &mut Vec<u8>, value: u32) -> Result<()> {
    match value {
        0..=0x7F => buffer.push(value as u8),
        0x80..=0x3FFF => {
            buffer.push(((value >> 8) as u8) | 0x80);
            buffer.push(value as u8);
        }
        0x4000..=0x1FFF_FFFF => {
            buffer.push(((value >> 24) as u8) | 0xC0);
            buffer.push((value >> 16) as u8);
            buffer.push((value >> 8) as u8);
            buffer.push(value as u8);
        }
        _ => {
            return Err(malformed_error!(
                "Value {} exceeds the compressed integer range",
                value
            ))
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_sequential() {
        let data = [0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0xFF];
        let mut offset = 0;

        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 1);
        assert_eq!(read_le_at::<u32>(&data, &mut offset).unwrap(), 2);
        assert_eq!(read_le_at::<u8>(&data, &mut offset).unwrap(), 0xFF);
        assert_eq!(offset, 7);
        assert!(read_le_at::<u8>(&data, &mut offset).is_err());
    }

    #[test]
    fn read_dyn() {
        let data = [0x01, 0x00, 0x02, 0x00, 0x00, 0x00];
        let mut offset = 0;

        assert_eq!(read_le_at_dyn(&data, &mut offset, false).unwrap(), 1);
        assert_eq!(read_le_at_dyn(&data, &mut offset, true).unwrap(), 2);
        assert_eq!(offset, 6);
    }

    #[test]
    fn write_roundtrip_and_bounds() {
        let mut data = [0u8; 6];
        let mut offset = 0;

        write_le_at_dyn(&mut data, &mut offset, 1, false).unwrap();
        write_le_at_dyn(&mut data, &mut offset, 2, true).unwrap();
        assert_eq!(data, [0x01, 0x00, 0x02, 0x00, 0x00, 0x00]);
        assert!(write_le_at::<u8>(&mut data, &mut offset, 0).is_err());

        let mut offset = 0;
        assert!(write_le_at_dyn(&mut data, &mut offset, 0x1_0000, false).is_err());
    }

    #[test]
    fn compressed_uint_encoding() {
        let cases: [(u32, &[u8]); 6] = [
            (0x03, &[0x03]),
            (0x7F, &[0x7F]),
            (0x80, &[0x80, 0x80]),
            (0x2E57, &[0xAE, 0x57]),
            (0x4000, &[0xC0, 0x00, 0x40, 0x00]),
            (0x1FFF_FFFF, &[0xDF, 0xFF, 0xFF, 0xFF]),
        ];

        for (value, expected) in cases {
            let mut buffer = Vec::new();
            write_compressed_uint(&mut buffer, value).unwrap();
            assert_eq!(buffer, expected, "value 0x{value:X}");
        }

        assert!(write_compressed_uint(&mut Vec::new(), 0x2000_0000).is_err());
    }
}
