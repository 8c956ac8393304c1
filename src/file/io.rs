//! Bounds-checked little-endian reading and writing of primitive values.
//!
//! The data specification wire format and the constructed memory image are
//! both sequences of little-endian values; this module provides the safe
//! primitives everything else builds on. All operations validate that the
//! buffer holds enough bytes before touching it and fail with
//! [`crate::Error::OutOfBounds`] otherwise.
//!
//! # Key Components
//!
//! - [`SpecIO`] - trait implemented by every primitive type that can cross
//!   the wire
//! - [`read_le_at`] - decode a value, advancing an offset for sequential reads
//! - [`write_le_at`] - encode a value, mirroring the reader
//!
//! # Examples
//!
//! ```rust,ignore
//! use dsexec::file::io::{read_le_at, write_le_at};
//!
//! let mut data = [0u8; 8];
//! let mut offset = 0;
//! write_le_at(&mut data, &mut offset, 0x1234u32)?;
//! write_le_at(&mut data, &mut offset, 0x5678u32)?;
//!
//! offset = 0;
//! let first: u32 = read_le_at(&data, &mut offset)?;
//! assert_eq!(first, 0x1234);
//! # Ok::<(), dsexec::Error>(())
//! ```

use crate::{Error::OutOfBounds, Result};

/// Trait for implementing type-specific safe binary data access.
///
/// Provides a unified interface for reading and writing primitive types from
/// byte slices in little-endian order. Each implementation defines a `Bytes`
/// associated type representing the fixed-size byte array for that type
/// (e.g. `[u8; 4]` for `u32`).
pub trait SpecIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]> + AsRef<[u8]>;

    /// Read `Self` from a byte array in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Write `Self` to a byte array in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_spec_io {
    ($($t:ty => $n:expr),* $(,)?) => {
        $(
            impl SpecIO for $t {
                type Bytes = [u8; $n];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$t>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$t>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_spec_io! {
    u8 => 1, i8 => 1,
    u16 => 2, i16 => 2,
    u32 => 4, i32 => 4,
    u64 => 8, i64 => 8,
}

/// Safely reads a value of type `T` in little-endian byte order at a
/// specific offset, advancing the offset by the number of bytes read.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at<T: SpecIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    if (type_len + *offset) > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..*offset + type_len].try_into() else {
        return Err(OutOfBounds);
    };

    *offset += type_len;

    Ok(T::from_le_bytes(read))
}

/// Safely writes a value of type `T` in little-endian byte order at a
/// specific offset, advancing the offset by the number of bytes written.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small.
pub fn write_le_at<T: SpecIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let type_len = std::mem::size_of::<T>();
    if (type_len + *offset) > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..*offset + type_len].copy_from_slice(value.to_le_bytes().as_ref());
    *offset += type_len;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_read_le_widths() {
        let data = [0x01, 0x02, 0x03, 0x04];
        assert_eq!(read_le_at::<u8>(&data, &mut 0).unwrap(), 0x01);
        assert_eq!(read_le_at::<u16>(&data, &mut 0).unwrap(), 0x0201);
        assert_eq!(read_le_at::<u32>(&data, &mut 0).unwrap(), 0x0403_0201);
        assert_eq!(read_le_at::<i32>(&data, &mut 0).unwrap(), 0x0403_0201);
    }

    #[test]
    fn test_read_le_at_advances() {
        let data = [0x01, 0x00, 0x02, 0x00];
        let mut offset = 0;
        let first: u16 = read_le_at(&data, &mut offset).unwrap();
        let second: u16 = read_le_at(&data, &mut offset).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(offset, 4);
    }

    #[test]
    fn test_read_le_out_of_bounds() {
        let data = [0x01, 0x02];
        assert!(matches!(
            read_le_at::<u32>(&data, &mut 0),
            Err(Error::OutOfBounds)
        ));

        let mut offset = 1;
        assert!(matches!(
            read_le_at::<u16>(&data, &mut offset),
            Err(Error::OutOfBounds)
        ));
        // Offset untouched on failure
        assert_eq!(offset, 1);
    }

    #[test]
    fn test_write_le_roundtrip() {
        let mut data = [0u8; 12];
        let mut offset = 0;
        write_le_at(&mut data, &mut offset, 0xDEAD_BEEFu32).unwrap();
        write_le_at(&mut data, &mut offset, -1i64).unwrap();
        assert_eq!(offset, 12);

        offset = 0;
        assert_eq!(read_le_at::<u32>(&data, &mut offset).unwrap(), 0xDEAD_BEEF);
        assert_eq!(read_le_at::<i64>(&data, &mut offset).unwrap(), -1);
    }

    #[test]
    fn test_write_le_out_of_bounds() {
        let mut data = [0u8; 2];
        let mut offset = 0;
        assert!(matches!(
            write_le_at(&mut data, &mut offset, 1u32),
            Err(Error::OutOfBounds)
        ));
        // Offset untouched on failure
        assert_eq!(offset, 0);
    }
}
