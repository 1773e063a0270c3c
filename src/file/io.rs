//! Little-endian reading and writing primitives.
//!
//! All multi-byte values in a module image are little-endian. Reads are bounds-checked against
//! the input slice and advance a caller-owned offset; writes append to a growable buffer, since
//! every output the crate produces is assembled in memory before it is flushed.

use crate::Result;

/// Trait for primitive integers that can be read from and written to a module image.
pub trait CilIO: Sized + Copy {
    /// Fixed-size byte representation of the type
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Build a value from its little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Convert the value to its little-endian bytes
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $n:literal),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $n];

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

impl_cil_io!(
    u8 => 1, i8 => 1,
    u16 => 2, i16 => 2,
    u32 => 4, i32 => 4,
    u64 => 8, i64 => 8,
    f32 => 4, f64 => 8,
);

/// Read a value from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is too short.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Read a value at `offset` and advance `offset` past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would pass the end of `data`.
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

/// Read a 2 or 4 byte index, depending on `is_large`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would pass the end of `data`.
pub fn read_le_at_dyn(data: &[u8], offset: &mut usize, is_large: bool) -> Result<u32> {
    let res = if is_large {
        read_le_at::<u32>(data, offset)?
    } else {
        u32::from(read_le_at::<u16>(data, offset)?)
    };

    Ok(res)
}

/// Append a value to `buffer`.
pub fn write_le<T: CilIO>(buffer: &mut Vec<u8>, value: T) {
    buffer.extend_from_slice(value.to_le_bytes().as_ref());
}

/// Append a 2 or 4 byte index, depending on `is_large`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if a small index is requested for a value that does not
/// fit in 16 bits.
pub fn write_le_dyn(buffer: &mut Vec<u8>, value: u32, is_large: bool) -> Result<()> {
    if is_large {
        write_le::<u32>(buffer, value);
    } else {
        let Ok(small) = u16::try_from(value) else {
            return Err(malformed_error!(
                "Index {} does not fit a 2-byte column",
                value
            ));
        };
        write_le::<u16>(buffer, small);
    }

    Ok(())
}

/// Overwrite a `u32` at `offset` in an already assembled buffer.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the patch would pass the end of `buffer`.
pub fn patch_u32(buffer: &mut [u8], offset: usize, value: u32) -> Result<()> {
    let Some(slot) = buffer.get_mut(offset..offset + 4) else {
        return Err(out_of_bounds_error!());
    };
    slot.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Overwrite two bytes at `offset` with `value`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the patch would pass the end of `buffer`.
pub fn patch_u16(buffer: &mut [u8], offset: usize, value: u16) -> Result<()> {
    let Some(slot) = buffer.get_mut(offset..offset + 2) else {
        return Err(out_of_bounds_error!());
    };
    slot.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Append an ECMA-335 compressed unsigned integer (II.23.2).
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for values above `0x1FFF_FFFF`.
pub fn write_compressed_uint(buffer: &mut Vec<u8>, value: u32) -> Result<()> {
    if value <= 0x7F {
        #[allow(clippy::cast_possible_truncation)]
        buffer.push(value as u8);
    } else if value <= 0x3FFF {
        #[allow(clippy::cast_possible_truncation)]
        buffer.extend_from_slice(&[0x80 | (value >> 8) as u8, value as u8]);
    } else if value <= 0x1FFF_FFFF {
        #[allow(clippy::cast_possible_truncation)]
        buffer.extend_from_slice(&[
            0xC0 | (value >> 24) as u8,
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
        ]);
    } else {
        return Err(malformed_error!(
            "Value {} is too large for a compressed integer",
            value
        ));
    }

    Ok(())
}

/// Append an ECMA-335 compressed signed integer (II.23.2).
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for values outside `-2^28..2^28`.
pub fn write_compressed_int(buffer: &mut Vec<u8>, value: i32) -> Result<()> {
    #[allow(clippy::cast_sign_loss)]
    let rotated = |bits: u32| -> u32 {
        let mask = (1u32 << bits) - 1;
        (((value as u32) << 1) & mask) | u32::from(value < 0)
    };

    if (-64..64).contains(&value) {
        write_compressed_uint(buffer, rotated(7))
    } else if (-8192..8192).contains(&value) {
        let encoded = rotated(14);
        #[allow(clippy::cast_possible_truncation)]
        buffer.extend_from_slice(&[0x80 | (encoded >> 8) as u8, encoded as u8]);
        Ok(())
    } else if (-0x1000_0000..0x1000_0000).contains(&value) {
        let encoded = rotated(29);
        #[allow(clippy::cast_possible_truncation)]
        buffer.extend_from_slice(&[
            0xC0 | (encoded >> 24) as u8,
            (encoded >> 16) as u8,
            (encoded >> 8) as u8,
            encoded as u8,
        ]);
        Ok(())
    } else {
        Err(malformed_error!(
            "Value {} is out of range for a compressed signed integer",
            value
        ))
    }
}

/// Round `value` up to the next multiple of `alignment`.
#[must_use]
pub fn align_to(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

/// Append zero bytes until `buffer` is a multiple of `alignment` long.
pub fn pad_to(buffer: &mut Vec<u8>, alignment: usize) {
    let target = align_to(buffer.len(), alignment);
    buffer.resize(target, 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn read_le_values() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05];
        let mut offset = 0;
        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 0x0201);
        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 0x0403);
        assert_eq!(offset, 4);
        assert!(matches!(
            read_le_at::<u16>(&data, &mut offset),
            Err(Error::OutOfBounds { .. })
        ));
        assert_eq!(offset, 4);
    }

    #[test]
    fn read_dyn_sizes() {
        let data = [0xAA, 0xBB, 0xCC, 0xDD];
        let mut offset = 0;
        assert_eq!(read_le_at_dyn(&data, &mut offset, false).unwrap(), 0xBBAA);
        offset = 0;
        assert_eq!(read_le_at_dyn(&data, &mut offset, true).unwrap(), 0xDDCC_BBAA);
    }

    #[test]
    fn write_dyn_rejects_oversized_small_index() {
        let mut buffer = Vec::new();
        write_le_dyn(&mut buffer, 0x1234, false).unwrap();
        assert_eq!(buffer, [0x34, 0x12]);
        assert!(write_le_dyn(&mut buffer, 0x1_0000, false).is_err());
    }

    #[test]
    fn compressed_uint_encodings() {
        // Values from ECMA-335 II.23.2
        let cases: [(u32, &[u8]); 6] = [
            (0x03, &[0x03]),
            (0x7F, &[0x7F]),
            (0x80, &[0x80, 0x80]),
            (0x2E57, &[0xAE, 0x57]),
            (0x3FFF, &[0xBF, 0xFF]),
            (0x4000, &[0xC0, 0x00, 0x40, 0x00]),
        ];
        for (value, expected) in cases {
            let mut buffer = Vec::new();
            write_compressed_uint(&mut buffer, value).unwrap();
            assert_eq!(buffer, expected, "value 0x{value:X}");
        }

        let mut buffer = Vec::new();
        assert!(write_compressed_uint(&mut buffer, 0x2000_0000).is_err());
    }

    #[test]
    fn compressed_int_encodings() {
        let cases: [(i32, &[u8]); 5] = [
            (3, &[0x06]),
            (-3, &[0x7B]),
            (64, &[0x80, 0x80]),
            (-8192, &[0x80, 0x01]),
            (-268_435_456, &[0xC0, 0x00, 0x00, 0x01]),
        ];
        for (value, expected) in cases {
            let mut buffer = Vec::new();
            write_compressed_int(&mut buffer, value).unwrap();
            assert_eq!(buffer, expected, "value {value}");
        }
    }

    #[test]
    fn alignment_helpers() {
        assert_eq!(align_to(0, 4), 0);
        assert_eq!(align_to(5, 4), 8);
        let mut buffer = vec![1, 2, 3];
        pad_to(&mut buffer, 4);
        assert_eq!(buffer, [1, 2, 3, 0]);
    }

    #[test]
    fn patch_u32_in_place() {
        let mut buffer = vec![0u8; 6];
        patch_u32(&mut buffer, 2, 0xDEAD_BEEF).unwrap();
        assert_eq!(buffer, [0, 0, 0xEF, 0xBE, 0xAD, 0xDE]);
        assert!(patch_u32(&mut buffer, 4, 1).is_err());
        patch_u16(&mut buffer, 4, 0x0102).unwrap();
        assert_eq!(&buffer[4..], &[0x02, 0x01]);
        assert!(patch_u16(&mut buffer, 5, 1).is_err());
    }
}
