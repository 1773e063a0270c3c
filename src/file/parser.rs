//! Low-level byte cursor for metadata, signature and method body decoding.
//!
//! [`Parser`] wraps a byte slice with a position and offers the primitive reads the rest of the
//! crate is built on: fixed-size little-endian integers, ECMA-335 compressed integers, compressed
//! `TypeDefOrRef` tokens, and NUL-terminated strings. Every read is bounds-checked and fails with
//! [`crate::Error::OutOfBounds`] instead of panicking.
//!
//! # Example
//!
//! ```rust
//! use cilpatch::Parser;
//!
//! let data = [0x07, 0x02, 0x08, 0x0E];
//! let mut parser = Parser::new(&data);
//! assert_eq!(parser.read_le::<u8>()?, 0x07);
//! assert_eq!(parser.read_compressed_uint()?, 2);
//! # Ok::<(), cilpatch::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, CilIO},
    metadata::token::Token,
    Result,
};

/// A cursor over a byte slice.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser positioned at the start of `data`
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Total length of the underlying slice
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the underlying slice is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True if the cursor has not yet reached the end
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Move the cursor to an absolute position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` is past the end.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Advance the cursor by `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if that would pass the end.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        self.position = self.calc_end_position(step)?;
        Ok(())
    }

    /// Current cursor position
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// The underlying slice
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Number of bytes left after the cursor
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Look at the next byte without consuming it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn peek_byte(&self) -> Result<u8> {
        self.data
            .get(self.position)
            .copied()
            .ok_or(out_of_bounds_error!())
    }

    /// Skip padding until the cursor is a multiple of `alignment`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the padding runs past the end.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = (alignment - (self.position % alignment)) % alignment;
        self.advance_by(padding)
    }

    /// Read a little-endian value.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough data remains.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read a compressed unsigned integer (ECMA-335 II.23.2).
    ///
    /// # Errors
    /// Returns an error on truncated data or an invalid length prefix.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_le::<u8>()?;

        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_le::<u8>()?;
            let value = ((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte);
            return Ok(value);
        }

        if (first_byte & 0xE0) == 0xC0 {
            let b1 = u32::from(self.read_le::<u8>()?);
            let b2 = u32::from(self.read_le::<u8>()?);
            let b3 = u32::from(self.read_le::<u8>()?);
            let value = ((u32::from(first_byte) & 0x1F) << 24) | (b1 << 16) | (b2 << 8) | b3;
            return Ok(value);
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Read a compressed signed integer (ECMA-335 II.23.2).
    ///
    /// The value is stored rotated left by one with the sign in bit 0, in 7, 14 or 29 bits
    /// depending on the encoded width.
    ///
    /// # Errors
    /// Returns an error on truncated data or an invalid length prefix.
    pub fn read_compressed_int(&mut self) -> Result<i32> {
        let width = match self.peek_byte()? {
            b if b & 0x80 == 0 => 7,
            b if b & 0xC0 == 0x80 => 14,
            _ => 29,
        };
        let unsigned = self.read_compressed_uint()?;

        let magnitude = unsigned >> 1;
        #[allow(clippy::cast_possible_wrap)]
        let value = if unsigned & 1 == 0 {
            magnitude as i32
        } else {
            (magnitude | (u32::MAX << (width - 1))) as i32
        };

        Ok(value)
    }

    /// Read a compressed `TypeDefOrRef` coded index as used inside signatures.
    ///
    /// # Errors
    /// Returns an error on truncated data or an invalid table tag.
    pub fn read_compressed_token(&mut self) -> Result<Token> {
        let compressed_token = self.read_compressed_uint()?;

        let table: u32 = match compressed_token & 0x3 {
            0x0 => 0x0200_0000, // TypeDef
            0x1 => 0x0100_0000, // TypeRef
            0x2 => 0x1B00_0000, // TypeSpec
            _ => {
                return Err(malformed_error!(
                    "Invalid compressed token - {}",
                    compressed_token
                ))
            }
        };

        Ok(Token::new(table + (compressed_token >> 2)))
    }

    /// Read `length` raw bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough data remains.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self.calc_end_position(length)?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Read a NUL-terminated UTF-8 string and consume the terminator.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on invalid UTF-8.
    pub fn read_string_utf8(&mut self) -> Result<String> {
        let start = self.position;
        let mut end = start;

        while end < self.data.len() && self.data[end] != 0 {
            end += 1;
        }

        let string_data = &self.data[start..end];

        if end < self.data.len() {
            self.position = end + 1;
        } else {
            self.position = end;
        }

        String::from_utf8(string_data.to_vec()).map_err(|e| {
            malformed_error!(
                "Invalid UTF-8 string at offset {}-{}: {}",
                start,
                end,
                e.utf8_error()
            )
        })
    }

    fn calc_end_position(&self, length: usize) -> Result<usize> {
        let end = self
            .position
            .checked_add(length)
            .ok_or(out_of_bounds_error!())?;

        if end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_uint() {
        let data = [0x03, 0x80, 0x80, 0xAE, 0x57, 0xC0, 0x00, 0x40, 0x00];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_compressed_uint().unwrap(), 0x03);
        assert_eq!(parser.read_compressed_uint().unwrap(), 0x80);
        assert_eq!(parser.read_compressed_uint().unwrap(), 0x2E57);
        assert_eq!(parser.read_compressed_uint().unwrap(), 0x4000);
        assert!(!parser.has_more_data());
    }

    #[test]
    fn compressed_uint_invalid_prefix() {
        let data = [0xFF];
        let mut parser = Parser::new(&data);
        assert!(parser.read_compressed_uint().is_err());
    }

    #[test]
    fn compressed_int() {
        // Values from ECMA-335 II.23.2
        let data = [0x06, 0x7B, 0x80, 0x80, 0x80, 0x01, 0xC0, 0x00, 0x00, 0x01];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_compressed_int().unwrap(), 3);
        assert_eq!(parser.read_compressed_int().unwrap(), -3);
        assert_eq!(parser.read_compressed_int().unwrap(), 64);
        assert_eq!(parser.read_compressed_int().unwrap(), -8192);
        assert_eq!(parser.read_compressed_int().unwrap(), -268_435_456);
    }

    #[test]
    fn compressed_token() {
        // TypeRef row 3 => (3 << 2) | 1
        let data = [0x0D, 0x08, 0x0B];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_compressed_token().unwrap(), Token::new(0x0100_0003));
        assert_eq!(parser.read_compressed_token().unwrap(), Token::new(0x0200_0002));
        assert!(parser.read_compressed_token().is_err());
    }

    #[test]
    fn strings_and_alignment() {
        let data = b"#~\0\0#Strings\0\0\0\0";
        let mut parser = Parser::new(data);
        assert_eq!(parser.read_string_utf8().unwrap(), "#~");
        parser.align(4).unwrap();
        assert_eq!(parser.pos(), 4);
        assert_eq!(parser.read_string_utf8().unwrap(), "#Strings");
        parser.align(4).unwrap();
        assert_eq!(parser.pos(), 16);
    }

    #[test]
    fn bounds() {
        let data = [1, 2, 3];
        let mut parser = Parser::new(&data);
        assert!(parser.read_bytes(4).is_err());
        assert_eq!(parser.read_bytes(2).unwrap(), &[1, 2]);
        assert_eq!(parser.remaining(), 1);
        assert_eq!(parser.peek_byte().unwrap(), 3);
        assert!(parser.seek(4).is_err());
        parser.seek(3).unwrap();
        assert!(parser.peek_byte().is_err());
    }
}
