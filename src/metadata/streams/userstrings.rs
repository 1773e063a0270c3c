use std::collections::HashMap;

use widestring::{U16Str, U16String};

use crate::{
    file::{io::write_compressed_uint, parser::Parser},
    Result,
};

/// The `#US` heap: length-prefixed UTF-16 string literals used by `ldstr` (ECMA-335 II.24.2.4).
pub struct UserStrings<'a> {
    data: &'a [u8],
}

impl<'a> UserStrings<'a> {
    /// Wrap the heap data.
    ///
    /// # Errors
    /// Returns an error if the heap does not start with the empty entry.
    pub fn from(data: &'a [u8]) -> Result<UserStrings<'a>> {
        if data.first() != Some(&0) {
            return Err(malformed_error!("Provided #US heap is invalid"));
        }

        Ok(UserStrings { data })
    }

    /// Get the string literal at `index`.
    ///
    /// # Errors
    /// Returns an error for out of range indices or an entry with an even byte length.
    pub fn get(&self, index: usize) -> Result<U16String> {
        if index >= self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let mut parser = Parser::new(&self.data[index..]);
        let len = parser.read_compressed_uint()? as usize;
        if len == 0 {
            return Ok(U16String::new());
        }
        if len % 2 != 1 {
            return Err(malformed_error!(
                "Invalid string data length at index - {}",
                index
            ));
        }

        let bytes = parser.read_bytes(len - 1)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Ok(U16String::from_vec(units))
    }
}

/// Builder for a `#US` heap; identical literals share one entry.
#[derive(Debug, Clone)]
pub struct UserStringsBuilder {
    data: Vec<u8>,
    index: HashMap<U16String, u32>,
}

impl Default for UserStringsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStringsBuilder {
    /// Create a heap holding only the empty entry
    #[must_use]
    pub fn new() -> Self {
        UserStringsBuilder {
            data: vec![0],
            index: HashMap::new(),
        }
    }

    /// Add `value` and return its heap index.
    ///
    /// # Errors
    /// Returns an error if the literal is too long to be length-prefixed.
    pub fn add(&mut self, value: &U16Str) -> Result<u32> {
        if let Some(index) = self.index.get(value) {
            return Ok(*index);
        }

        #[allow(clippy::cast_possible_truncation)]
        let index = self.data.len() as u32;
        #[allow(clippy::cast_possible_truncation)]
        write_compressed_uint(&mut self.data, (value.len() * 2 + 1) as u32)?;
        for unit in value.as_slice() {
            self.data.extend_from_slice(&unit.to_le_bytes());
        }
        self.data.push(u8::from(needs_special_handling(value)));
        self.index.insert(value.to_ustring(), index);
        Ok(index)
    }

    /// Finish the heap, padded to 4 bytes
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        crate::file::io::pad_to(&mut self.data, 4);
        self.data
    }
}

/// Terminal byte rule of ECMA-335 II.24.2.4
fn needs_special_handling(value: &U16Str) -> bool {
    value.as_slice().iter().any(|unit| {
        let [low, high] = unit.to_le_bytes();
        high != 0 || matches!(low, 0x01..=0x08 | 0x0E..=0x1F | 0x27 | 0x2D | 0x7F)
    })
}
