use std::collections::HashMap;

use crate::Result;

/// The `#Strings` heap: NUL-terminated UTF-8 identifiers (ECMA-335 II.24.2.3).
pub struct Strings<'a> {
    data: &'a [u8],
}

impl<'a> Strings<'a> {
    /// Wrap the heap data.
    ///
    /// # Errors
    /// Returns an error if the heap does not start with the mandatory empty string.
    pub fn from(data: &'a [u8]) -> Result<Strings<'a>> {
        if data.first() != Some(&0) {
            return Err(malformed_error!("Provided #Strings heap is invalid"));
        }

        Ok(Strings { data })
    }

    /// Get the string starting at `index`.
    ///
    /// # Errors
    /// Returns an error if `index` is out of range, unterminated or not UTF-8.
    pub fn get(&self, index: usize) -> Result<&'a str> {
        if index >= self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let Some(len) = self.data[index..].iter().position(|b| *b == 0) else {
            return Err(malformed_error!("String at index {} is not terminated", index));
        };

        std::str::from_utf8(&self.data[index..index + len])
            .map_err(|_| malformed_error!("Invalid string at index - {}", index))
    }
}

/// Builder for a `#Strings` heap; identical strings share one entry.
#[derive(Debug, Clone)]
pub struct StringsBuilder {
    data: Vec<u8>,
    index: HashMap<String, u32>,
}

impl Default for StringsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StringsBuilder {
    /// Create a heap holding only the empty string
    #[must_use]
    pub fn new() -> Self {
        StringsBuilder {
            data: vec![0],
            index: HashMap::new(),
        }
    }

    /// Add `value` and return its heap index. The empty string is index 0.
    pub fn add(&mut self, value: &str) -> u32 {
        if value.is_empty() {
            return 0;
        }
        if let Some(index) = self.index.get(value) {
            return *index;
        }

        #[allow(clippy::cast_possible_truncation)]
        let index = self.data.len() as u32;
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        self.index.insert(value.to_string(), index);
        index
    }

    /// Finish the heap, padded to 4 bytes
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        crate::file::io::pad_to(&mut self.data, 4);
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        let data = b"\0<Module>\0GameContext\0Awake\0";
        let strings = Strings::from(data).unwrap();
        assert_eq!(strings.get(0).unwrap(), "");
        assert_eq!(strings.get(1).unwrap(), "<Module>");
        assert_eq!(strings.get(10).unwrap(), "GameContext");
        assert_eq!(strings.get(14).unwrap(), "Context");
        assert!(strings.get(data.len()).is_err());
    }

    #[test]
    fn invalid() {
        assert!(Strings::from(b"").is_err());
        assert!(Strings::from(b"A\0").is_err());
        let strings = Strings::from(b"\0abc").unwrap();
        assert!(strings.get(1).is_err());
    }

    #[test]
    fn builder_deduplicates() {
        let mut builder = StringsBuilder::new();
        assert_eq!(builder.add(""), 0);
        let awake = builder.add("Awake");
        let ctx = builder.add("GameContext");
        assert_eq!(awake, 1);
        assert_eq!(builder.add("Awake"), awake);

        let data = builder.finish();
        assert_eq!(data.len() % 4, 0);
        let strings = Strings::from(&data).unwrap();
        assert_eq!(strings.get(ctx as usize).unwrap(), "GameContext");
    }
}
