use std::collections::HashMap;

use crate::{
    file::{io::write_compressed_uint, parser::Parser},
    Result,
};

/// The `#Blob` heap: length-prefixed binary values such as signatures (ECMA-335 II.24.2.4).
pub struct Blob<'a> {
    data: &'a [u8],
}

impl<'a> Blob<'a> {
    /// Wrap the heap data.
    ///
    /// # Errors
    /// Returns an error if the heap does not start with the empty blob.
    pub fn from(data: &'a [u8]) -> Result<Blob<'a>> {
        if data.first() != Some(&0) {
            return Err(malformed_error!("Provided #Blob heap is invalid"));
        }

        Ok(Blob { data })
    }

    /// Get the blob starting at `index`, without its length prefix.
    ///
    /// # Errors
    /// Returns an error if `index` or the encoded length run past the heap.
    pub fn get(&self, index: usize) -> Result<&'a [u8]> {
        if index >= self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let mut parser = Parser::new(&self.data[index..]);
        let len = parser.read_compressed_uint()? as usize;
        parser.read_bytes(len)
    }
}

/// Builder for a `#Blob` heap; identical blobs share one entry.
#[derive(Debug, Clone)]
pub struct BlobBuilder {
    data: Vec<u8>,
    index: HashMap<Vec<u8>, u32>,
}

impl Default for BlobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobBuilder {
    /// Create a heap holding only the empty blob
    #[must_use]
    pub fn new() -> Self {
        BlobBuilder {
            data: vec![0],
            index: HashMap::new(),
        }
    }

    /// Add `value` and return its heap index. The empty blob is index 0.
    ///
    /// # Errors
    /// Returns an error if the blob is too large to be length-prefixed.
    pub fn add(&mut self, value: &[u8]) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }
        if let Some(index) = self.index.get(value) {
            return Ok(*index);
        }

        #[allow(clippy::cast_possible_truncation)]
        let index = self.data.len() as u32;
        #[allow(clippy::cast_possible_truncation)]
        write_compressed_uint(&mut self.data, value.len() as u32)?;
        self.data.extend_from_slice(value);
        self.index.insert(value.to_vec(), index);
        Ok(index)
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
        let data = [0x00, 0x03, 0x00, 0x00, 0x01, 0x02, 0x20, 0x00, 0x05];
        let blob = Blob::from(&data).unwrap();
        assert_eq!(blob.get(0).unwrap(), &[] as &[u8]);
        assert_eq!(blob.get(1).unwrap(), &[0x00, 0x00, 0x01]);
        assert_eq!(blob.get(5).unwrap(), &[0x20, 0x00]);
        // Length prefix claims more than is left
        assert!(blob.get(8).is_err());
    }

    #[test]
    fn builder_deduplicates() {
        let mut builder = BlobBuilder::new();
        let sig = builder.add(&[0x00, 0x00, 0x01]).unwrap();
        let other = builder.add(&[0x06, 0x08]).unwrap();
        assert_eq!(builder.add(&[0x00, 0x00, 0x01]).unwrap(), sig);
        assert_eq!(builder.add(&[]).unwrap(), 0);

        let data = builder.finish();
        let blob = Blob::from(&data).unwrap();
        assert_eq!(blob.get(other as usize).unwrap(), &[0x06, 0x08]);
    }
}
