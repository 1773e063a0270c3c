use crate::Result;

/// The `#GUID` heap: a 1-based array of 16 byte GUIDs (ECMA-335 II.24.2.5).
pub struct Guid<'a> {
    data: &'a [u8],
}

impl<'a> Guid<'a> {
    /// Wrap the heap data
    ///
    /// # Errors
    /// Returns an error if the heap size is not a multiple of 16.
    pub fn from(data: &'a [u8]) -> Result<Guid<'a>> {
        if data.len() % 16 != 0 {
            return Err(malformed_error!("Data for #GUID heap has an invalid size"));
        }

        Ok(Guid { data })
    }

    /// Get the GUID at the 1-based `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for index 0 or past the end.
    pub fn get(&self, index: usize) -> Result<uguid::Guid> {
        if index < 1 || index * 16 > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let mut buffer = [0u8; 16];
        buffer.copy_from_slice(&self.data[(index - 1) * 16..index * 16]);

        Ok(uguid::Guid::from_bytes(buffer))
    }
}

/// Builder for a `#GUID` heap.
#[derive(Debug, Clone, Default)]
pub struct GuidBuilder {
    data: Vec<u8>,
}

impl GuidBuilder {
    /// Create an empty heap
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `guid` and return its 1-based index
    pub fn add(&mut self, guid: uguid::Guid) -> u32 {
        self.data.extend_from_slice(&guid.to_bytes());
        #[allow(clippy::cast_possible_truncation)]
        let index = (self.data.len() / 16) as u32;
        index
    }

    /// Finish the heap
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let data : [u8; 32] = [
            0x8e, 0x90, 0x37, 0xd4, 0xe6, 0x65, 0x7c, 0x48, 0x97, 0x35, 0x7b, 0xdf, 0xf6, 0x99, 0xbe, 0xa5,
            0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA,
        ];

        let guids = Guid::from(&data).unwrap();
        assert_eq!(
            guids.get(1).unwrap(),
            uguid::guid!("d437908e-65e6-487c-9735-7bdff699bea5")
        );
        assert_eq!(
            guids.get(2).unwrap(),
            uguid::guid!("AAAAAAAA-AAAA-AAAA-AAAA-AAAAAAAAAAAA")
        );
        assert!(guids.get(0).is_err());
        assert!(guids.get(3).is_err());
    }

    #[test]
    fn builder() {
        let mut builder = GuidBuilder::new();
        let mvid = uguid::guid!("d437908e-65e6-487c-9735-7bdff699bea5");
        assert_eq!(builder.add(mvid), 1);
        let data = builder.finish();
        assert_eq!(Guid::from(&data).unwrap().get(1).unwrap(), mvid);
    }
}
