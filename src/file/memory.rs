//! In-memory backend.

use super::Backend;

/// A module image held in an owned buffer.
#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Wrap an owned buffer
    pub fn new(data: Vec<u8>) -> Memory {
        Memory { data }
    }
}

impl Backend for Memory {
    fn data(&self) -> &[u8] {
        self.data.as_slice()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory() {
        let mut data = vec![0xCC_u8; 64];
        data[10] = 0xBB;
        data[11] = 0xBB;

        let memory = Memory::new(data);
        assert_eq!(memory.len(), 64);
        assert_eq!(memory.data_slice(10, 2).unwrap(), &[0xBB, 0xBB]);
        assert_eq!(memory.data_slice(12, 1).unwrap(), &[0xCC]);
        assert!(memory.data_slice(60, 5).is_err());
        assert!(memory.data_slice(usize::MAX, 2).is_err());
    }
}
