//! Memory-mapped file backend.

use super::Backend;
use crate::{
    Error::{Error, FileError},
    Result,
};

use memmap2::Mmap;
use std::{fs, path::Path};

/// A module image mapped read-only from disk.
///
/// The mapping lives as long as this value; dropping it releases the file so it can be renamed
/// or deleted.
#[derive(Debug)]
pub struct Physical {
    data: Mmap,
}

impl Physical {
    /// Map the file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened and
    /// [`crate::Error::Error`] if it cannot be mapped.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(error) => return Err(FileError(error)),
        };

        // Zero-length files can not be mapped on every platform
        if file.metadata()?.len() == 0 {
            return Err(crate::Error::Empty);
        }

        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(error) => return Err(Error(error.to_string())),
        };

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn maps_file_contents() {
        let mut temp = tempfile::NamedTempFile::new().unwrap();
        temp.write_all(b"BSJB\x01\x00").unwrap();
        temp.flush().unwrap();

        let physical = Physical::new(temp.path()).unwrap();
        assert_eq!(physical.len(), 6);
        assert_eq!(&physical.data()[..4], b"BSJB");
        assert_eq!(physical.data_slice(4, 2).unwrap(), &[1, 0]);
        assert!(physical.data_slice(4, 3).is_err());
    }

    #[test]
    fn missing_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Physical::new(dir.path().join("missing.dll")),
            Err(FileError(_))
        ));

        let empty = dir.path().join("empty.dll");
        fs::write(&empty, b"").unwrap();
        assert!(matches!(Physical::new(&empty), Err(crate::Error::Empty)));
    }
}
