//! Memory-mapped output file.
//!
//! [`Output`] creates the target file at its final size, maps it writable and lets the caller
//! fill it in place. A file that is dropped without [`Output::finalize`] is deleted again, so an
//! aborted write never leaves a half-written module behind under a name a later run would pick up.

use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::{Error, Result};

/// A writable, memory-mapped output file.
pub struct Output {
    mmap: MmapMut,

    target_path: PathBuf,

    finalized: bool,
}

impl Output {
    /// Create (or truncate) the file at `target_path` with `size` bytes and map it.
    ///
    /// # Errors
    /// Returns [`Error::WriteFailed`] if the file can not be created, sized or mapped.
    pub fn create<P: AsRef<Path>>(target_path: P, size: u64) -> Result<Self> {
        let target_path = target_path.as_ref().to_path_buf();
        if size == 0 {
            return Err(Error::WriteFailed {
                message: format!("Refusing to write empty file {}", target_path.display()),
            });
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&target_path)
            .map_err(|e| Error::WriteFailed {
                message: format!("Failed to create target file: {e}"),
            })?;

        file.set_len(size).map_err(|e| Error::WriteFailed {
            message: format!("Failed to set file size: {e}"),
        })?;

        let mmap = unsafe {
            MmapOptions::new()
                .map_mut(&file)
                .map_err(|e| Error::WriteFailed {
                    message: format!("Failed to create memory mapping: {e}"),
                })?
        };

        Ok(Self {
            mmap,
            target_path,
            finalized: false,
        })
    }

    /// Create `target_path` holding exactly `data`, and finalize it.
    ///
    /// # Errors
    /// Returns [`Error::WriteFailed`] if any step of the write fails.
    pub fn write_file<P: AsRef<Path>>(target_path: P, data: &[u8]) -> Result<()> {
        let mut output = Output::create(target_path, data.len() as u64)?;
        output.write_at(0, data)?;
        output.finalize()
    }

    /// Copy `data` into the file at `offset`.
    ///
    /// # Errors
    /// Returns [`Error::WriteFailed`] if the write would exceed the file size.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let Ok(start) = usize::try_from(offset) else {
            return Err(Error::WriteFailed {
                message: format!("Offset {offset} does not fit the address space"),
            });
        };
        let end = start + data.len();

        if end > self.mmap.len() {
            return Err(Error::WriteFailed {
                message: format!(
                    "Write would exceed file size: offset={}, len={}, file_size={}",
                    offset,
                    data.len(),
                    self.mmap.len()
                ),
            });
        }

        self.mmap[start..end].copy_from_slice(data);
        Ok(())
    }

    /// Size of the mapped file in bytes
    pub fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Flush pending writes to disk.
    ///
    /// # Errors
    /// Returns [`Error::WriteFailed`] if the flush fails.
    pub fn flush(&mut self) -> Result<()> {
        self.mmap.flush().map_err(|e| Error::WriteFailed {
            message: format!("Failed to flush memory mapping: {e}"),
        })
    }

    /// Flush the file and keep it on disk.
    ///
    /// # Errors
    /// Returns [`Error::WriteFailed`] if the final flush fails; the file is removed in that case.
    pub fn finalize(mut self) -> Result<()> {
        self.mmap.flush().map_err(|e| Error::WriteFailed {
            message: format!("Failed to flush memory mapping: {e}"),
        })?;

        self.finalized = true;
        Ok(())
    }

    /// Path the output is written to
    pub fn target_path(&self) -> &Path {
        &self.target_path
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = self.flush();
            let _ = std::fs::remove_file(&self.target_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_write_finalize() {
        let temp_dir = tempdir().unwrap();
        let target_path = temp_dir.path().join("test.bin");

        let mut output = Output::create(&target_path, 8).unwrap();
        assert_eq!(output.size(), 8);
        output.write_at(0, b"BSJB").unwrap();
        output.write_at(4, &[1, 0, 1, 0]).unwrap();
        assert!(output.write_at(6, &[0; 4]).is_err());
        output.finalize().unwrap();

        assert_eq!(std::fs::read(&target_path).unwrap(), b"BSJB\x01\x00\x01\x00");
    }

    #[test]
    fn unfinalized_output_is_removed() {
        let temp_dir = tempdir().unwrap();
        let target_path = temp_dir.path().join("partial.bin");

        {
            let mut output = Output::create(&target_path, 16).unwrap();
            output.write_at(0, &[0xAA; 4]).unwrap();
            assert!(target_path.exists());
        }

        assert!(!target_path.exists());
    }

    #[test]
    fn write_file_helper() {
        let temp_dir = tempdir().unwrap();
        let target_path = temp_dir.path().join("whole.bin");

        Output::write_file(&target_path, &[1, 2, 3]).unwrap();
        assert_eq!(std::fs::read(&target_path).unwrap(), [1, 2, 3]);
        assert!(Output::write_file(temp_dir.path().join("empty.bin"), &[]).is_err());
    }
}
