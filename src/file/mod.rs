//! Input and output of module images.
//!
//! [`File`] gives uniform read access to a module image regardless of where it came from: a
//! memory-mapped file on disk ([`physical::Physical`]) or an owned buffer ([`memory::Memory`]).
//! Opening a file parses its PE headers through [`pe::PeLayout`], so every `File` is known to
//! be a managed image. [`output::Output`] is the write side, a memory-mapped file that removes
//! itself unless it is finalized. The [`io`] and [`parser`] modules hold the primitive readers
//! and writers used by all metadata code.

pub mod io;
mod memory;
pub mod output;
pub mod parser;
pub mod pe;
mod physical;

use std::path::{Path, PathBuf};

use goblin::pe::section_table::SectionTable;
use memory::Memory;
use pe::PeLayout;
use physical::Physical;

use crate::Result;

/// Backing storage of a [`File`].
pub trait Backend: Send + Sync {
    /// Returns a bounds-checked slice of the data.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the data.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(out_of_bounds_error!());
        };

        if offset_end > self.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(&self.data()[offset..offset_end])
    }

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;
}

/// A module image opened for reading.
pub struct File {
    data: Box<dyn Backend>,
    layout: PeLayout,
    path: Option<PathBuf>,
}

impl File {
    /// Memory-map the file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file can not be opened or mapped, or is not a managed PE image.
    pub fn from_file(path: &Path) -> Result<File> {
        let backend = Physical::new(path)?;
        let mut file = File::load(Box::new(backend))?;
        file.path = Some(path.to_path_buf());
        Ok(file)
    }

    /// Wrap an owned buffer.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] if `data` is empty, or an error if it is not a managed
    /// PE image.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        File::load(Box::new(Memory::new(data)))
    }

    fn load(data: Box<dyn Backend>) -> Result<File> {
        if data.len() == 0 {
            return Err(crate::Error::Empty);
        }

        let layout = PeLayout::parse(data.data())?;
        Ok(File {
            data,
            layout,
            path: None,
        })
    }

    /// RVA and size of the CLR runtime header
    #[must_use]
    pub fn clr(&self) -> (u32, u32) {
        (self.layout.clr_rva, self.layout.clr_size)
    }

    /// Section headers in table order
    pub fn sections(&self) -> impl Iterator<Item = &SectionTable> {
        self.layout.sections.iter()
    }

    /// Parsed PE headers
    #[must_use]
    pub fn layout(&self) -> &PeLayout {
        &self.layout
    }

    /// Convert an RVA to a file offset.
    ///
    /// # Errors
    /// Returns an error if no section holds file data for `rva`.
    pub fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        self.layout.rva_to_offset(rva)
    }

    /// Bounds-checked slice of the image starting at `rva`.
    ///
    /// # Errors
    /// Returns an error if `rva` is unmapped or the range exceeds the image.
    pub fn rva_slice(&self, rva: u32, len: usize) -> Result<&[u8]> {
        self.data_slice(self.rva_to_offset(rva)?, len)
    }

    /// Entire content of the image
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }

    /// Bounds-checked slice of the image.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the image.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.data.data_slice(offset, len)
    }

    /// Size of the image in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the image holds no data
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 0
    }

    /// Path the image was mapped from, if any
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
