//! The CLR runtime header (ECMA-335 II.25.3.3).
//!
//! The header sits at the RVA named by the CLR data directory of the PE optional header and
//! locates the metadata root. The writer leaves it where it is and patches the fields below in
//! place, so only the fields the crate reads or rewrites are modeled.

use crate::{file::parser::Parser, Result};

/// Size of the header, the only value of `cb`
pub const COR20_SIZE: usize = 72;
/// Offset of `MetaData.VirtualAddress`
pub const COR20_METADATA_RVA: usize = 8;
/// Offset of `MetaData.Size`
pub const COR20_METADATA_SIZE: usize = 12;
/// Offset of `EntryPointToken`
pub const COR20_ENTRY_POINT: usize = 20;

/// `COMIMAGE_FLAGS_ILONLY`
pub const COMIMAGE_FLAGS_ILONLY: u32 = 0x0000_0001;

/// The fields of the CLR runtime header the crate works with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cor20Header {
    /// Minimum runtime version, major part
    pub major_runtime_version: u16,
    /// Minimum runtime version, minor part
    pub minor_runtime_version: u16,
    /// RVA of the metadata root
    pub meta_data_rva: u32,
    /// Size of the metadata
    pub meta_data_size: u32,
    /// `COMIMAGE_FLAGS_*`
    pub flags: u32,
    /// Token of the entry point, a `MethodDef` or `File` row, 0 for libraries
    pub entry_point_token: u32,
}

impl Cor20Header {
    /// Parse the header at the start of `data`.
    ///
    /// # Errors
    /// Returns an error if `data` is shorter than the header, `cb` is not 72 or the header
    /// names no metadata.
    pub fn read(data: &[u8]) -> Result<Cor20Header> {
        if data.len() < COR20_SIZE {
            return Err(out_of_bounds_error!());
        }

        let mut parser = Parser::new(data);
        let cb = parser.read_le::<u32>()?;
        if cb as usize != COR20_SIZE {
            return Err(malformed_error!(
                "Invalid CLR header size: expected 72, got {}",
                cb
            ));
        }

        let major_runtime_version = parser.read_le::<u16>()?;
        let minor_runtime_version = parser.read_le::<u16>()?;
        let meta_data_rva = parser.read_le::<u32>()?;
        let meta_data_size = parser.read_le::<u32>()?;
        if meta_data_rva == 0 || meta_data_size == 0 {
            return Err(malformed_error!("CLR header names no metadata"));
        }
        let flags = parser.read_le::<u32>()?;
        let entry_point_token = parser.read_le::<u32>()?;

        Ok(Cor20Header {
            major_runtime_version,
            minor_runtime_version,
            meta_data_rva,
            meta_data_size,
            flags,
            entry_point_token,
        })
    }

    /// Append the header to `buffer`; resources, strong name and fixup directories are empty.
    pub fn write(&self, buffer: &mut Vec<u8>) {
        let start = buffer.len();
        #[allow(clippy::cast_possible_truncation)]
        buffer.extend_from_slice(&(COR20_SIZE as u32).to_le_bytes());
        buffer.extend_from_slice(&self.major_runtime_version.to_le_bytes());
        buffer.extend_from_slice(&self.minor_runtime_version.to_le_bytes());
        buffer.extend_from_slice(&self.meta_data_rva.to_le_bytes());
        buffer.extend_from_slice(&self.meta_data_size.to_le_bytes());
        buffer.extend_from_slice(&self.flags.to_le_bytes());
        buffer.extend_from_slice(&self.entry_point_token.to_le_bytes());
        buffer.resize(start + COR20_SIZE, 0);
    }
}
