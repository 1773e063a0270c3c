use crate::{
    file::io::{pad_to, read_le_at, write_le},
    Result,
};

/// Stream names a module image may carry
pub const STREAM_NAMES: [&str; 5] = ["#~", "#Strings", "#US", "#GUID", "#Blob"];

/// A stream header of the metadata root (ECMA-335 II.24.2.2).
///
/// `offset` is relative to the start of the metadata root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamHeader {
    /// Offset of the stream, relative to the metadata root
    pub offset: u32,
    /// Size of the stream in bytes, a multiple of 4
    pub size: u32,
    /// Name of the stream
    pub name: String,
}

impl StreamHeader {
    /// Read a stream header at `offset` and advance past its padded name.
    ///
    /// # Errors
    /// Returns an error for truncated data, an unterminated or unknown name.
    pub fn read(data: &[u8], offset: &mut usize) -> Result<StreamHeader> {
        let stream_offset = read_le_at::<u32>(data, offset)?;
        let size = read_le_at::<u32>(data, offset)?;

        let name_start = *offset;
        let Some(name_len) = data[name_start..].iter().take(32).position(|b| *b == 0) else {
            return Err(malformed_error!(
                "Stream name at offset {} is not terminated",
                name_start
            ));
        };
        let name = String::from_utf8_lossy(&data[name_start..name_start + name_len]).into_owned();
        if !STREAM_NAMES.contains(&name.as_str()) {
            return Err(malformed_error!("Unknown stream - {}", name));
        }

        // Name plus terminator, padded to 4 bytes
        *offset = name_start + (name_len + 4) / 4 * 4;
        if *offset > data.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(StreamHeader {
            offset: stream_offset,
            size,
            name,
        })
    }

    /// Append the header to `buffer`
    pub fn write(&self, buffer: &mut Vec<u8>) {
        write_le::<u32>(buffer, self.offset);
        write_le::<u32>(buffer, self.size);
        buffer.extend_from_slice(self.name.as_bytes());
        buffer.push(0);
        pad_to(buffer, 4);
    }

    /// Size the header occupies when written
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        8 + (self.name.len() + 4) / 4 * 4
    }
}
