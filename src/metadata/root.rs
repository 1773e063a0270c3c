//! The metadata root (ECMA-335 II.24.2.1), the first structure of a module image.

use crate::{
    file::io::{pad_to, read_le_at, write_le},
    metadata::streams::StreamHeader,
    Result,
};

/// Magic signature `BSJB` of the metadata root
pub const CIL_HEADER_MAGIC: u32 = 0x424A_5342;

/// Version string written for new images
pub const DEFAULT_RUNTIME_VERSION: &str = "v4.0.30319";

/// The metadata root and its stream directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Root {
    /// Major version, 1
    pub major_version: u16,
    /// Minor version, 1
    pub minor_version: u16,
    /// Runtime version string without NUL padding
    pub version: String,
    /// Reserved, 0
    pub flags: u16,
    /// Stream headers in file order
    pub stream_headers: Vec<StreamHeader>,
}

impl Root {
    /// Create a root for the given stream headers
    #[must_use]
    pub fn new(stream_headers: Vec<StreamHeader>) -> Root {
        Root {
            major_version: 1,
            minor_version: 1,
            version: DEFAULT_RUNTIME_VERSION.to_string(),
            flags: 0,
            stream_headers,
        }
    }

    /// Parse the root at the start of `data`.
    ///
    /// # Errors
    /// Returns an error for a bad signature, truncated data, duplicate streams or a stream
    /// that does not fit in `data`.
    pub fn read(data: &[u8]) -> Result<Root> {
        let mut offset = 0;
        let signature = read_le_at::<u32>(data, &mut offset)?;
        if signature != CIL_HEADER_MAGIC {
            return Err(malformed_error!(
                "CIL_HEADER_MAGIC does not match - {}",
                signature
            ));
        }

        let major_version = read_le_at::<u16>(data, &mut offset)?;
        let minor_version = read_le_at::<u16>(data, &mut offset)?;
        let _reserved = read_le_at::<u32>(data, &mut offset)?;
        let length = read_le_at::<u32>(data, &mut offset)? as usize;
        let Some(version_bytes) = data.get(offset..offset.saturating_add(length)) else {
            return Err(out_of_bounds_error!());
        };
        let version = String::from_utf8_lossy(version_bytes)
            .trim_end_matches('\0')
            .to_string();
        offset += length;

        let flags = read_le_at::<u16>(data, &mut offset)?;
        let stream_count = read_le_at::<u16>(data, &mut offset)?;
        if stream_count == 0 || usize::from(stream_count) > super::streams::STREAM_NAMES.len() {
            return Err(malformed_error!("Invalid stream count - {}", stream_count));
        }

        let mut stream_headers: Vec<StreamHeader> = Vec::with_capacity(stream_count.into());
        for _ in 0..stream_count {
            let header = StreamHeader::read(data, &mut offset)?;
            let Some(end) = header.offset.checked_add(header.size) else {
                return Err(malformed_error!(
                    "Stream offset and size cause integer overflow - {} + {}",
                    header.offset,
                    header.size
                ));
            };
            if end as usize > data.len() {
                return Err(out_of_bounds_error!());
            }
            if stream_headers.iter().any(|h| h.name == header.name) {
                return Err(malformed_error!("Duplicate stream - {}", header.name));
            }
            stream_headers.push(header);
        }

        Ok(Root {
            major_version,
            minor_version,
            version,
            flags,
            stream_headers,
        })
    }

    /// Find a stream header by name
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&StreamHeader> {
        self.stream_headers.iter().find(|h| h.name == name)
    }

    /// Size of the root including its stream headers
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        let version_len = (self.version.len() + 4) / 4 * 4;
        20 + version_len
            + self
                .stream_headers
                .iter()
                .map(StreamHeader::encoded_size)
                .sum::<usize>()
    }

    /// Append the root and its stream headers to `buffer`
    pub fn write(&self, buffer: &mut Vec<u8>) {
        let version_len = (self.version.len() + 4) / 4 * 4;

        write_le::<u32>(buffer, CIL_HEADER_MAGIC);
        write_le::<u16>(buffer, self.major_version);
        write_le::<u16>(buffer, self.minor_version);
        write_le::<u32>(buffer, 0);
        #[allow(clippy::cast_possible_truncation)]
        write_le::<u32>(buffer, version_len as u32);
        let start = buffer.len();
        buffer.extend_from_slice(self.version.as_bytes());
        buffer.push(0);
        buffer.resize(start + version_len, 0);
        write_le::<u16>(buffer, self.flags);
        #[allow(clippy::cast_possible_truncation)]
        write_le::<u16>(buffer, self.stream_headers.len() as u16);
        for header in &self.stream_headers {
            header.write(buffer);
        }
        pad_to(buffer, 4);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Root {
        Root::new(vec![
            StreamHeader {
                offset: 0x6C,
                size: 8,
                name: "#~".into(),
            },
            StreamHeader {
                offset: 0x74,
                size: 4,
                name: "#Strings".into(),
            },
        ])
    }

    #[test]
    fn write_then_read() {
        let root = sample();
        let mut data = Vec::new();
        root.write(&mut data);
        assert_eq!(data.len(), root.encoded_size());
        data.resize(0x78, 0);

        let parsed = Root::read(&data).unwrap();
        assert_eq!(parsed, root);
        assert_eq!(parsed.version, DEFAULT_RUNTIME_VERSION);
        assert_eq!(parsed.stream("#Strings").unwrap().offset, 0x74);
        assert!(parsed.stream("#Blob").is_none());
    }

    #[test]
    fn bad_signature() {
        let mut data = Vec::new();
        sample().write(&mut data);
        data.resize(0x78, 0);
        data[0] = b'X';
        assert!(Root::read(&data).is_err());
    }

    #[test]
    fn stream_outside_data() {
        let mut data = Vec::new();
        sample().write(&mut data);
        // Streams point past the end of the root
        assert!(Root::read(&data).is_err());
    }

    #[test]
    fn duplicate_stream() {
        let mut root = sample();
        root.stream_headers[1].name = "#~".into();
        let mut data = Vec::new();
        root.write(&mut data);
        data.resize(0x78, 0);
        assert!(Root::read(&data).is_err());
    }
}
