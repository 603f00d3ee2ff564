//! The metadata root (ECMA-335 II.24.2.1).
//!
//! ```text
//! offset  size  field
//! 0       4     signature 'BSJB'
//! 4       2     major version (1)
//! 6       2     minor version (1)
//! 8       4     reserved (0)
//! 12      4     length of the version string, padded to 4
//! 16      n     version string, null padded
//! 16+n    2     flags (0)
//! 18+n    2     number of streams
//! 20+n    ...   stream headers
//! ```

use crate::{
    file::io::{read_le, read_le_at},
    metadata::streams::StreamHeader,
    Result,
};

/// Magic value of the metadata root signature, 'BSJB'.
pub const CIL_HEADER_MAGIC: u32 = 0x424A_5342;

/// The metadata root: version information and the directory of streams.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Root {
    /// Major version, 1
    pub major_version: u16,
    /// Minor version, 1
    pub minor_version: u16,
    /// Reserved, 0
    pub reserved: u32,
    /// Runtime version string without padding, e.g. `v4.0.30319`
    pub version: String,
    /// Reserved, 0
    pub flags: u16,
    /// Headers of all streams, in directory order
    pub stream_headers: Vec<StreamHeader>,
}

impl Root {
    /// Create a root for the given version string and stream directory.
    #[must_use]
    pub fn new(version: &str, stream_headers: Vec<StreamHeader>) -> Root {
        Root {
            major_version: 1,
            minor_version: 1,
            reserved: 0,
            version: version.to_string(),
            flags: 0,
            stream_headers,
        }
    }

    /// Decode the metadata root at the start of `data`.
    ///
    /// Every stream header is checked to lie within `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for truncated data and [`crate::Error::Malformed`]
    /// for a bad signature, an invalid stream count or duplicate streams.
    pub fn read(data: &[u8]) -> Result<Root> {
        if data.len() < 36 {
            return Err(out_of_bounds_error!());
        }

        let signature = read_le::<u32>(data)?;
        if signature != CIL_HEADER_MAGIC {
            return Err(malformed_error!(
                "CIL_HEADER_MAGIC does not match - {}",
                signature
            ));
        }

        let version_string_length = read_le_at::<u32>(data, &mut 12)? as usize;
        let Some(version_end) = version_string_length.checked_add(16) else {
            return Err(malformed_error!(
                "Version string length causing integer overflow - {}",
                version_string_length
            ));
        };
        if version_end + 4 > data.len() {
            return Err(out_of_bounds_error!());
        }

        let version_bytes = &data[16..version_end];
        let version_len = version_bytes
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(version_bytes.len());
        let version = std::str::from_utf8(&version_bytes[..version_len])
            .map_err(|_| malformed_error!("Version string is not valid UTF-8"))?
            .to_string();

        let mut cursor = version_end;
        let flags = read_le_at::<u16>(data, &mut cursor)?;
        let stream_count = read_le_at::<u16>(data, &mut cursor)?;
        if stream_count == 0 || stream_count > 5 {
            // Must have streams, no duplicates, no more than 5 possible
            return Err(malformed_error!("Invalid stream count - {}", stream_count));
        }

        let mut stream_headers: Vec<StreamHeader> = Vec::with_capacity(stream_count as usize);
        let mut stream_offset = cursor;
        for _ in 0..stream_count {
            if stream_offset > data.len() {
                return Err(out_of_bounds_error!());
            }

            let new_stream = StreamHeader::from(&data[stream_offset..])?;
            match new_stream.offset.checked_add(new_stream.size) {
                Some(range) if range as usize <= data.len() => {}
                Some(_) => return Err(out_of_bounds_error!()),
                None => {
                    return Err(malformed_error!(
                        "Stream offset and size cause integer overflow - {} + {}",
                        new_stream.offset,
                        new_stream.size
                    ))
                }
            }

            if stream_headers
                .iter()
                .any(|existing| existing.name == new_stream.name)
            {
                return Err(malformed_error!("Duplicate stream - {}", new_stream.name));
            }

            stream_offset += new_stream.header_size();
            stream_headers.push(new_stream);
        }

        Ok(Root {
            major_version: read_le::<u16>(&data[4..])?,
            minor_version: read_le::<u16>(&data[6..])?,
            reserved: read_le::<u32>(&data[8..])?,
            version,
            flags,
            stream_headers,
        })
    }

    /// Find the header of the stream called `name`.
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&StreamHeader> {
        self.stream_headers.iter().find(|header| header.name == name)
    }

    /// Length of the padded version string field.
    #[must_use]
    pub fn version_field_size(&self) -> usize {
        (self.version.len() + 1 + 3) & !3
    }

    /// Size of the encoded root including all stream headers.
    #[must_use]
    pub fn size(&self) -> usize {
        20 + self.version_field_size()
            + self
                .stream_headers
                .iter()
                .map(StreamHeader::header_size)
                .sum::<usize>()
    }

    /// Append the encoded root and stream directory to `buffer`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the directory holds more than 5 streams.
    pub fn write(&self, buffer: &mut Vec<u8>) -> Result<()> {
        let stream_count = u16::try_from(self.stream_headers.len())
            .ok()
            .filter(|count| *count <= 5)
            .ok_or_else(|| malformed_error!("Too many streams"))?;
        let version_field = u32::try_from(self.version_field_size())
            .map_err(|_| malformed_error!("Version string length too large"))?;

        buffer.extend_from_slice(&CIL_HEADER_MAGIC.to_le_bytes());
        buffer.extend_from_slice(&self.major_version.to_le_bytes());
        buffer.extend_from_slice(&self.minor_version.to_le_bytes());
        buffer.extend_from_slice(&self.reserved.to_le_bytes());
        buffer.extend_from_slice(&version_field.to_le_bytes());
        buffer.extend_from_slice(self.version.as_bytes());
        buffer.resize(buffer.len() + self.version_field_size() - self.version.len(), 0);
        buffer.extend_from_slice(&self.flags.to_le_bytes());
        buffer.extend_from_slice(&stream_count.to_le_bytes());
        for header in &self.stream_headers {
            header.write(buffer);
        }

        Ok(())
    }
}
