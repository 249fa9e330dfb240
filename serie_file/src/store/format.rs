//! On-disk layout of a record file.
//!
//! ```text
//! offset 0   ┌──────────────────────────────────────────────┐
//!            │ magic "SERIEREC"                       8 B   │
//!            │ version u32 | flags u32                8 B   │
//!            │ session u64                            8 B   │
//!            │ committed_end u64                      8 B   │
//!            │ frame_count u64                        8 B   │
//! offset 40  ├──────────────────────────────────────────────┤
//!            │ [len u32 LE][bincode Entry] ...              │
//! committed  ├──────────────────────────────────────────────┤
//!            │ bytes past committed_end are not yet visible │
//!            └──────────────────────────────────────────────┘
//! ```
//!
//! All integers are little endian. The writer appends frames past
//! `committed_end`, syncs them, then rewrites the header. `session` is fixed
//! when a writer creates the file; a reader seeing it change knows the file
//! was recreated under it.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File magic
pub const MAGIC: [u8; 8] = *b"SERIEREC";

/// Current format version
pub const FORMAT_VERSION: u32 = 2;

/// Header length in bytes; the first frame starts here
pub const HEADER_LEN: u64 = 40;

/// Upper bound on a single frame, to reject garbage lengths early
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

const LEN_PREFIX: usize = std::mem::size_of::<u32>();

bitflags! {
    /// Header flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeaderFlags: u32 {
        /// Written by a writer in SWMR mode; readers may refresh in place
        const SWMR = 1 << 0;
    }
}

/// Decoding failures; the store turns them into `FileError::Corrupt`
#[derive(Error, Debug)]
pub enum FormatError {
    /// Magic bytes do not match
    #[error("bad magic {0:?}")]
    BadMagic([u8; 8]),

    /// Written by a newer or older format
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),

    /// Header shorter than HEADER_LEN or committed_end before the first frame
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// A frame runs past the committed region
    #[error("truncated frame at offset {offset}")]
    Truncated {
        /// Offset of the frame
        offset: u64,
    },

    /// Length prefix over MAX_FRAME_LEN
    #[error("frame at offset {offset} claims {len} bytes")]
    FrameTooLarge {
        /// Offset of the frame
        offset: u64,
        /// Claimed length
        len: u32,
    },

    /// Frame payload does not decode
    #[error("frame at offset {offset}: {source}")]
    Decode {
        /// Offset of the frame
        offset: u64,
        /// Decoder error
        source: bincode::Error,
    },
}

/// Fixed-size file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Header flags
    pub flags: HeaderFlags,
    /// Identifier of the writer session that created the file
    pub session: u64,
    /// End of the committed frames, absolute offset
    pub committed_end: u64,
    /// Committed frame count
    pub frame_count: u64,
}

impl Header {
    /// Header of an empty file
    pub fn empty(flags: HeaderFlags, session: u64) -> Self {
        Self {
            flags,
            session,
            committed_end: HEADER_LEN,
            frame_count: 0,
        }
    }

    /// Serialize to the on-disk layout
    pub fn encode(&self) -> [u8; HEADER_LEN as usize] {
        let mut buf = [0u8; HEADER_LEN as usize];
        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf[12..16].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf[16..24].copy_from_slice(&self.session.to_le_bytes());
        buf[24..32].copy_from_slice(&self.committed_end.to_le_bytes());
        buf[32..40].copy_from_slice(&self.frame_count.to_le_bytes());
        buf
    }

    /// Parse and validate a header
    pub fn decode(buf: &[u8]) -> Result<Self, FormatError> {
        if buf.len() < HEADER_LEN as usize {
            return Err(FormatError::InvalidHeader("short header"));
        }
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&buf[0..8]);
        if magic != MAGIC {
            return Err(FormatError::BadMagic(magic));
        }
        let version = read_u32(&buf[8..12]);
        if version != FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }
        let header = Self {
            // Unknown bits from newer writers are ignored
            flags: HeaderFlags::from_bits_truncate(read_u32(&buf[12..16])),
            session: read_u64(&buf[16..24]),
            committed_end: read_u64(&buf[24..32]),
            frame_count: read_u64(&buf[32..40]),
        };
        if header.committed_end < HEADER_LEN {
            return Err(FormatError::InvalidHeader("committed_end inside header"));
        }
        Ok(header)
    }
}

/// One record in the file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Entry {
    /// Series declaration; ids are assigned in declaration order
    Series {
        /// Series id
        id: u32,
        /// Series name
        name: String,
        /// Column names
        columns: Vec<String>,
    },
    /// One row of a series
    Row {
        /// Series id
        id: u32,
        /// Row values, one per column
        values: Vec<f64>,
    },
    /// File-level string attribute; later frames overwrite earlier ones
    Attribute {
        /// Attribute name
        name: String,
        /// Attribute value
        value: String,
    },
}

/// Append one length-prefixed frame to `out`
pub fn encode_frame(entry: &Entry, out: &mut Vec<u8>) -> bincode::Result<()> {
    let payload = bincode::serialize(entry)?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| {
            Box::new(bincode::ErrorKind::Custom(format!(
                "frame of {} bytes exceeds limit",
                payload.len()
            )))
        })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(())
}

/// Decode every frame in `buf`, which starts at absolute offset `base`.
///
/// `buf` must end exactly at a frame boundary.
pub fn decode_frames(buf: &[u8], base: u64) -> Result<Vec<Entry>, FormatError> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos < buf.len() {
        let offset = base + pos as u64;
        if buf.len() - pos < LEN_PREFIX {
            return Err(FormatError::Truncated { offset });
        }
        let len = read_u32(&buf[pos..pos + LEN_PREFIX]);
        if len > MAX_FRAME_LEN {
            return Err(FormatError::FrameTooLarge { offset, len });
        }
        let start = pos + LEN_PREFIX;
        let end = start + len as usize;
        if end > buf.len() {
            return Err(FormatError::Truncated { offset });
        }
        let entry = bincode::deserialize(&buf[start..end])
            .map_err(|source| FormatError::Decode { offset, source })?;
        entries.push(entry);
        pos = end;
    }
    Ok(entries)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = Header {
            flags: HeaderFlags::SWMR,
            session: 0xAB,
            committed_end: 0x0102,
            frame_count: 3,
        };
        let bytes = header.encode();
        assert_eq!(bytes.len(), 40);
        assert_eq!(&bytes[0..8], b"SERIEREC");
        assert_eq!(&bytes[8..12], &[2, 0, 0, 0]);
        assert_eq!(&bytes[12..16], &[1, 0, 0, 0]);
        assert_eq!(bytes[16], 0xAB);
        assert_eq!(&bytes[24..26], &[0x02, 0x01]);
        assert_eq!(Header::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_foreign_files() {
        let mut bytes = Header::empty(HeaderFlags::empty(), 1).encode();
        bytes[0] = b'X';
        assert!(matches!(
            Header::decode(&bytes),
            Err(FormatError::BadMagic(_))
        ));

        let mut bytes = Header::empty(HeaderFlags::empty(), 1).encode();
        bytes[8] = 9;
        assert!(matches!(
            Header::decode(&bytes),
            Err(FormatError::UnsupportedVersion(9))
        ));

        assert!(Header::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_frames_decode_in_order() {
        let entries = vec![
            Entry::Series {
                id: 0,
                name: "t".to_string(),
                columns: vec!["a".to_string(), "b".to_string()],
            },
            Entry::Row {
                id: 0,
                values: vec![1.0, 2.0],
            },
            Entry::Attribute {
                name: "unit".to_string(),
                value: "K".to_string(),
            },
        ];
        let mut buf = Vec::new();
        for entry in &entries {
            encode_frame(entry, &mut buf).unwrap();
        }
        assert_eq!(decode_frames(&buf, HEADER_LEN).unwrap(), entries);
    }

    #[test]
    fn test_partial_frame_is_truncated() {
        let mut buf = Vec::new();
        encode_frame(
            &Entry::Row {
                id: 0,
                values: vec![1.0],
            },
            &mut buf,
        )
        .unwrap();
        buf.pop();
        assert!(matches!(
            decode_frames(&buf, HEADER_LEN),
            Err(FormatError::Truncated { offset: 40 })
        ));
    }

    #[test]
    fn test_garbage_length_rejected() {
        let buf = u32::MAX.to_le_bytes();
        assert!(matches!(
            decode_frames(&buf, HEADER_LEN),
            Err(FormatError::FrameTooLarge { .. })
        ));
    }
}
