//! Notification record decoding
//!
//! A completed read leaves a chain of variable-length records in the buffer:
//!
//! ```text
//! offset  size  field
//! 0       4     next_offset   (bytes to the next record, 0 = last)
//! 4       4     action        (1 added, 2 removed, 3 modified, 4 old name, 5 new name)
//! 8       4     name_len      (bytes, not characters)
//! 12      n     name          (UTF-16LE, no terminator)
//! ```
//!
//! All integers are little-endian. Records may be packed on 2-byte
//! boundaries (Wine does this), so fields are read bytewise rather than
//! through aligned pointer casts.

use std::char::{decode_utf16, REPLACEMENT_CHARACTER};
use std::iter::FusedIterator;

/// Size of the fixed record header in bytes
pub const HEADER_SIZE: usize = 12;

/// Action code carried by a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordAction {
    Added,
    Removed,
    Modified,
    RenamedOld,
    RenamedNew,
    Unknown(u32),
}

impl RecordAction {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => RecordAction::Added,
            2 => RecordAction::Removed,
            3 => RecordAction::Modified,
            4 => RecordAction::RenamedOld,
            5 => RecordAction::RenamedNew,
            other => RecordAction::Unknown(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            RecordAction::Added => 1,
            RecordAction::Removed => 2,
            RecordAction::Modified => 3,
            RecordAction::RenamedOld => 4,
            RecordAction::RenamedNew => 5,
            RecordAction::Unknown(code) => code,
        }
    }
}

/// One record pulled out of the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    pub action: RecordAction,

    /// Name relative to the watch root, leading separators removed
    pub name: String,

    /// Raw offset to the next record, 0 for the last one
    pub next_offset: u32,
}

/// Malformed input found while walking a chain
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("record header at offset {offset} runs past the end of a {len}-byte buffer")]
    TruncatedHeader { offset: usize, len: usize },

    #[error("name of the record at offset {offset} ({name_len} bytes) runs past its record")]
    NameOutOfBounds { offset: usize, name_len: usize },

    #[error("record at offset {offset} has an odd name length of {name_len} bytes")]
    OddNameLength { offset: usize, name_len: usize },
}

/// Lazily walk the record chain in `bytes`
///
/// The iterator yields one item per record. A record whose name is malformed
/// yields an error and the walk continues with the next record; a header that
/// does not fit ends the walk after one error. An empty slice yields nothing.
pub fn decode(bytes: &[u8]) -> Records<'_> {
    Records {
        bytes,
        cursor: if bytes.is_empty() { None } else { Some(0) },
    }
}

/// Iterator returned by [`decode`]
#[derive(Debug, Clone)]
pub struct Records<'a> {
    bytes: &'a [u8],

    /// Offset of the next record; `None` once the chain has ended
    cursor: Option<usize>,
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<DecodedRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.cursor.take()?;
        let len = self.bytes.len();

        let header_end = match offset.checked_add(HEADER_SIZE) {
            Some(end) if end <= len => end,
            _ => return Some(Err(DecodeError::TruncatedHeader { offset, len })),
        };

        let next_offset = read_u32(self.bytes, offset);
        let action = RecordAction::from_code(read_u32(self.bytes, offset + 4));
        let name_len = read_u32(self.bytes, offset + 8) as usize;

        // A record never extends past the start of its successor
        let record_end = if next_offset == 0 {
            len
        } else {
            offset.saturating_add(next_offset as usize).min(len)
        };

        // Offset 0 ends the chain and any non-zero offset moves forward, so
        // the walk always terminates
        if next_offset != 0 {
            self.cursor = offset.checked_add(next_offset as usize);
        }

        if name_len % 2 != 0 {
            return Some(Err(DecodeError::OddNameLength { offset, name_len }));
        }
        let name_end = match header_end.checked_add(name_len) {
            Some(end) if end <= record_end => end,
            _ => return Some(Err(DecodeError::NameOutOfBounds { offset, name_len })),
        };

        Some(Ok(DecodedRecord {
            action,
            name: decode_name(&self.bytes[header_end..name_end]),
            next_offset,
        }))
    }
}

impl FusedIterator for Records<'_> {}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word)
}

fn decode_name(raw: &[u8]) -> String {
    let units = raw.chunks_exact(2).map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    let name: String = decode_utf16(units)
        .map(|c| c.unwrap_or(REPLACEMENT_CHARACTER))
        .collect();

    let kept = name.trim_start_matches(['/', '\\']).len();
    if kept == name.len() {
        name
    } else {
        name[name.len() - kept..].to_string()
    }
}

/// Appends records in the wire layout to a byte slice
///
/// Records start on DWORD boundaries and each one's `next_offset` is patched
/// when its successor is written.
pub struct RecordWriter<'a> {
    buf: &'a mut [u8],

    /// Bytes used so far, including alignment padding
    len: usize,

    /// Offset of the last record written
    last: Option<usize>,
}

impl<'a> RecordWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0, last: None }
    }

    /// Append one record; returns false and writes nothing if it does not fit
    pub fn push(&mut self, action: RecordAction, name: &str) -> bool {
        let units: Vec<u16> = name.encode_utf16().collect();
        let name_len = units.len() * 2;
        let start = self.len;

        let end = match start.checked_add(HEADER_SIZE + name_len) {
            Some(end) if end <= self.buf.len() => end,
            _ => return false,
        };

        self.buf[start..start + 4].copy_from_slice(&0u32.to_le_bytes());
        self.buf[start + 4..start + 8].copy_from_slice(&action.code().to_le_bytes());
        self.buf[start + 8..start + 12].copy_from_slice(&(name_len as u32).to_le_bytes());
        for (i, unit) in units.iter().enumerate() {
            let at = start + HEADER_SIZE + i * 2;
            self.buf[at..at + 2].copy_from_slice(&unit.to_le_bytes());
        }

        if let Some(prev) = self.last {
            let delta = (start - prev) as u32;
            self.buf[prev..prev + 4].copy_from_slice(&delta.to_le_bytes());
        }

        self.last = Some(start);
        self.len = end.next_multiple_of(4).min(self.buf.len());
        true
    }

    /// Bytes a reader should be told were delivered
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_none()
    }
}

/// Encode a whole chain into a fresh vector
pub fn encode_records<'n, I>(records: I) -> Vec<u8>
where
    I: IntoIterator<Item = (RecordAction, &'n str)>,
{
    let records: Vec<(RecordAction, &str)> = records.into_iter().collect();
    let size: usize = records
        .iter()
        .map(|(_, name)| (HEADER_SIZE + name.encode_utf16().count() * 2).next_multiple_of(4))
        .sum();

    let mut bytes = vec![0u8; size];
    let mut writer = RecordWriter::new(&mut bytes);
    for (action, name) in &records {
        writer.push(*action, name);
    }
    let used = writer.len();
    bytes.truncate(used);
    bytes
}
