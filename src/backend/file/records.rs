//! On-disk record formats for the file backend.
//!
//! The log file opens with a fixed header, then carries one record per
//! committed write:
//!
//! ```text
//! +------------------+
//! | Record Length    | (u32 LE, total including this field)
//! +------------------+
//! | Record Kind      | (u8: 1 = chunk, 2 = delete)
//! +------------------+
//! | Kind Body        | (variable, see below)
//! +------------------+
//! | Checksum         | (u32 LE, crc32 of all preceding bytes)
//! +------------------+
//! ```
//!
//! Chunk body: position (i64 LE), index (i64 LE), partition id
//! (length-prefixed string), operation id (length-prefixed string), codec
//! tag (length-prefixed string), payload (length-prefixed bytes).
//!
//! Delete body: partition id (length-prefixed string), from index
//! (i64 LE), to index (i64 LE).

use std::io::{self, Read};

use crate::store::{Index, Position};

/// File magic, first bytes of every log file.
pub const MAGIC: &[u8; 4] = b"SILT";

/// On-disk format version.
pub const FORMAT_VERSION: u32 = 1;

const KIND_CHUNK: u8 = 1;
const KIND_DELETE: u8 = 2;

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Fixed log file header: magic, format version, creation timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u32,
    /// RFC 3339 creation stamp, informational only.
    pub created_at: String,
}

impl FileHeader {
    pub fn new(created_at: impl Into<String>) -> Self {
        Self {
            version: FORMAT_VERSION,
            created_at: created_at.into(),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&(self.created_at.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.created_at.as_bytes());
        let checksum = crc32(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Parse the header at the start of `data`, returning it and the
    /// number of bytes consumed. Header damage is not recoverable, so
    /// every mismatch is an error.
    pub fn deserialize(data: &[u8]) -> io::Result<(Self, usize)> {
        const FIXED: usize = 4 + 4 + 4; // magic + version + stamp length
        if data.len() < FIXED {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "File header too short",
            ));
        }
        if &data[0..4] != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Bad file magic",
            ));
        }
        let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if version != FORMAT_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unsupported format version: {version}"),
            ));
        }
        let stamp_len = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
        let total = FIXED + stamp_len + 4;
        if data.len() < total {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "File header truncated",
            ));
        }
        let created_at = String::from_utf8(data[FIXED..FIXED + stamp_len].to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("Invalid UTF-8: {e}")))?;
        let checksum_offset = FIXED + stamp_len;
        let stored = u32::from_le_bytes([
            data[checksum_offset],
            data[checksum_offset + 1],
            data[checksum_offset + 2],
            data[checksum_offset + 3],
        ]);
        let computed = crc32(&data[0..checksum_offset]);
        if stored != computed {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Header checksum mismatch: computed {computed:08x}, stored {stored:08x}"),
            ));
        }
        Ok((Self { version, created_at }, total))
    }
}

/// A chunk as persisted: payload already encoded, codec tag attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    pub position: Position,
    pub partition_id: String,
    pub index: Index,
    pub operation_id: String,
    pub codec: String,
    pub payload: Vec<u8>,
}

/// One durable log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Chunk(StoredChunk),
    Delete {
        partition_id: String,
        from_index: Index,
        to_index: Index,
    },
}

impl LogRecord {
    fn serialize_body(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Self::Chunk(chunk) => {
                buf.push(KIND_CHUNK);
                buf.extend_from_slice(&chunk.position.to_le_bytes());
                buf.extend_from_slice(&chunk.index.to_le_bytes());
                write_str(&mut buf, &chunk.partition_id);
                write_str(&mut buf, &chunk.operation_id);
                write_str(&mut buf, &chunk.codec);
                buf.extend_from_slice(&(chunk.payload.len() as u32).to_le_bytes());
                buf.extend_from_slice(&chunk.payload);
            }
            Self::Delete {
                partition_id,
                from_index,
                to_index,
            } => {
                buf.push(KIND_DELETE);
                write_str(&mut buf, partition_id);
                buf.extend_from_slice(&from_index.to_le_bytes());
                buf.extend_from_slice(&to_index.to_le_bytes());
            }
        }
        buf
    }

    /// Serialize the complete record: length, body, checksum.
    pub fn serialize(&self) -> Vec<u8> {
        let body = self.serialize_body();
        let record_length = (4 + body.len() + 4) as u32;

        let mut record = Vec::with_capacity(record_length as usize);
        record.extend_from_slice(&record_length.to_le_bytes());
        record.extend_from_slice(&body);
        let checksum = crc32(&record);
        record.extend_from_slice(&checksum.to_le_bytes());
        record
    }

    /// Deserialize one record from the front of `data`, verifying the
    /// checksum. Returns the record and the number of bytes consumed.
    pub fn deserialize(data: &[u8]) -> io::Result<(Self, usize)> {
        const MIN_RECORD_SIZE: usize = 4 + 1 + 4; // length + kind + checksum
        if data.len() < MIN_RECORD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Record too short",
            ));
        }
        let record_length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if record_length < MIN_RECORD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid record length: {record_length}"),
            ));
        }
        if data.len() < record_length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Record truncated: expected {} bytes, got {}",
                    record_length,
                    data.len()
                ),
            ));
        }

        let checksum_offset = record_length - 4;
        let stored = u32::from_le_bytes([
            data[checksum_offset],
            data[checksum_offset + 1],
            data[checksum_offset + 2],
            data[checksum_offset + 3],
        ]);
        let computed = crc32(&data[0..checksum_offset]);
        if stored != computed {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Checksum mismatch: computed {computed:08x}, stored {stored:08x}"),
            ));
        }

        let mut cursor = io::Cursor::new(&data[4..checksum_offset]);
        let mut kind = [0u8; 1];
        cursor.read_exact(&mut kind)?;
        let record = match kind[0] {
            KIND_CHUNK => {
                let position = read_i64(&mut cursor)?;
                let index = read_i64(&mut cursor)?;
                let partition_id = read_string(&mut cursor)?;
                let operation_id = read_string(&mut cursor)?;
                let codec = read_string(&mut cursor)?;
                let payload = read_bytes(&mut cursor)?;
                Self::Chunk(StoredChunk {
                    position,
                    partition_id,
                    index,
                    operation_id,
                    codec,
                    payload,
                })
            }
            KIND_DELETE => {
                let partition_id = read_string(&mut cursor)?;
                let from_index = read_i64(&mut cursor)?;
                let to_index = read_i64(&mut cursor)?;
                Self::Delete {
                    partition_id,
                    from_index,
                    to_index,
                }
            }
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Unknown record kind: {other}"),
                ))
            }
        };
        Ok((record, record_length))
    }
}

fn write_str(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
}

fn read_i64<R: Read>(reader: &mut R) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_string<R: Read>(reader: &mut R) -> io::Result<String> {
    let bytes = read_bytes(reader)?;
    String::from_utf8(bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("Invalid UTF-8: {e}")))
}

fn read_bytes<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk() -> LogRecord {
        LogRecord::Chunk(StoredChunk {
            position: 7,
            partition_id: "cart-42".to_string(),
            index: 3,
            operation_id: "op-abc".to_string(),
            codec: "json".to_string(),
            payload: br#"{"qty":2}"#.to_vec(),
        })
    }

    #[test]
    fn test_chunk_record_roundtrip() {
        let record = sample_chunk();
        let bytes = record.serialize();
        let (back, consumed) = LogRecord::deserialize(&bytes).unwrap();
        assert_eq!(back, record);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_delete_record_roundtrip() {
        let record = LogRecord::Delete {
            partition_id: "cart-42".to_string(),
            from_index: 2,
            to_index: 9,
        };
        let bytes = record.serialize();
        let (back, consumed) = LogRecord::deserialize(&bytes).unwrap();
        assert_eq!(back, record);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_flipped_bit_fails_checksum() {
        let mut bytes = sample_chunk().serialize();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x40;
        let err = LogRecord::deserialize(&bytes).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_record_reports_eof() {
        let bytes = sample_chunk().serialize();
        let err = LogRecord::deserialize(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_consecutive_records_parse_by_offset() {
        let first = sample_chunk().serialize();
        let second = LogRecord::Delete {
            partition_id: "cart-42".to_string(),
            from_index: 1,
            to_index: 1,
        }
        .serialize();
        let mut stream = first.clone();
        stream.extend_from_slice(&second);

        let (_, consumed) = LogRecord::deserialize(&stream).unwrap();
        assert_eq!(consumed, first.len());
        let (record, _) = LogRecord::deserialize(&stream[consumed..]).unwrap();
        assert!(matches!(record, LogRecord::Delete { .. }));
    }

    #[test]
    fn test_header_roundtrip_and_magic_check() {
        let header = FileHeader::new("2026-01-01T00:00:00Z");
        let bytes = header.serialize();
        let (back, consumed) = FileHeader::deserialize(&bytes).unwrap();
        assert_eq!(back, header);
        assert_eq!(consumed, bytes.len());

        let mut bad = bytes.clone();
        bad[0] = b'X';
        assert!(FileHeader::deserialize(&bad).is_err());
    }
}
