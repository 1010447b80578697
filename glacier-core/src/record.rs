//! Binary encoding of the two persisted record kinds.

use std::mem::size_of;

const U64_LEN: usize = size_of::<u64>();

/// A decoded `commands.bin` record: `{command_hash, end_mtime, file_hashes}`.
///
/// `file_hashes` covers every path in `inputs ∪ implicit_inputs ∪ outputs`
/// of the command that produced this record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandRecord {
    pub command_hash: u64,
    pub end_mtime_nanos: u64,
    pub file_hashes: Vec<u64>,
}

impl CommandRecord {
    /// Encode as `[command_hash][end_mtime][n][file_hash × n]`, all `u64`
    /// little-endian, ready to pass to [`RecordStream::write_record`].
    ///
    /// [`RecordStream::write_record`]: crate::stream::RecordStream::write_record
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(U64_LEN * (3 + self.file_hashes.len()));
        buf.extend_from_slice(&self.command_hash.to_le_bytes());
        buf.extend_from_slice(&self.end_mtime_nanos.to_le_bytes());
        buf.extend_from_slice(&(self.file_hashes.len() as u64).to_le_bytes());
        for hash in &self.file_hashes {
            buf.extend_from_slice(&hash.to_le_bytes());
        }
        buf
    }

    /// Decode a record previously produced by [`encode`][`Self::encode`].
    ///
    /// Returns `None` if `bytes` is shorter than its own declared length —
    /// the stream already drops such truncated trailing records, but
    /// decoding stays defensive for directly-constructed byte slices (e.g.
    /// in tests).
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < U64_LEN * 3 {
            return None;
        }
        let command_hash = read_u64(bytes, 0);
        let end_mtime_nanos = read_u64(bytes, U64_LEN);
        let n = read_u64(bytes, U64_LEN * 2) as usize;

        let expected_len = U64_LEN * 3 + n * U64_LEN;
        if bytes.len() < expected_len {
            return None;
        }

        let file_hashes = (0..n)
            .map(|i| read_u64(bytes, U64_LEN * 3 + i * U64_LEN))
            .collect();

        Some(Self { command_hash, end_mtime_nanos, file_hashes })
    }
}

/// A decoded `commands.files.bin` record: a raw, normalised path string.
///
/// The record's position in the file carries no meaning; the file's
/// contents are re-read into the in-memory file registry keyed by
/// `hash(path)`, per spec.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileRecord(pub String);

impl FileRecord {
    /// Encode as raw UTF-8 bytes.
    pub fn encode(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }

    /// Decode raw UTF-8 bytes back into a path string.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        std::str::from_utf8(bytes).ok().map(|s| Self(s.to_owned()))
    }
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(bytes[offset..offset + U64_LEN].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_command_record() {
        let record = CommandRecord {
            command_hash: 0xdead_beef,
            end_mtime_nanos: 123_456_789,
            file_hashes: vec![1, 2, 3],
        };
        let encoded = record.encode();
        assert_eq!(CommandRecord::decode(&encoded), Some(record));
    }

    #[test]
    fn rejects_truncated_command_record() {
        let record = CommandRecord {
            command_hash: 1,
            end_mtime_nanos: 2,
            file_hashes: vec![3, 4, 5],
        };
        let mut encoded = record.encode();
        encoded.truncate(encoded.len() - 1);
        assert_eq!(CommandRecord::decode(&encoded), None);
    }

    #[test]
    fn round_trips_file_record() {
        let record = FileRecord("src/main.c".to_owned());
        let encoded = record.encode();
        assert_eq!(FileRecord::decode(&encoded), Some(record));
    }
}
