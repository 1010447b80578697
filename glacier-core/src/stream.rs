//! Append-only, memory-mapped record stream.
//!
//! Both persisted streams in the command database (`commands.bin` and
//! `commands.files.bin`) are sequences of length-prefixed records written
//! through this type. The file's first eight bytes hold the logical end
//! offset of written data; everything past that, up to the file's actual
//! (doubling-grown) size, is unused capacity reserved for future appends
//! without needing to resize on every single write.

use {
    std::{fs::{File, OpenOptions}, io, mem::size_of, path::Path},
    sys_ext::MappedFile,
};

const HEADER_LEN: usize = size_of::<u64>();
const INITIAL_CAPACITY: usize = 4096;

/// A byte offset of a record within a [`RecordStream`], returned by
/// [`write_record`][`RecordStream::write_record`] and accepted by
/// [`read_record`][`RecordStream::read_record`].
pub type Cursor = u64;

/// An append-only stream of length-prefixed byte records, backed by a
/// growable memory-mapped file.
pub struct RecordStream {
    mapped: MappedFile,
    end: u64,
}

impl RecordStream {
    /// Open (creating if necessary) the record stream at `path`.
    ///
    /// If the file's last record is truncated — for instance because a
    /// previous run crashed mid-write — it is silently ignored; appends
    /// resume after the last complete record.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let len = file.metadata()?.len() as usize;
        let initial_len = len.max(INITIAL_CAPACITY).max(HEADER_LEN);
        if len < initial_len {
            file.set_len(initial_len as u64)?;
        }

        let mapped = MappedFile::new(file, initial_len)?;
        let end = read_end(&mapped);
        let mut stream = Self { mapped, end };
        stream.end = stream.last_complete_record_end();
        Ok(stream)
    }

    /// Cursor pointing just past the stream's header, i.e. the first
    /// record written (if any).
    pub fn begin(&self) -> Cursor {
        HEADER_LEN as u64
    }

    /// Append `payload` as a new record and return its start cursor.
    pub fn write_record(&mut self, payload: &[u8]) -> io::Result<Cursor> {
        let needed = HEADER_LEN as u64 + payload.len() as u64;
        self.ensure_capacity(self.end + needed)?;

        let start = self.end as usize;
        let bytes = self.mapped.as_mut_slice();
        bytes[start..start + HEADER_LEN].copy_from_slice(&(payload.len() as u64).to_le_bytes());
        bytes[start + HEADER_LEN..start + HEADER_LEN + payload.len()].copy_from_slice(payload);

        self.end += needed;
        write_end(&mut self.mapped, self.end);

        Ok(start as u64)
    }

    /// Read the record starting at `cursor`, returning the record's bytes
    /// and the cursor of the next record, or `None` at end of stream.
    pub fn read_record(&self, cursor: Cursor) -> Option<(&[u8], Cursor)> {
        let cursor = cursor as usize;
        let bytes = self.mapped.as_slice();
        let end = self.end as usize;

        if cursor + HEADER_LEN > end {
            return None;
        }
        let payload_size = u64::from_le_bytes(
            bytes[cursor..cursor + HEADER_LEN].try_into().unwrap()
        ) as usize;
        if payload_size == 0 {
            return None;
        }
        let payload_start = cursor + HEADER_LEN;
        let payload_end = payload_start + payload_size;
        if payload_end > end {
            return None;
        }

        Some((&bytes[payload_start..payload_end], payload_end as u64))
    }

    /// Iterate every record from the beginning of the stream.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        let mut cursor = Some(self.begin());
        std::iter::from_fn(move || {
            let (payload, next) = self.read_record(cursor?)?;
            cursor = Some(next);
            Some(payload)
        })
    }

    fn ensure_capacity(&mut self, required: u64) -> io::Result<()> {
        let capacity = self.mapped.len() as u64;
        if required <= capacity {
            return Ok(());
        }
        let data_capacity = capacity - HEADER_LEN as u64;
        let extra = required - capacity;
        let new_data_capacity = if data_capacity == 0 {
            extra * 2
        } else {
            data_capacity * 2 + extra
        };
        self.mapped.grow((HEADER_LEN as u64 + new_data_capacity) as usize)
    }

    /// On open, walk records from the header-reported end backwards to the
    /// last one that is not truncated, in case of a crash mid-write.
    fn last_complete_record_end(&self) -> u64 {
        let mut cursor = self.begin();
        let mut last_good = cursor;
        while let Some((_, next)) = self.read_record(cursor) {
            last_good = next;
            cursor = next;
        }
        last_good
    }
}

fn read_end(mapped: &MappedFile) -> u64 {
    u64::from_le_bytes(mapped.as_slice()[..HEADER_LEN].try_into().unwrap())
}

fn write_end(mapped: &mut MappedFile, end: u64) {
    mapped.as_mut_slice()[..HEADER_LEN].copy_from_slice(&end.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.bin");

        let mut stream = RecordStream::open(&path).unwrap();
        let c0 = stream.write_record(b"first").unwrap();
        let c1 = stream.write_record(b"second").unwrap();

        let (payload, next) = stream.read_record(c0).unwrap();
        assert_eq!(payload, b"first");
        assert_eq!(next, c1);

        let (payload, _) = stream.read_record(c1).unwrap();
        assert_eq!(payload, b"second");
    }

    #[test]
    fn reopening_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.bin");

        {
            let mut stream = RecordStream::open(&path).unwrap();
            stream.write_record(b"persisted").unwrap();
        }

        let stream = RecordStream::open(&path).unwrap();
        let records: Vec<&[u8]> = stream.iter().collect();
        assert_eq!(records, vec![b"persisted".as_slice()]);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.bin");

        let mut stream = RecordStream::open(&path).unwrap();
        let big = vec![0x42u8; INITIAL_CAPACITY * 3];
        stream.write_record(&big).unwrap();
        let (payload, _) = stream.read_record(stream.begin()).unwrap();
        assert_eq!(payload.len(), big.len());
    }

    #[test]
    fn empty_stream_has_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.bin");

        let stream = RecordStream::open(&path).unwrap();
        assert_eq!(stream.iter().count(), 0);
    }
}
