use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::boxes::FourCC;

#[derive(thiserror::Error, Debug)]
pub enum ReaderError {
    #[error("read of {count} bytes at offset {offset} exceeds source length {length}")]
    OutOfRange { offset: u64, count: usize, length: u64 },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type ReadResult<T> = std::result::Result<T, ReaderError>;

/// Random-access byte source over a fixed-length file.
///
/// Implementations may buffer or load eagerly, but callers follow a
/// single-reader discipline: sequential, non-overlapping calls from one
/// execution context. No thread-safety is assumed beyond that.
pub trait RandomAccessReader {
    /// Total byte length, fixed for the session.
    fn length(&self) -> u64;

    /// Read exactly `count` bytes starting at `offset`. Fails with
    /// [`ReaderError::OutOfRange`] when `offset + count` exceeds `length`,
    /// and with [`ReaderError::Io`] on underlying device errors.
    fn read(&self, offset: u64, count: usize) -> ReadResult<Vec<u8>>;

    fn read_u32(&self, offset: u64) -> ReadResult<u32> {
        let b = self.read(offset, 4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&self, offset: u64) -> ReadResult<u64> {
        let b = self.read(offset, 8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_fourcc(&self, offset: u64) -> ReadResult<FourCC> {
        let b = self.read(offset, 4)?;
        Ok(FourCC([b[0], b[1], b[2], b[3]]))
    }
}

/// In-memory byte source; used for whole-file loads and test fixtures.
pub struct MemoryReader {
    data: Vec<u8>,
}

impl MemoryReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn open(path: impl AsRef<Path>) -> ReadResult<Self> {
        Ok(Self::new(std::fs::read(path)?))
    }
}

impl RandomAccessReader for MemoryReader {
    fn length(&self) -> u64 {
        self.data.len() as u64
    }

    fn read(&self, offset: u64, count: usize) -> ReadResult<Vec<u8>> {
        let end = offset
            .checked_add(count as u64)
            .ok_or(ReaderError::OutOfRange { offset, count, length: self.length() })?;
        if end > self.length() {
            return Err(ReaderError::OutOfRange { offset, count, length: self.length() });
        }
        Ok(self.data[offset as usize..end as usize].to_vec())
    }
}

pub const DEFAULT_CHUNK_SIZE: usize = 1 << 20;

/// Byte source that performs buffered, chunk-aligned file reads with a
/// single cached chunk, minimising syscalls for the walker's mostly-forward
/// access pattern.
///
/// Not `Sync`: the chunk cache uses interior mutability and relies on the
/// single-reader discipline documented on [`RandomAccessReader`].
pub struct ChunkedFileReader {
    file: RefCell<File>,
    length: u64,
    chunk_size: usize,
    cache: RefCell<Option<(u64, Vec<u8>)>>,
}

impl ChunkedFileReader {
    pub fn open(path: impl AsRef<Path>) -> ReadResult<Self> {
        Self::with_chunk_size(path, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(path: impl AsRef<Path>, chunk_size: usize) -> ReadResult<Self> {
        assert!(chunk_size > 0, "chunk size must be positive");
        let file = File::open(path)?;
        let length = file.metadata()?.len();
        Ok(Self {
            file: RefCell::new(file),
            length,
            chunk_size,
            cache: RefCell::new(None),
        })
    }

    /// Load the chunk containing `offset` into the cache, returning its
    /// base offset.
    fn load_chunk(&self, offset: u64) -> ReadResult<u64> {
        let base = offset - (offset % self.chunk_size as u64);
        {
            let cache = self.cache.borrow();
            if let Some((cached_base, _)) = cache.as_ref() {
                if *cached_base == base {
                    return Ok(base);
                }
            }
        }
        let len = (self.length - base).min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; len];
        {
            let mut file = self.file.borrow_mut();
            file.seek(SeekFrom::Start(base))?;
            file.read_exact(&mut buf)?;
        }
        *self.cache.borrow_mut() = Some((base, buf));
        Ok(base)
    }
}

impl RandomAccessReader for ChunkedFileReader {
    fn length(&self) -> u64 {
        self.length
    }

    fn read(&self, offset: u64, count: usize) -> ReadResult<Vec<u8>> {
        let end = offset
            .checked_add(count as u64)
            .ok_or(ReaderError::OutOfRange { offset, count, length: self.length })?;
        if end > self.length {
            return Err(ReaderError::OutOfRange { offset, count, length: self.length });
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut result = Vec::with_capacity(count);
        let mut cursor = offset;
        while cursor < end {
            let base = self.load_chunk(cursor)?;
            let cache = self.cache.borrow();
            let (_, chunk) = cache.as_ref().unwrap();
            let start = (cursor - base) as usize;
            let take = ((end - cursor) as usize).min(chunk.len() - start);
            result.extend_from_slice(&chunk[start..start + take]);
            cursor += take as u64;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_reader_bounds() {
        let r = MemoryReader::new(vec![1, 2, 3, 4]);
        assert_eq!(r.length(), 4);
        assert_eq!(r.read(1, 2).unwrap(), vec![2, 3]);
        assert!(matches!(
            r.read(3, 2),
            Err(ReaderError::OutOfRange { offset: 3, count: 2, length: 4 })
        ));
    }

    #[test]
    fn memory_reader_big_endian_helpers() {
        let r = MemoryReader::new(vec![0, 0, 0, 8, b'f', b't', b'y', b'p']);
        assert_eq!(r.read_u32(0).unwrap(), 8);
        assert_eq!(r.read_fourcc(4).unwrap(), FourCC(*b"ftyp"));
    }

    #[test]
    fn chunked_reader_crosses_chunk_boundary() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("isoinspect-chunk-test-{}", std::process::id()));
        let data: Vec<u8> = (0..=255u8).collect();
        std::fs::write(&path, &data).unwrap();

        let r = ChunkedFileReader::with_chunk_size(&path, 16).unwrap();
        assert_eq!(r.length(), 256);
        assert_eq!(r.read(10, 20).unwrap(), data[10..30].to_vec());
        assert_eq!(r.read(250, 6).unwrap(), data[250..].to_vec());
        assert!(r.read(250, 7).is_err());

        std::fs::remove_file(&path).ok();
    }
}
