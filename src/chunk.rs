//! Chunk size policy and framing of byte sources into chunks.
//!
//! A [`Chunk`] is the unit carried by one stream message. Framing never
//! produces an empty chunk: an empty source yields no chunks at all, and
//! every chunk but the last is exactly [`ChunkSize`] bytes long.

use std::fmt;
use std::io;

use futures_util::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Result, TransferError};

/// Maximum number of bytes in a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkSize(usize);

impl ChunkSize {
    /// Tiny size that makes streaming visible chunk by chunk.
    pub const REFERENCE: ChunkSize = ChunkSize(5);

    /// Create a chunk size; zero is rejected.
    pub fn new(bytes: usize) -> Result<Self> {
        if bytes == 0 {
            return Err(TransferError::Configuration(
                "chunk size must be at least one byte".to_string(),
            ));
        }
        Ok(Self(bytes))
    }

    pub fn get(self) -> usize {
        self.0
    }

    /// Number of chunks a source of `len` bytes frames into.
    pub fn chunks_for(self, len: u64) -> u64 {
        len.div_ceil(self.0 as u64)
    }
}

impl Default for ChunkSize {
    /// 64 KiB.
    fn default() -> Self {
        Self(64 * 1024)
    }
}

impl fmt::Display for ChunkSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.0)
    }
}

/// An immutable, non-empty run of file bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk(Vec<u8>);

impl Chunk {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk").field("len", &self.0.len()).finish()
    }
}

/// Split an in-memory source into chunks of at most `size` bytes.
///
/// The returned iterator is lazy and `Clone`; cloning it before use
/// restarts framing from the first chunk.
///
/// ```
/// use ferry::chunk::{frame, ChunkSize};
///
/// let chunks: Vec<_> = frame(b"hello world", ChunkSize::REFERENCE)
///     .map(|c| c.into_bytes())
///     .collect();
/// assert_eq!(chunks, vec![b"hello".to_vec(), b" worl".to_vec(), b"d".to_vec()]);
/// ```
pub fn frame(source: &[u8], size: ChunkSize) -> Frames<'_> {
    Frames {
        inner: source.chunks(size.get()),
    }
}

/// Iterator returned by [`frame`].
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    inner: std::slice::Chunks<'a, u8>,
}

impl Iterator for Frames<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        self.inner.next().map(|bytes| Chunk(bytes.to_vec()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Frames<'_> {}

/// Frames an [`AsyncRead`] source into full-size chunks.
///
/// Short reads from the underlying source are coalesced, so the chunk
/// boundaries depend only on the byte count, never on how the source
/// happened to deliver the bytes.
pub struct ChunkReader<R> {
    reader: R,
    size: ChunkSize,
    exhausted: bool,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(reader: R, size: ChunkSize) -> Self {
        Self {
            reader,
            size,
            exhausted: false,
        }
    }

    /// Read the next chunk, or `None` once the source is exhausted.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Chunk>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.size.get()];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                self.exhausted = true;
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(Chunk(buf)))
    }

    /// Adapt into a stream of chunks.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Chunk>> + Send
    where
        R: Send + 'static,
    {
        futures_util::stream::unfold(self, |mut reader| async move {
            match reader.next_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), reader)),
                Ok(None) => None,
                Err(e) => {
                    reader.exhausted = true;
                    Some((Err(e), reader))
                }
            }
        })
    }
}
