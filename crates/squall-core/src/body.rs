//! Chunked byte queues
//!
//! Both directions move bodies as queues of `Bytes` chunks closed by an
//! empty chunk, the end-of-message sentinel ([`EOM`]). The request side
//! keeps its queue re-readable by rotating chunks back to the tail; the
//! response side fills a queue through [`ChunkSink`].

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;

/// End-of-message sentinel
pub const EOM: Bytes = Bytes::new();

/// Default chunk size for response bodies
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Consumer of a request body, fed one chunk at a time
pub trait BodyReader {
    type Output;

    /// Called once per body chunk, in order
    fn on_part(&mut self, part: &[u8]);

    /// Called after the last chunk
    fn finish(self) -> Self::Output;
}

/// Collects the whole body into one buffer
#[derive(Debug, Default)]
pub struct BytesReader(BytesMut);

impl BodyReader for BytesReader {
    type Output = Bytes;

    fn on_part(&mut self, part: &[u8]) {
        self.0.extend_from_slice(part);
    }

    fn finish(self) -> Bytes {
        self.0.freeze()
    }
}

/// Collects the body as UTF-8 text (lossy)
#[derive(Debug, Default)]
pub struct StringReader(Vec<u8>);

impl BodyReader for StringReader {
    type Output = String;

    fn on_part(&mut self, part: &[u8]) {
        self.0.extend_from_slice(part);
    }

    fn finish(self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

/// Re-readable request body
///
/// Reading pops each chunk, hands it to the reader and pushes it back to
/// the tail, then re-queues the sentinel. Every read therefore sees the
/// same content, starting from the first chunk.
#[derive(Debug, Default)]
pub struct RequestBody {
    chunks: Mutex<VecDeque<Bytes>>,
}

impl RequestBody {
    /// Create an empty body (no chunks, no sentinel)
    pub fn new() -> Self {
        Self::default()
    }

    /// Seal a list of chunks into a readable body
    pub fn from_chunks(chunks: impl IntoIterator<Item = Bytes>) -> Self {
        let mut queue: VecDeque<Bytes> = chunks.into_iter().filter(|c| !c.is_empty()).collect();
        queue.push_back(EOM);
        Self {
            chunks: Mutex::new(queue),
        }
    }

    /// Stream every chunk through `reader`
    pub fn read<R: BodyReader>(&self, mut reader: R) -> R::Output {
        let mut chunks = self.chunks.lock();
        for _ in 0..chunks.len() {
            let Some(chunk) = chunks.pop_front() else {
                break;
            };
            if chunk.is_empty() {
                chunks.push_back(chunk);
                break;
            }
            reader.on_part(&chunk);
            chunks.push_back(chunk);
        }
        reader.finish()
    }

    /// Total number of body bytes
    pub fn len(&self) -> usize {
        self.chunks.lock().iter().map(Bytes::len).sum()
    }

    /// Check if the body holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `io::Write` sink that slices its input into fixed-size chunks
///
/// Counts every byte written. [`finish`](Self::finish) flushes the partial
/// chunk and closes the queue with the sentinel.
#[derive(Debug)]
pub struct ChunkSink {
    chunks: VecDeque<Bytes>,
    current: BytesMut,
    chunk_size: usize,
    written: u64,
}

impl ChunkSink {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunks: VecDeque::new(),
            current: BytesMut::with_capacity(chunk_size),
            chunk_size,
            written: 0,
        }
    }

    /// Bytes written so far
    pub fn written_bytes(&self) -> u64 {
        self.written
    }

    /// Flush and return the chunk queue, sentinel included
    pub fn finish(mut self) -> (VecDeque<Bytes>, u64) {
        self.push_current();
        self.chunks.push_back(EOM);
        (self.chunks, self.written)
    }

    fn push_current(&mut self) {
        if !self.current.is_empty() {
            let full = self.current.split();
            self.chunks.push_back(full.freeze());
            self.current.reserve(self.chunk_size);
        }
    }
}

impl Default for ChunkSink {
    fn default() -> Self {
        Self::new()
    }
}

impl io::Write for ChunkSink {
    fn write(&mut self, mut buf: &[u8]) -> io::Result<usize> {
        let total = buf.len();
        while !buf.is_empty() {
            let room = self.chunk_size - self.current.len();
            let take = room.min(buf.len());
            self.current.extend_from_slice(&buf[..take]);
            buf = &buf[take..];
            if self.current.len() == self.chunk_size {
                self.push_current();
            }
        }
        self.written += total as u64;
        Ok(total)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_body_is_rereadable() {
        let body = RequestBody::from_chunks(vec![
            Bytes::from_static(b"super"),
            Bytes::from_static(b"cali"),
            Bytes::from_static(b"fragilistic"),
        ]);

        let first = body.read(StringReader::default());
        let second = body.read(StringReader::default());

        assert_eq!(first, "supercalifragilistic");
        assert_eq!(first, second);
        assert_eq!(body.len(), 20);
    }

    #[test]
    fn test_empty_body_reads_nothing() {
        let body = RequestBody::new();
        assert!(body.read(BytesReader::default()).is_empty());

        let sealed = RequestBody::from_chunks(Vec::new());
        assert!(sealed.read(BytesReader::default()).is_empty());
        assert!(sealed.is_empty());
    }

    #[test]
    fn test_sink_chunks_and_counts() {
        let mut sink = ChunkSink::with_chunk_size(4);
        sink.write_all(b"0123456789").unwrap();
        assert_eq!(sink.written_bytes(), 10);

        let (chunks, written) = sink.finish();
        assert_eq!(written, 10);
        let lens: Vec<usize> = chunks.iter().map(Bytes::len).collect();
        assert_eq!(lens, vec![4, 4, 2, 0]);
        assert_eq!(chunks.back(), Some(&EOM));
    }

    #[test]
    fn test_sink_empty_has_only_sentinel() {
        let (chunks, written) = ChunkSink::new().finish();
        assert_eq!(written, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }
}
