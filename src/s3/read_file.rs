//! Streaming object reader over ranged GETs.
//!
//! The object is downloaded as fixed-size byte ranges into a ring buffer,
//! so memory stays bounded regardless of object size and every range is an
//! independent, retryable request.

use std::cell::RefCell;
use std::io::{self, IoSliceMut};
use std::rc::Rc;

use crate::http::{HttpClient, Transport};
use crate::s3::{io_error, S3Client};

pub const DEFAULT_CHUNK_SIZE: usize = 8 << 20;

/// Buffer for one downloaded chunk. A chunk is always fully drained before
/// the next download, so commits start at the front.
struct RingBuf {
    buf: Vec<u8>,
    pos: usize,
    len: usize,
}

impl RingBuf {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            pos: 0,
            len: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn commit(&mut self, data: &[u8]) {
        assert!(self.is_empty(), "committing into a non-empty buffer");
        assert!(data.len() <= self.capacity());
        self.buf[..data.len()].copy_from_slice(data);
        self.pos = 0;
        self.len = data.len();
    }

    /// Copy as much as possible into `out`, returning the number of bytes
    /// consumed.
    fn copy_to(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        self.len -= n;
        n
    }
}

/// A sequential reader over an S3 object.
///
/// Reads return 0 once the whole object has been delivered. The client
/// handle is shared, not owned: several files may stream through the same
/// client as long as they stay on one executor.
pub struct ReadFile<T: Transport = HttpClient> {
    bucket: String,
    key: String,
    client: Rc<RefCell<S3Client<T>>>,
    buf: RingBuf,
    /// Bytes delivered to the caller so far.
    file_read: u64,
    /// 0 until the first chunk reports the object size.
    file_size: u64,
}

impl<T: Transport> ReadFile<T> {
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        client: Rc<RefCell<S3Client<T>>>,
    ) -> Self {
        Self::with_chunk_size(bucket, key, client, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(
        bucket: impl Into<String>,
        key: impl Into<String>,
        client: Rc<RefCell<S3Client<T>>>,
        chunk_size: usize,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            client,
            buf: RingBuf::with_capacity(chunk_size),
            file_read: 0,
            file_size: 0,
        }
    }

    /// The object size as reported by the first downloaded chunk; 0 before
    /// the first read.
    pub fn size(&self) -> u64 {
        self.file_size
    }

    pub fn close(self) -> io::Result<()> {
        Ok(())
    }

    /// Read into `buf`, downloading further chunks as needed. Returns the
    /// number of bytes read; 0 signals end of file.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read_n = self.read_buf(buf).await?;

        tracing::trace!(
            read = read_n,
            file_read = self.file_read,
            file_size = self.file_size,
            "read from object"
        );

        Ok(read_n)
    }

    /// Scatter read: fills each buffer in turn.
    pub async fn read_vectored(&mut self, bufs: &mut [IoSliceMut<'_>]) -> io::Result<usize> {
        let mut read_n = 0;
        for buf in bufs {
            read_n += self.read_buf(buf).await?;
        }
        Ok(read_n)
    }

    async fn read_buf(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut read_n = 0;
        loop {
            // Whole file delivered.
            if self.file_size > 0 && self.file_read == self.file_size {
                return Ok(read_n);
            }
            if read_n == buf.len() {
                return Ok(read_n);
            }

            let n = self.buf.copy_to(&mut buf[read_n..]);
            read_n += n;
            self.file_read += n as u64;

            if read_n < buf.len() {
                let committed = self.download_chunk().await.map_err(io_error)?;
                if committed == 0 {
                    // Zero-length object or a drained final range.
                    return Ok(read_n);
                }
            }
        }
    }

    async fn download_chunk(&mut self) -> crate::aws::AwsResult<usize> {
        if self.file_size > 0 && self.file_read == self.file_size {
            return Ok(0);
        }

        let range = self.next_byte_range();
        let chunk = self
            .client
            .borrow_mut()
            .get_object(&self.bucket, &self.key, &range)
            .await?;

        tracing::trace!(len = chunk.body.len(), range = %range, "downloaded chunk");

        self.buf.commit(&chunk.body);
        if self.file_size == 0 {
            self.file_size = chunk.object_size;
        }
        Ok(chunk.body.len())
    }

    fn next_byte_range(&self) -> String {
        format!(
            "bytes={}-{}",
            self.file_read,
            self.file_read + self.buf.capacity() as u64 - 1
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::{response, MockTransport};
    use crate::s3::tests::client;

    fn push_chunk(mock: &MockTransport, start: usize, total: usize, body: &[u8]) {
        let content_range = format!("bytes {}-{}/{}", start, start + body.len() - 1, total);
        mock.push_response(response(
            206,
            &[("Content-Range", content_range.as_str())],
            body,
        ));
    }

    fn read_file(mock: &MockTransport, chunk_size: usize) -> ReadFile<MockTransport> {
        let client = Rc::new(RefCell::new(client(mock)));
        ReadFile::with_chunk_size("bkt", "obj", client, chunk_size)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_read_streams_whole_object() {
        let mock = MockTransport::new();
        push_chunk(&mock, 0, 10, b"aaaa");
        push_chunk(&mock, 4, 10, b"bbbb");
        push_chunk(&mock, 8, 10, b"cc");

        let mut file = read_file(&mock, 4);
        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = file.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }

        assert_eq!(out, b"aaaabbbbcc");
        assert_eq!(file.size(), 10);

        let ranges: Vec<_> = mock
            .requests()
            .iter()
            .map(|req| req.header("range").unwrap().to_string())
            .collect();
        assert_eq!(ranges, vec!["bytes=0-3", "bytes=4-7", "bytes=8-11"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_read_large_buffer_spans_chunks() {
        let mock = MockTransport::new();
        push_chunk(&mock, 0, 6, b"abc");
        push_chunk(&mock, 3, 6, b"def");

        let mut file = read_file(&mock, 3);
        let mut buf = [0u8; 16];
        let n = file.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abcdef");

        // Everything was delivered; the next read is EOF without another
        // download.
        assert_eq!(file.read(&mut buf).await.unwrap(), 0);
        assert_eq!(mock.request_count(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_read_single_chunk_object() {
        let mock = MockTransport::new();
        // No Content-Range: size comes from the body length.
        mock.push_status(200, b"small");

        let mut file = read_file(&mock, 16);
        let mut buf = [0u8; 16];
        assert_eq!(file.read(&mut buf).await.unwrap(), 5);
        assert_eq!(&buf[..5], b"small");
        assert_eq!(file.read(&mut buf).await.unwrap(), 0);
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_read_empty_object() {
        let mock = MockTransport::new();
        mock.push_status(200, b"");

        let mut file = read_file(&mock, 16);
        let mut buf = [0u8; 8];
        assert_eq!(file.read(&mut buf).await.unwrap(), 0);
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_read_error_surfaces_as_io_error() {
        let mock = MockTransport::new();
        mock.push_status(404, b"");

        let mut file = read_file(&mock, 16);
        let mut buf = [0u8; 8];
        assert!(file.read(&mut buf).await.is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_read_vectored() {
        let mock = MockTransport::new();
        push_chunk(&mock, 0, 8, b"abcdefgh");

        let mut file = read_file(&mock, 8);
        let mut first = [0u8; 3];
        let mut second = [0u8; 5];
        let mut bufs = [IoSliceMut::new(&mut first), IoSliceMut::new(&mut second)];
        assert_eq!(file.read_vectored(&mut bufs).await.unwrap(), 8);
        assert_eq!(&first, b"abc");
        assert_eq!(&second, b"defgh");
    }
}
