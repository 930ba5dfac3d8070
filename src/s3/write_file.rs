//! Streaming object writer over multipart upload.
//!
//! Writes accumulate into a part-sized buffer; each full buffer becomes one
//! `UploadPart` call and `close` commits the collected ETags with
//! `CompleteMultipartUpload`.

use std::cell::RefCell;
use std::io::{self, IoSlice};
use std::rc::Rc;

use bytes::Bytes;

use crate::aws::AwsResult;
use crate::http::{HttpClient, Transport};
use crate::s3::{io_error, S3Client};

pub const DEFAULT_PART_SIZE: usize = 8 << 20;
/// AWS rejects non-final parts smaller than 5 MiB.
pub const MIN_PART_SIZE: usize = 5 << 20;

/// A sequential writer that uploads an S3 object as a multipart upload.
///
/// A successful [`close`](WriteFile::close) leaves exactly one object under
/// `key`, assembled from the parts in write order. Dropping the file
/// without closing orphans the upload on the server.
pub struct WriteFile<T: Transport = HttpClient> {
    bucket: String,
    key: String,
    upload_id: String,
    client: Rc<RefCell<S3Client<T>>>,
    /// Part ETags in upload order; the next part number is `len() + 1`.
    parts: Vec<String>,
    buf: Vec<u8>,
    offset: usize,
}

impl<T: Transport> WriteFile<T> {
    /// Start a multipart upload. `part_size` is clamped to the AWS minimum
    /// of 5 MiB.
    pub async fn open(
        bucket: impl Into<String>,
        key: impl Into<String>,
        client: Rc<RefCell<S3Client<T>>>,
        part_size: usize,
    ) -> AwsResult<Self> {
        let bucket = bucket.into();
        let key = key.into();
        let part_size = part_size.max(MIN_PART_SIZE);

        let upload_id = client
            .borrow_mut()
            .create_multipart_upload(&bucket, &key)
            .await?;

        tracing::debug!(
            bucket = %bucket,
            key = %key,
            upload_id = %upload_id,
            part_size,
            "opened multipart upload"
        );

        Ok(Self {
            bucket,
            key,
            upload_id,
            client,
            parts: Vec::new(),
            buf: vec![0; part_size],
            offset: 0,
        })
    }

    /// Buffer `data`, uploading a part whenever the pending buffer fills.
    /// Always consumes the whole input.
    pub async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < data.len() {
            let n = (data.len() - written).min(self.buf.len() - self.offset);
            self.buf[self.offset..self.offset + n].copy_from_slice(&data[written..written + n]);
            self.offset += n;
            written += n;

            if self.offset == self.buf.len() {
                self.flush().await.map_err(io_error)?;
            }
        }
        Ok(written)
    }

    /// Gather write: buffers each slice in turn.
    pub async fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let mut written = 0;
        for buf in bufs {
            written += self.write(buf).await?;
        }
        Ok(written)
    }

    /// Upload any residual bytes as the final (possibly short) part, then
    /// complete the upload. On failure the upload is aborted best-effort
    /// before the error is reported.
    pub async fn close(mut self) -> io::Result<()> {
        if let Err(err) = self.finalize().await {
            tracing::warn!(
                bucket = %self.bucket,
                key = %self.key,
                upload_id = %self.upload_id,
                error = %err,
                "failed to finalize multipart upload"
            );
            if let Err(abort_err) = self
                .client
                .borrow_mut()
                .abort_multipart_upload(&self.bucket, &self.key, &self.upload_id)
                .await
            {
                tracing::warn!(
                    upload_id = %self.upload_id,
                    error = %abort_err,
                    "failed to abort multipart upload"
                );
            }
            return Err(io_error(err));
        }
        Ok(())
    }

    async fn finalize(&mut self) -> AwsResult<()> {
        self.flush().await?;

        let etag = self
            .client
            .borrow_mut()
            .complete_multipart_upload(&self.bucket, &self.key, &self.upload_id, &self.parts)
            .await?;

        tracing::debug!(
            bucket = %self.bucket,
            key = %self.key,
            etag = %etag,
            parts = self.parts.len(),
            "completed multipart upload"
        );
        Ok(())
    }

    async fn flush(&mut self) -> AwsResult<()> {
        if self.offset == 0 {
            return Ok(());
        }

        let part = Bytes::copy_from_slice(&self.buf[..self.offset]);
        let part_number = (self.parts.len() + 1) as u32;
        let etag = self
            .client
            .borrow_mut()
            .upload_part(&self.bucket, &self.key, part_number, &self.upload_id, part)
            .await?;

        self.parts.push(etag);
        self.offset = 0;
        Ok(())
    }
}
