//! S3 service operations and streaming file abstractions.

mod read_file;
mod types;
mod write_file;

pub use read_file::{ReadFile, DEFAULT_CHUNK_SIZE};
pub use types::GetObjectResult;
pub use write_file::{WriteFile, DEFAULT_PART_SIZE, MIN_PART_SIZE};

use std::fmt::Write as FmtWrite;
use std::io;

use bytes::Bytes;
use hyper::Method;

use crate::aws::client::{Client, ClientConfig};
use crate::aws::credentials::ProviderChain;
use crate::aws::{AwsError, AwsResult, Request};
use crate::http::{HttpClient, Transport};

use types::{
    parse_complete_multipart_upload, parse_create_multipart_upload, parse_list_buckets,
    parse_list_objects,
};

const DEFAULT_HOST: &str = "s3.amazonaws.com";

/// Convert an [`AwsError`] into an [`io::Error`] at the file-abstraction
/// boundary.
pub(crate) fn io_error(err: AwsError) -> io::Error {
    io::Error::other(err)
}

/// S3 client: the generic AWS client bound to the `s3` service plus the
/// service operations and XML parsing.
pub struct S3Client<T: Transport = HttpClient> {
    client: Client<T>,
}

impl S3Client<HttpClient> {
    pub fn new(config: ClientConfig, providers: ProviderChain) -> Self {
        Self {
            client: Client::new(config, providers, "s3"),
        }
    }
}

impl<T: Transport> S3Client<T> {
    pub fn with_transport(config: ClientConfig, providers: ProviderChain, http: T) -> Self {
        Self {
            client: Client::with_transport(config, providers, "s3", http),
        }
    }

    /// Host for bucket-less operations: the configured endpoint override or
    /// the AWS default.
    fn service_host(&self) -> String {
        match &self.client.config().endpoint {
            Some(endpoint) => endpoint.clone(),
            None => DEFAULT_HOST.to_string(),
        }
    }

    /// Host for bucket operations: the endpoint override or the
    /// virtual-hosted AWS form.
    fn bucket_host(&self, bucket: &str) -> String {
        match &self.client.config().endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("{bucket}.{DEFAULT_HOST}"),
        }
    }

    fn request(&self, method: Method, host: &str, path: &str) -> Request {
        let mut req = Request::new(method);
        req.url.set_host(host);
        req.url.set_path(path);
        req
    }

    /// List all buckets owned by the caller.
    pub async fn list_buckets(&mut self) -> AwsResult<Vec<String>> {
        let host = self.service_host();
        let req = self.request(Method::GET, &host, "/");

        let resp = self.client.send(&req).await?;
        parse_list_buckets(&resp.body)
    }

    /// List object keys with an optional prefix, following continuation
    /// tokens until the listing is exhausted or `limit` keys were collected
    /// (`limit == 0` means unlimited). Keys are returned in server order.
    pub async fn list_objects(
        &mut self,
        bucket: &str,
        prefix: &str,
        limit: usize,
    ) -> AwsResult<Vec<String>> {
        let host = self.bucket_host(bucket);
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut req = self.request(Method::GET, &host, "/");
            req.url.add_param("list-type", "2");
            if !prefix.is_empty() {
                req.url.add_param("prefix", prefix);
            }
            if limit > 0 {
                req.url
                    .add_param("max-keys", &(limit - objects.len()).to_string());
            }
            if let Some(token) = &continuation_token {
                req.url.add_param("continuation-token", token);
            }

            let resp = self.client.send(&req).await?;
            let page = parse_list_objects(&resp.body)?;
            tracing::debug!(
                objects = page.objects.len(),
                truncated = page.is_truncated,
                "listed objects page"
            );

            objects.extend(page.objects);
            if limit > 0 && objects.len() >= limit {
                return Ok(objects);
            }
            if !page.is_truncated {
                return Ok(objects);
            }
            match page.continuation_token {
                Some(token) if !token.is_empty() => continuation_token = Some(token),
                // S3 always supplies a token on a truncated listing.
                _ => {
                    return Err(AwsError::invalid_response(
                        "truncated list response missing continuation token",
                    ))
                }
            }
        }
    }

    /// Fetch a byte range of an object (`range` is a `bytes=a-b` header
    /// value). The full object size is taken from `Content-Range` when
    /// present, otherwise from the body length.
    pub async fn get_object(
        &mut self,
        bucket: &str,
        key: &str,
        range: &str,
    ) -> AwsResult<GetObjectResult> {
        let host = self.bucket_host(bucket);
        let mut req = self.request(Method::GET, &host, &format!("/{key}"));
        req.set_header("range", range);

        let resp = self.client.send(&req).await?;

        let object_size = match resp.header("content-range") {
            None => resp.body.len() as u64,
            Some(content_range) => content_range
                .rsplit_once('/')
                .and_then(|(_, total)| total.parse().ok())
                .ok_or_else(|| {
                    AwsError::invalid_response(format!(
                        "failed to parse object size: content-range={content_range}"
                    ))
                })?,
        };

        Ok(GetObjectResult {
            body: resp.body,
            object_size,
        })
    }

    /// Start a multipart upload and return its upload id.
    pub async fn create_multipart_upload(&mut self, bucket: &str, key: &str) -> AwsResult<String> {
        let host = self.bucket_host(bucket);
        let mut req = self.request(Method::POST, &host, &format!("/{key}"));
        req.url.add_param("uploads", "");

        let resp = self.client.send(&req).await?;
        let upload_id = parse_create_multipart_upload(&resp.body)?;
        tracing::debug!(upload_id = %upload_id, "created multipart upload");
        Ok(upload_id)
    }

    /// Upload one part. Part numbers are one-based. Returns the part's
    /// ETag with surrounding quotes stripped.
    pub async fn upload_part(
        &mut self,
        bucket: &str,
        key: &str,
        part_number: u32,
        upload_id: &str,
        part: Bytes,
    ) -> AwsResult<String> {
        let host = self.bucket_host(bucket);
        let mut req = self.request(Method::PUT, &host, &format!("/{key}"));
        req.url.add_param("partNumber", &part_number.to_string());
        req.url.add_param("uploadId", upload_id);
        req.set_header("content-length", part.len().to_string());
        req.body = part;

        let resp = self.client.send(&req).await?;
        let etag = resp
            .header("etag")
            .unwrap_or_default()
            .trim_matches('"')
            .to_string();
        Ok(etag)
    }

    /// Commit the upload from the ETags collected in part order. Returns
    /// the ETag of the assembled object.
    pub async fn complete_multipart_upload(
        &mut self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        etags: &[String],
    ) -> AwsResult<String> {
        let host = self.bucket_host(bucket);
        let mut req = self.request(Method::POST, &host, &format!("/{key}"));
        req.url.add_param("uploadId", upload_id);

        let mut xml = String::with_capacity(etags.len() * 96 + 128);
        xml.push_str("<?xml version=\"1.0\"?>");
        xml.push_str(
            "<CompleteMultipartUpload xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">",
        );
        for (i, etag) in etags.iter().enumerate() {
            let _ = write!(
                xml,
                "<Part><ETag>\"{}\"</ETag><PartNumber>{}</PartNumber></Part>",
                etag.trim_matches('"'),
                i + 1
            );
        }
        xml.push_str("</CompleteMultipartUpload>");

        req.set_header("content-length", xml.len().to_string());
        req.body = Bytes::from(xml);

        let resp = self.client.send(&req).await?;
        parse_complete_multipart_upload(&resp.body)
    }

    /// Cancel a multipart upload, discarding all uploaded parts.
    pub async fn abort_multipart_upload(
        &mut self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> AwsResult<()> {
        let host = self.bucket_host(bucket);
        let mut req = self.request(Method::DELETE, &host, &format!("/{key}"));
        req.url.add_param("uploadId", upload_id);

        self.client.send(&req).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::credentials::{Credentials, CredentialsProvider};
    use crate::aws::ErrorKind;
    use crate::http::mock::{response, MockTransport};
    use async_trait::async_trait;

    struct StaticProvider;

    #[async_trait(?Send)]
    impl CredentialsProvider for StaticProvider {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn load(&mut self) -> Option<Credentials> {
            Some(Credentials {
                access_key_id: "key".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: String::new(),
            })
        }
    }

    fn chain() -> ProviderChain {
        let mut chain = ProviderChain::new();
        chain.push(StaticProvider);
        chain
    }

    pub(crate) fn client(mock: &MockTransport) -> S3Client<MockTransport> {
        S3Client::with_transport(ClientConfig::default(), chain(), mock.clone())
    }

    pub(crate) fn client_with_endpoint(
        mock: &MockTransport,
        endpoint: &str,
    ) -> S3Client<MockTransport> {
        let config = ClientConfig {
            endpoint: Some(endpoint.to_string()),
            ..ClientConfig::default()
        };
        S3Client::with_transport(config, chain(), mock.clone())
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_list_buckets() {
        let mock = MockTransport::new();
        mock.push_status(
            200,
            b"<ListAllMyBucketsResult><Buckets>\
              <Bucket><Name>bucket-1</Name></Bucket>\
              <Bucket><Name>bucket-2</Name></Bucket>\
              </Buckets></ListAllMyBucketsResult>",
        );

        let buckets = client(&mock).list_buckets().await.unwrap();
        assert_eq!(buckets, vec!["bucket-1".to_string(), "bucket-2".to_string()]);

        let sent = mock.requests();
        assert_eq!(sent[0].url.host(), "s3.amazonaws.com");
        assert_eq!(sent[0].url.canonical_path(), "/");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_list_objects_paginates() {
        let mock = MockTransport::new();
        mock.push_status(
            200,
            b"<ListBucketResult>\
              <IsTruncated>true</IsTruncated>\
              <Contents><Key>o1</Key></Contents>\
              <Contents><Key>o2</Key></Contents>\
              <NextContinuationToken>T1</NextContinuationToken>\
              </ListBucketResult>",
        );
        mock.push_status(
            200,
            b"<ListBucketResult>\
              <IsTruncated>false</IsTruncated>\
              <Contents><Key>o3</Key></Contents>\
              </ListBucketResult>",
        );

        let objects = client(&mock).list_objects("bkt", "", 0).await.unwrap();
        assert_eq!(
            objects,
            vec!["o1".to_string(), "o2".to_string(), "o3".to_string()]
        );

        let sent = mock.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].url.host(), "bkt.s3.amazonaws.com");
        assert_eq!(sent[0].url.query_string(), "list-type=2");
        assert_eq!(
            sent[1].url.query_string(),
            "continuation-token=T1&list-type=2"
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_list_objects_prefix_and_limit() {
        let mock = MockTransport::new();
        mock.push_status(
            200,
            b"<ListBucketResult><IsTruncated>false</IsTruncated>\
              <Contents><Key>a/1</Key></Contents></ListBucketResult>",
        );

        client(&mock).list_objects("bkt", "a/", 10).await.unwrap();

        assert_eq!(
            mock.requests()[0].url.query_string(),
            "list-type=2&max-keys=10&prefix=a%2F"
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_list_objects_stops_at_limit() {
        let mock = MockTransport::new();
        mock.push_status(
            200,
            b"<ListBucketResult><IsTruncated>true</IsTruncated>\
              <Contents><Key>o1</Key></Contents>\
              <Contents><Key>o2</Key></Contents>\
              <NextContinuationToken>T1</NextContinuationToken>\
              </ListBucketResult>",
        );

        let objects = client(&mock).list_objects("bkt", "", 2).await.unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_list_objects_truncated_without_token() {
        let mock = MockTransport::new();
        mock.push_status(
            200,
            b"<ListBucketResult><IsTruncated>true</IsTruncated>\
              <Contents><Key>o1</Key></Contents></ListBucketResult>",
        );

        let err = client(&mock).list_objects("bkt", "", 0).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidResponse);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_get_object_with_content_range() {
        let mock = MockTransport::new();
        mock.push_response(response(
            206,
            &[("Content-Range", "bytes 0-3/100")],
            b"abcd",
        ));

        let result = client(&mock)
            .get_object("bkt", "obj", "bytes=0-3")
            .await
            .unwrap();
        assert_eq!(&result.body[..], b"abcd");
        assert_eq!(result.object_size, 100);
        assert_eq!(mock.requests()[0].header("range"), Some("bytes=0-3"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_get_object_without_content_range() {
        let mock = MockTransport::new();
        mock.push_status(200, b"whole body");

        let result = client(&mock)
            .get_object("bkt", "obj", "bytes=0-99")
            .await
            .unwrap();
        assert_eq!(result.object_size, 10);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_get_object_malformed_content_range() {
        let mock = MockTransport::new();
        mock.push_response(response(206, &[("Content-Range", "bytes 0-3/*")], b"abcd"));

        let err = client(&mock)
            .get_object("bkt", "obj", "bytes=0-3")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidResponse);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_create_multipart_upload() {
        let mock = MockTransport::new();
        mock.push_status(
            200,
            b"<InitiateMultipartUploadResult><UploadId>uid-1</UploadId>\
              </InitiateMultipartUploadResult>",
        );

        let upload_id = client(&mock)
            .create_multipart_upload("bkt", "obj")
            .await
            .unwrap();
        assert_eq!(upload_id, "uid-1");

        let sent = mock.requests();
        assert_eq!(sent[0].method, Method::POST);
        assert_eq!(sent[0].url.query_string(), "uploads=");
        assert_eq!(sent[0].url.canonical_path(), "/obj");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_upload_part_strips_etag_quotes() {
        let mock = MockTransport::new();
        mock.push_response(response(200, &[("ETag", "\"etag-1\"")], b""));

        let etag = client(&mock)
            .upload_part("bkt", "obj", 1, "uid-1", Bytes::from_static(b"data"))
            .await
            .unwrap();
        assert_eq!(etag, "etag-1");

        let sent = mock.requests();
        assert_eq!(sent[0].method, Method::PUT);
        assert_eq!(sent[0].url.query_string(), "partNumber=1&uploadId=uid-1");
        assert_eq!(sent[0].header("content-length"), Some("4"));
        assert_eq!(&sent[0].body[..], b"data");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_complete_multipart_upload_body() {
        let mock = MockTransport::new();
        mock.push_status(
            200,
            b"<CompleteMultipartUploadResult><ETag>\"obj-etag\"</ETag>\
              </CompleteMultipartUploadResult>",
        );

        let etags = vec!["e1".to_string(), "e2".to_string()];
        let etag = client(&mock)
            .complete_multipart_upload("bkt", "obj", "uid-1", &etags)
            .await
            .unwrap();
        assert_eq!(etag, "obj-etag");

        let sent = mock.requests();
        assert_eq!(sent[0].url.query_string(), "uploadId=uid-1");
        let body = std::str::from_utf8(&sent[0].body).unwrap();
        assert_eq!(
            body,
            "<?xml version=\"1.0\"?>\
             <CompleteMultipartUpload xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
             <Part><ETag>\"e1\"</ETag><PartNumber>1</PartNumber></Part>\
             <Part><ETag>\"e2\"</ETag><PartNumber>2</PartNumber></Part>\
             </CompleteMultipartUpload>"
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_abort_multipart_upload() {
        let mock = MockTransport::new();
        mock.push_status(204, b"");

        client(&mock)
            .abort_multipart_upload("bkt", "obj", "uid-1")
            .await
            .unwrap();

        let sent = mock.requests();
        assert_eq!(sent[0].method, Method::DELETE);
        assert_eq!(sent[0].url.query_string(), "uploadId=uid-1");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_endpoint_override() {
        let mock = MockTransport::new();
        mock.push_status(
            200,
            b"<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>",
        );

        client_with_endpoint(&mock, "localhost:9000")
            .list_objects("bkt", "", 0)
            .await
            .unwrap();

        let sent = mock.requests();
        assert_eq!(sent[0].url.host(), "localhost");
        assert_eq!(sent[0].url.port(), 9000);
        assert_eq!(sent[0].header("host"), Some("localhost"));
    }
}
