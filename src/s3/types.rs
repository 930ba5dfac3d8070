//! S3 XML response parsers.
//!
//! All parsers reject unparseable XML and a missing root element with
//! `InvalidResponse`; missing optional children default to empty values.

use bytes::Bytes;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::aws::{AwsError, AwsResult};

/// A ranged GET result. `object_size` is the size of the whole object, not
/// of the returned range.
#[derive(Debug, Clone)]
pub struct GetObjectResult {
    pub body: Bytes,
    pub object_size: u64,
}

/// One page of a ListObjectsV2 response.
#[derive(Debug, Clone, Default)]
pub(crate) struct ListObjectsPage {
    pub objects: Vec<String>,
    pub is_truncated: bool,
    pub continuation_token: Option<String>,
}

fn xml_error(context: &str) -> AwsError {
    AwsError::invalid_response(format!("{context}: invalid xml"))
}

fn root_error(context: &str) -> AwsError {
    AwsError::invalid_response(format!("{context}: root element not found"))
}

/// Parse a `ListAllMyBucketsResult` document into bucket names, in document
/// order.
pub(crate) fn parse_list_buckets(xml: &[u8]) -> AwsResult<Vec<String>> {
    const CONTEXT: &str = "parse list buckets response";

    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut saw_root = false;
    let mut in_bucket = false;
    let mut buckets = Vec::new();
    let mut current_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.local_name();
                if !saw_root {
                    if name.as_ref() != b"ListAllMyBucketsResult" {
                        return Err(root_error(CONTEXT));
                    }
                    saw_root = true;
                } else if name.as_ref() == b"Bucket" {
                    in_bucket = true;
                }
            }
            Ok(Event::Text(e)) => {
                current_text = e.unescape().map_err(|_| xml_error(CONTEXT))?.into_owned();
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Name" if in_bucket => buckets.push(std::mem::take(&mut current_text)),
                    b"Bucket" => in_bucket = false,
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(xml_error(CONTEXT)),
            _ => {}
        }
    }

    if !saw_root {
        return Err(root_error(CONTEXT));
    }
    Ok(buckets)
}

/// Parse one `ListBucketResult` page.
pub(crate) fn parse_list_objects(xml: &[u8]) -> AwsResult<ListObjectsPage> {
    const CONTEXT: &str = "parse list objects response";

    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut saw_root = false;
    let mut in_contents = false;
    let mut page = ListObjectsPage::default();
    let mut current_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.local_name();
                if !saw_root {
                    if name.as_ref() != b"ListBucketResult" {
                        return Err(root_error(CONTEXT));
                    }
                    saw_root = true;
                } else if name.as_ref() == b"Contents" {
                    in_contents = true;
                }
            }
            Ok(Event::Text(e)) => {
                current_text = e.unescape().map_err(|_| xml_error(CONTEXT))?.into_owned();
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Key" if in_contents => {
                        page.objects.push(std::mem::take(&mut current_text));
                    }
                    b"Contents" => in_contents = false,
                    b"IsTruncated" => page.is_truncated = current_text == "true",
                    b"NextContinuationToken" => {
                        page.continuation_token = Some(std::mem::take(&mut current_text));
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(xml_error(CONTEXT)),
            _ => {}
        }
    }

    if !saw_root {
        return Err(root_error(CONTEXT));
    }
    Ok(page)
}

/// Parse an `InitiateMultipartUploadResult` document into the upload id.
pub(crate) fn parse_create_multipart_upload(xml: &[u8]) -> AwsResult<String> {
    const CONTEXT: &str = "parse create multipart upload response";
    parse_single_text(xml, b"InitiateMultipartUploadResult", b"UploadId", CONTEXT)
}

/// Parse a `CompleteMultipartUploadResult` document into the object ETag,
/// with surrounding quotes stripped.
pub(crate) fn parse_complete_multipart_upload(xml: &[u8]) -> AwsResult<String> {
    const CONTEXT: &str = "parse complete multipart upload response";
    let etag = parse_single_text(xml, b"CompleteMultipartUploadResult", b"ETag", CONTEXT)?;
    Ok(etag.trim_matches('"').to_string())
}

fn parse_single_text(xml: &[u8], root: &[u8], element: &[u8], context: &str) -> AwsResult<String> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut saw_root = false;
    let mut value = String::new();
    let mut current_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if !saw_root {
                    if e.local_name().as_ref() != root {
                        return Err(root_error(context));
                    }
                    saw_root = true;
                }
            }
            Ok(Event::Text(e)) => {
                current_text = e.unescape().map_err(|_| xml_error(context))?.into_owned();
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == element {
                    value = std::mem::take(&mut current_text);
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(xml_error(context)),
            _ => {}
        }
    }

    if !saw_root {
        return Err(root_error(context));
    }
    Ok(value)
}
