//! AWS request pipeline: wire types, error taxonomy, credentials, signing
//! and the generic retrying client.

pub mod client;
pub mod credentials;
pub mod signer;
pub mod url;

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use hyper::{Method, StatusCode};
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use crate::aws::url::Url;

pub type AwsResult<T> = std::result::Result<T, AwsError>;

/// Stable error classification shared by all operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No credentials could be resolved.
    Unauthorized,
    /// Transport-level failure; the request may never have reached the
    /// server.
    Network,
    /// The response could not be interpreted (bad XML, missing elements).
    InvalidResponse,
    AccessDenied,
    InvalidToken,
    ResourceNotFound,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Network => "network",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::InvalidToken => "invalid_token",
            ErrorKind::ResourceNotFound => "resource_not_found",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A typed AWS error with a free-form diagnostic message.
///
/// `retryable` reflects whether the failure is worth another attempt; the
/// client overrides it from the response status after classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct AwsError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl AwsError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidResponse, message, false)
    }

    /// Synthesize an error from a status code when the response carried no
    /// body to parse.
    pub fn from_status(status: StatusCode) -> Self {
        let kind = match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::AccessDenied,
            StatusCode::NOT_FOUND => ErrorKind::ResourceNotFound,
            _ => ErrorKind::Unknown,
        };
        Self::new(kind, format!("http status: {status}"), false)
    }

    /// Parse an S3 `<Error><Code>..</Code><Message>..</Message></Error>`
    /// response body.
    pub fn parse(body: &[u8]) -> Self {
        let mut reader = Reader::from_reader(body);
        reader.config_mut().trim_text_start = true;
        reader.config_mut().trim_text_end = true;

        let mut saw_root = false;
        let mut code = String::new();
        let mut message = String::new();
        let mut current_text = String::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                    if !saw_root {
                        if e.local_name().as_ref() != b"Error" {
                            return Self::invalid_response("parse error response: Error not found");
                        }
                        saw_root = true;
                    }
                }
                Ok(Event::Text(e)) => match e.unescape() {
                    Ok(text) => current_text = text.into_owned(),
                    Err(_) => {
                        return Self::invalid_response("parse error response: invalid xml");
                    }
                },
                Ok(Event::End(e)) => {
                    match e.local_name().as_ref() {
                        b"Code" => code = std::mem::take(&mut current_text),
                        b"Message" => message = std::mem::take(&mut current_text),
                        _ => {}
                    }
                    current_text.clear();
                }
                Ok(Event::Eof) => break,
                Err(_) => {
                    return Self::invalid_response("parse error response: invalid xml");
                }
                _ => {}
            }
        }

        if !saw_root {
            return Self::invalid_response("parse error response: Error not found");
        }
        if code.is_empty() {
            return Self::invalid_response("parse error response: Code not found");
        }
        Self::new(kind_from_code(&code), message, false)
    }
}

/// Error codes map case-sensitively; anything unrecognized is `Unknown`.
fn kind_from_code(code: &str) -> ErrorKind {
    match code {
        "InvalidToken" => ErrorKind::InvalidToken,
        _ => ErrorKind::Unknown,
    }
}

/// An HTTP request before signing and dispatch.
///
/// Header keys are lower-cased on insertion so iteration order matches the
/// canonical headers ordering required by the signer.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            url: Url::new(),
            headers: BTreeMap::new(),
            body: Bytes::new(),
        }
    }

    /// Insert a header, overwriting any previous value for the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl Response {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}
