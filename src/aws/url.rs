//! URL type matching the AWS canonical form.
//!
//! Path segments and query parameters are percent-encoded once, at
//! insertion, so emission for the wire and for signing is a pure read.

use std::collections::BTreeMap;
use std::fmt;

pub const HTTP_PORT: u16 = 80;
pub const HTTPS_PORT: u16 = 443;

/// Hex lookup table for percent encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    Http,
    #[default]
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => HTTP_PORT,
            Scheme::Https => HTTPS_PORT,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode a string with the AWS URL encoding scheme: unreserved characters
/// (alphanumerics plus `-_.~`) pass through, everything else becomes
/// uppercase `%XX`.
pub fn url_encode(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len() + 16);
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push('%');
                encoded.push(HEX_UPPER[(byte >> 4) as usize] as char);
                encoded.push(HEX_UPPER[(byte & 0xf) as usize] as char);
            }
        }
    }
    encoded
}

/// A URL stored in encoded form.
///
/// `path` holds the encoded path without a leading slash; query parameters
/// are kept sorted by encoded key, as the signer requires.
#[derive(Debug, Clone)]
pub struct Url {
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
    params: BTreeMap<String, String>,
}

impl Default for Url {
    fn default() -> Self {
        Self {
            scheme: Scheme::Https,
            host: String::new(),
            port: HTTPS_PORT,
            path: String::new(),
            params: BTreeMap::new(),
        }
    }
}

impl Url {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Encoded path without the leading slash.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Encoded path with the leading slash reinserted, as used on the wire
    /// and in the canonical request. An empty path becomes `/`.
    pub fn canonical_path(&self) -> String {
        format!("/{}", self.path)
    }

    /// Update the scheme. A port that matches a default HTTP/HTTPS port is
    /// switched to the new scheme's default; a custom port is kept.
    pub fn set_scheme(&mut self, scheme: Scheme) {
        self.scheme = scheme;
        if self.port == HTTP_PORT || self.port == HTTPS_PORT {
            self.port = scheme.default_port();
        }
    }

    /// Set the host from a `host[:port]` string. Callers pass validated
    /// input; a non-numeric port is a bug and panics.
    pub fn set_host(&mut self, host: &str) {
        match host.rsplit_once(':') {
            Some((name, port)) => {
                self.host = name.to_string();
                self.port = port.parse().expect("invalid port in host");
            }
            None => {
                self.host = host.to_string();
            }
        }
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    /// Set the path from a raw string. Each segment is encoded; empty
    /// segments from repeated slashes are elided.
    pub fn set_path(&mut self, path: &str) {
        let mut encoded = String::with_capacity(path.len());
        for segment in path.split('/') {
            if segment.is_empty() {
                continue;
            }
            if !encoded.is_empty() {
                encoded.push('/');
            }
            encoded.push_str(&url_encode(segment));
        }
        self.path = encoded;
    }

    /// Add a query parameter. Key and value are stored encoded; inserting a
    /// duplicate key overwrites the previous value.
    pub fn add_param(&mut self, key: &str, value: &str) {
        self.params.insert(url_encode(key), url_encode(value));
    }

    /// The canonical query string: `k1=v1&k2=v2` with keys in ascending
    /// byte order. Empty when there are no parameters.
    pub fn query_string(&self) -> String {
        let mut query = String::new();
        for (key, value) in &self.params {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(key);
            query.push('=');
            query.push_str(value);
        }
        query
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if self.port != self.scheme.default_port() {
            write!(f, ":{}", self.port)?;
        }
        write!(f, "/{}", self.path)?;
        let query = self.query_string();
        if !query.is_empty() {
            write!(f, "?{query}")?;
        }
        Ok(())
    }
}
