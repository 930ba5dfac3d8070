//! AWS Signature Version 4 request signing.
//!
//! Every byte of the canonical request is load-bearing: a mis-sorted
//! header or a stray space produces `SignatureDoesNotMatch` on the server.
//! The request's header map is ordered by lower-cased name, which is
//! exactly the ordering the canonical form requires.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::aws::credentials::Credentials;
use crate::aws::Request;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Signs requests for a fixed region and service.
///
/// Signing is a pure function of `(credentials, request, time)`; the signer
/// itself holds no per-request state.
#[derive(Debug, Clone)]
pub struct V4Signer {
    region: String,
    service: String,
}

impl V4Signer {
    pub fn new(region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            service: service.into(),
        }
    }

    /// Sign `req` in place, adding `x-amz-date`, `x-amz-content-sha256`,
    /// `x-amz-security-token` (when the credentials carry one) and the
    /// final `authorization` header.
    pub fn sign(&self, creds: &Credentials, req: &mut Request, time: DateTime<Utc>) {
        if !creds.session_token.is_empty() {
            req.set_header("x-amz-security-token", creds.session_token.clone());
        }

        // Payloads are never signed; S3 accepts UNSIGNED-PAYLOAD over TLS.
        let payload_hash = UNSIGNED_PAYLOAD;

        // The seconds component is written as 00: the credential scope only
        // has to match the date header to the minute.
        let date_header = time.format("%Y%m%dT%H%M00Z").to_string();
        let simple_date = time.format("%Y%m%d").to_string();

        req.set_header("x-amz-date", date_header.clone());
        req.set_header("x-amz-content-sha256", payload_hash);

        let mut canonical_headers = String::with_capacity(req.headers.len() * 64);
        let mut signed_headers = String::with_capacity(req.headers.len() * 20);
        for (name, value) in &req.headers {
            canonical_headers.push_str(name);
            canonical_headers.push(':');
            canonical_headers.push_str(value.trim());
            canonical_headers.push('\n');

            if !signed_headers.is_empty() {
                signed_headers.push(';');
            }
            signed_headers.push_str(name);
        }

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            req.method.as_str(),
            req.url.canonical_path(),
            req.url.query_string(),
            canonical_headers,
            signed_headers,
            payload_hash
        );
        tracing::trace!(canonical_request = %canonical_request, "v4 signer: canonical request");

        let scope = format!(
            "{}/{}/{}/aws4_request",
            simple_date, self.region, self.service
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            date_header,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );
        tracing::trace!(string_to_sign = %string_to_sign, "v4 signer: string to sign");

        let mut secret = Vec::with_capacity(4 + creds.secret_access_key.len());
        secret.extend_from_slice(b"AWS4");
        secret.extend_from_slice(creds.secret_access_key.as_bytes());

        let key = hmac_sha256(&secret, simple_date.as_bytes());
        let key = hmac_sha256(&key, self.region.as_bytes());
        let key = hmac_sha256(&key, self.service.as_bytes());
        let key = hmac_sha256(&key, b"aws4_request");
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, creds.access_key_id, scope, signed_headers, signature
        );
        req.set_header("authorization", authorization);
    }
}

/// HMAC-SHA256 returning a fixed-size array
fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(msg);
    let result = mac.finalize().into_bytes();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Method;

    fn creds() -> Credentials {
        Credentials {
            access_key_id: "key".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: String::new(),
        }
    }

    fn request() -> Request {
        let mut req = Request::new(Method::GET);
        req.url.set_host("s3.amazonaws.com");
        req.url.set_path("/foo");
        req.set_header("host", "s3.amazonaws.com");
        req
    }

    fn sign_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_000_000_000, 0).unwrap()
    }

    #[test]
    fn test_sign_adds_required_headers() {
        let signer = V4Signer::new("eu-west-2", "s3");
        let mut req = request();
        signer.sign(&creds(), &mut req, sign_time());

        assert_eq!(req.header("x-amz-date"), Some("20010909T014600Z"));
        assert_eq!(req.header("x-amz-content-sha256"), Some("UNSIGNED-PAYLOAD"));
        assert!(req.header("x-amz-security-token").is_none());
        assert!(req.header("authorization").is_some());
    }

    #[test]
    fn test_sign_with_security_token() {
        let signer = V4Signer::new("eu-west-2", "s3");
        let mut token_creds = creds();
        token_creds.session_token = "token".to_string();

        let mut req = request();
        signer.sign(&token_creds, &mut req, sign_time());

        assert_eq!(req.header("x-amz-security-token"), Some("token"));
        let authorization = req.header("authorization").unwrap();
        assert!(authorization
            .contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date;x-amz-security-token"));
    }

    #[test]
    fn test_sign_is_deterministic() {
        let signer = V4Signer::new("eu-west-2", "s3");

        let mut first = request();
        signer.sign(&creds(), &mut first, sign_time());
        let mut second = request();
        signer.sign(&creds(), &mut second, sign_time());

        assert_eq!(first.header("authorization"), second.header("authorization"));
    }

    #[test]
    fn test_sign_independent_of_header_insertion_order() {
        let signer = V4Signer::new("eu-west-2", "s3");

        let mut forward = Request::new(Method::GET);
        forward.url.set_host("s3.amazonaws.com");
        forward.url.set_path("/foo");
        forward.set_header("host", "s3.amazonaws.com");
        forward.set_header("range", "bytes=0-99");

        let mut reversed = Request::new(Method::GET);
        reversed.url.set_host("s3.amazonaws.com");
        reversed.url.set_path("/foo");
        reversed.set_header("range", "bytes=0-99");
        reversed.set_header("host", "s3.amazonaws.com");

        signer.sign(&creds(), &mut forward, sign_time());
        signer.sign(&creds(), &mut reversed, sign_time());

        assert_eq!(
            forward.header("authorization"),
            reversed.header("authorization")
        );
    }

    #[test]
    fn test_hmac_sha256_fixed_size() {
        let result = hmac_sha256(b"test_key", b"test_message");
        assert_eq!(result.len(), 32);
    }
}
