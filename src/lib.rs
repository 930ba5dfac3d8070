//! Streaming Amazon S3 client for single-threaded async runtimes.
//!
//! The crate is layered bottom-up:
//!
//! - [`aws::url`] and [`aws::signer`] implement the AWS URL encoding rules
//!   and Signature Version 4 request signing.
//! - [`aws::credentials`] resolves credentials from an ordered provider
//!   chain, re-queried on every request attempt.
//! - [`http`] bridges requests onto a single cached HTTP/1.1 connection.
//! - [`aws::client`] composes the above into a retrying request pipeline.
//! - [`s3`] exposes the service operations plus [`s3::ReadFile`] and
//!   [`s3::WriteFile`] for streaming object I/O.
//!
//! All types are bound to the executor they were created on and are not
//! thread-safe; run them on a current-thread runtime.

pub mod aws;
pub mod http;
pub mod s3;

pub use aws::client::{Client, ClientConfig};
pub use aws::credentials::{Credentials, CredentialsProvider, EnvironmentProvider, ProviderChain};
pub use aws::signer::V4Signer;
pub use aws::url::{Scheme, Url};
pub use aws::{AwsError, AwsResult, ErrorKind, Request, Response};
pub use http::{HttpClient, HttpError, Transport};
pub use s3::{GetObjectResult, ReadFile, S3Client, WriteFile};
