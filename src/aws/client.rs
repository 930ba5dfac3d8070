//! Generic AWS client: credential resolution, signing, dispatch, error
//! classification and retry.

use std::time::Duration;

use chrono::Utc;

use crate::aws::credentials::{CredentialsProvider, ProviderChain};
use crate::aws::signer::V4Signer;
use crate::aws::url::Scheme;
use crate::aws::{AwsError, AwsResult, ErrorKind, Request, Response};
use crate::http::{HttpClient, Transport};

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(20);

/// Client-wide settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub region: String,
    /// Overrides the default AWS endpoint when set; may carry a port
    /// (`localhost:9000`).
    pub endpoint: Option<String>,
    pub https: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            https: true,
        }
    }
}

/// A retrying, credential-resolving request pipeline for one AWS service.
///
/// Each attempt starts from a clone of the caller's request: credentials
/// are re-loaded (providers may rotate them) and the clone is signed
/// freshly, so a stale `authorization` header can never leak into the
/// canonical form of the next attempt.
pub struct Client<T: Transport = HttpClient> {
    config: ClientConfig,
    providers: ProviderChain,
    signer: V4Signer,
    http: T,
}

impl Client<HttpClient> {
    pub fn new(config: ClientConfig, providers: ProviderChain, service: &str) -> Self {
        Self::with_transport(config, providers, service, HttpClient::new())
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(
        config: ClientConfig,
        providers: ProviderChain,
        service: &str,
        http: T,
    ) -> Self {
        let signer = V4Signer::new(config.region.clone(), service);
        Self {
            config,
            providers,
            signer,
            http,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send a request, retrying retryable failures up to five attempts with
    /// full-jitter backoff.
    pub async fn send(&mut self, req: &Request) -> AwsResult<Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_attempt(req.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(err) => {
                    if !err.retryable || attempt >= MAX_ATTEMPTS {
                        return Err(err);
                    }
                    let delay = backoff_delay(attempt);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn send_attempt(&mut self, mut req: Request) -> AwsResult<Response> {
        let scheme = if self.config.https {
            Scheme::Https
        } else {
            Scheme::Http
        };
        req.url.set_scheme(scheme);
        let host = req.url.host().to_string();
        req.set_header("host", host);

        let creds = match self.providers.load().await {
            Some(creds) => creds,
            None => {
                tracing::error!("failed to load credentials");
                return Err(AwsError::new(
                    ErrorKind::Unauthorized,
                    "no credentials found",
                    false,
                ));
            }
        };

        self.signer.sign(&creds, &mut req, Utc::now());

        let resp = match self.http.roundtrip(&req).await {
            Ok(resp) => resp,
            Err(err) => {
                return Err(AwsError::new(ErrorKind::Network, err.to_string(), true));
            }
        };

        if resp.status.is_success() {
            return Ok(resp);
        }

        let mut err = if resp.body.is_empty() {
            AwsError::from_status(resp.status)
        } else {
            AwsError::parse(&resp.body)
        };
        // Server-side failures are worth another attempt regardless of what
        // the body said.
        err.retryable = resp.status.is_server_error();
        Err(err)
    }
}

/// Full-jitter backoff: a uniform delay in `[0, min(cap, base * 2^(n-1)))`.
fn backoff_delay(attempt: u32) -> Duration {
    let ceiling = BACKOFF_CAP.min(BACKOFF_BASE.saturating_mul(1 << (attempt - 1)));
    ceiling.mul_f64(rand_unit())
}

/// Pseudo-random value in [0.0, 1.0) without pulling in the rand crate.
/// Uses current time nanoseconds as the entropy source.
fn rand_unit() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}
