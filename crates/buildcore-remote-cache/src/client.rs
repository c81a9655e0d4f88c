//! HTTP remote cache client.
//!
//! `GET /cas/<hash>` → 200 bytes | 404; `HEAD /cas/<hash>` → 200 | 404;
//! `PUT /cas/<hash>` → 201 | 400 (size) | 409 (exists, idempotent). Uses a
//! blocking `reqwest::blocking::Client`, matching this crate's OS-thread
//! model rather than `turborepo-api-client`'s async one.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use thiserror::Error;

use crate::{circuit_breaker::CircuitBreaker, rate_limiter::TokenBucketLimiter, retry};

const COMPRESSION_THRESHOLD_BYTES: usize = 1024;

#[derive(Debug, Error)]
pub enum RemoteCacheError {
    #[error("remote cache request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("artifact exceeds configured size limit ({size} > {limit})")]
    TooLarge { size: u64, limit: u64 },
    #[error("circuit breaker open for remote cache endpoint")]
    BreakerOpen,
    #[error("rate limited, try again later")]
    RateLimited,
    #[error("unexpected remote cache response: {0}")]
    UnexpectedStatus(reqwest::StatusCode),
    #[error("failed to decode compressed artifact: {0}")]
    Decode(std::io::Error),
}

/// The tier's narrow capability set, independent of transport — so
/// `CacheCoordinator` can depend on this trait rather than the concrete
/// HTTP client.
pub trait RemoteCache: Send + Sync {
    fn get(&self, hash: &str) -> Result<Option<Vec<u8>>, RemoteCacheError>;
    fn put(&self, hash: &str, bytes: &[u8]) -> Result<(), RemoteCacheError>;
    fn has(&self, hash: &str) -> Result<bool, RemoteCacheError>;
}

pub struct HttpRemoteCache {
    client: Client,
    base_url: String,
    max_artifact_bytes: u64,
    compress: bool,
    breaker: CircuitBreaker,
    limiter: TokenBucketLimiter,
}

impl HttpRemoteCache {
    pub fn new(base_url: impl Into<String>, timeout: Duration, max_artifact_bytes: u64, compress: bool) -> Result<Self, RemoteCacheError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            max_artifact_bytes,
            compress,
            breaker: CircuitBreaker::new(),
            limiter: TokenBucketLimiter::new(32.0, 8.0),
        })
    }

    fn url_for(&self, hash: &str) -> String {
        format!("{}/cas/{hash}", self.base_url.trim_end_matches('/'))
    }

    fn gate(&self) -> Result<(), RemoteCacheError> {
        if !self.breaker.allow() {
            return Err(RemoteCacheError::BreakerOpen);
        }
        if !self.limiter.try_acquire() {
            return Err(RemoteCacheError::RateLimited);
        }
        Ok(())
    }

    fn record_outcome<T>(&self, result: Result<T, reqwest::Error>) -> Result<T, RemoteCacheError> {
        match result {
            Ok(value) => {
                self.breaker.on_success();
                Ok(value)
            }
            Err(err) => {
                self.breaker.on_failure();
                Err(err.into())
            }
        }
    }
}

impl RemoteCache for HttpRemoteCache {
    #[tracing::instrument(skip(self))]
    fn get(&self, hash: &str) -> Result<Option<Vec<u8>>, RemoteCacheError> {
        self.gate()?;
        let url = self.url_for(hash);
        let response = self.record_outcome(retry::with_retry(|| self.client.get(&url).send()))?;

        match response.status() {
            StatusCode::OK => {
                let encoding = response
                    .headers()
                    .get(reqwest::header::CONTENT_ENCODING)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let bytes = response.bytes().map_err(RemoteCacheError::Request)?;
                let bytes = if encoding.as_deref() == Some("zstd") {
                    zstd::decode_all(bytes.as_ref()).map_err(RemoteCacheError::Decode)?
                } else {
                    bytes.to_vec()
                };
                Ok(Some(bytes))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Ok(None),
        }
    }

    #[tracing::instrument(skip(self, bytes))]
    fn put(&self, hash: &str, bytes: &[u8]) -> Result<(), RemoteCacheError> {
        if bytes.len() as u64 > self.max_artifact_bytes {
            return Err(RemoteCacheError::TooLarge {
                size: bytes.len() as u64,
                limit: self.max_artifact_bytes,
            });
        }
        self.gate()?;
        let url = self.url_for(hash);

        let (body, content_encoding) = if self.compress && bytes.len() > COMPRESSION_THRESHOLD_BYTES {
            (zstd::encode_all(bytes, 0).unwrap_or_else(|_| bytes.to_vec()), Some("zstd"))
        } else {
            (bytes.to_vec(), None)
        };

        let response = self.record_outcome(retry::with_retry(|| {
            let mut req = self.client.put(&url).body(body.clone());
            if let Some(enc) = content_encoding {
                req = req.header(reqwest::header::CONTENT_ENCODING, enc);
            }
            req.send()
        }))?;

        match response.status() {
            StatusCode::CREATED | StatusCode::CONFLICT => Ok(()),
            StatusCode::BAD_REQUEST => Err(RemoteCacheError::TooLarge {
                size: bytes.len() as u64,
                limit: self.max_artifact_bytes,
            }),
            other => Err(RemoteCacheError::UnexpectedStatus(other)),
        }
    }

    #[tracing::instrument(skip(self))]
    fn has(&self, hash: &str) -> Result<bool, RemoteCacheError> {
        self.gate()?;
        let url = self.url_for(hash);
        let response = self.record_outcome(retry::with_retry(|| self.client.head(&url).send()))?;
        Ok(response.status() == StatusCode::OK)
    }
}
