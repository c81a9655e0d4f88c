//! Optional HTTP-based remote cache tier. Non-blocking from the
//! build's critical path: every failure here degrades to "treat as miss,
//! continue with local tiers only" — callers should never propagate a
//! `RemoteCacheError` as a build failure.

pub mod circuit_breaker;
pub mod client;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, State as CircuitState};
pub use client::{HttpRemoteCache, RemoteCache, RemoteCacheError};
pub use rate_limiter::TokenBucketLimiter;
