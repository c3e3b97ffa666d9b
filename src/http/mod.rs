//! Shared HTTP adapter infrastructure (C3): rate limiting, circuit
//! breaking, conditional GET caching, the retrying request core, response
//! envelopes, and the fetch-log audit trail.

pub mod cache;
pub mod circuit_breaker;
pub mod client;
pub mod fetch_log;
pub mod rate_limiter;
pub mod response;
