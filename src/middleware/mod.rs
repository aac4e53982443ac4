//! HTTP middleware for correlation, rate limiting, and observability.
//!
//! # Architecture
//!
//! ```text
//! Request → Request ID → Access Log → Security Headers → Rate Limiter → Forwarder
//!               ↓             ↓                               ↓
//!        X-Request-Id   received/completed           429 Too Many Requests
//! ```
//!
//! The rate limiter is a route layer on the `/api` routes only; everything
//! else is applied to the whole router.

pub mod access_log;
pub mod ip;
pub mod rate_limit;
pub mod request_id;
pub mod security_headers;

pub use access_log::{AccessLogger, RequestTracking, track_requests};
pub use ip::{TrustedProxyConfig, UNKNOWN_IP, extract_client_ip, forwarded_proto};
pub use rate_limit::{FixedWindowLimiter, RateLimitDecision, RateLimitError, RateLimitLayer};
pub use request_id::{REQUEST_ID_HEADER, RequestContext, RequestContextExt, RequestIdLayer};
pub use security_headers::apply_security_headers;
