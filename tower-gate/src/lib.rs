//! # Tower Gate
//!
//! `tower-gate` puts a per-client [`gate_limit::Strategy`] in front of any
//! [Tower](https://github.com/tower-rs/tower) service.
//!
//! ## How it works
//!
//! 1. **Client resolution**: A caller supplied resolver turns each request into a client
//!    identifier (an API key, a peer address, a tenant id...).
//! 2. **Admission**: The strategy decides for that client. Admitted requests reach the inner
//!    service unchanged.
//! 3. **Rejection**: Denied requests never reach the inner service and fail with
//!    [`GateError::RateLimited`], carrying the strategy's retry hint.
//!
//! Unlike a queueing limiter, the service never waits for capacity. Rejections are
//! immediate so the caller can shed the request.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`GateError`], converting a rejection into
//!   `429 Too Many Requests` with a `Retry-After` header when a finite wait is known.

mod error;
mod layer;
mod service;


pub use error::GateError;
pub use error::retry_after_header_secs;
pub use layer::RateLimitLayer;
pub use service::RateLimitService;
pub use service::ResponseFuture;
