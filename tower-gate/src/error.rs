use std::time::Duration;

use gate_limit::UNBOUNDED;

/// Errors produced by the Tower Gate middleware.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GateError {
    /// The client has exhausted its capacity.
    ///
    /// `retry_after` is the strategy's hint. It may be zero, or [`UNBOUNDED`] when capacity
    /// never frees. When the `axum` feature is enabled, this converts to
    /// `429 Too Many Requests`, with a `Retry-After` header only for finite, positive waits.
    #[error("Rate limit exceeded; retry after {retry_after:?}")]
    RateLimited {
        /// The duration to wait before retrying.
        retry_after: Duration,
    },

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

/// Value for a `Retry-After` header, in whole seconds.
///
/// Returns `None` when no header should be sent: the wait is zero, or the strategy reported
/// [`UNBOUNDED`]. Partial seconds round up so that a client honouring the header never
/// retries early.
pub fn retry_after_header_secs(retry_after: Duration) -> Option<u64> {
    if retry_after.is_zero() || retry_after == UNBOUNDED {
        return None;
    }
    let secs = retry_after.as_secs();
    Some(if retry_after.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    })
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for GateError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, header) = match self {
            Self::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                retry_after_header_secs(retry_after).map(|secs| {
                    (
                        axum::http::header::RETRY_AFTER,
                        axum::http::HeaderValue::from(secs),
                    )
                }),
            ),
            Self::Inner(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        let mut response = (status, self.to_string()).into_response();
        if let Some((name, value)) = header {
            response.headers_mut().insert(name, value);
        }
        response
    }
}
