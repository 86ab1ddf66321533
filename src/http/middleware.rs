//! Admission middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{instrument, warn};

use crate::ratelimit::{AdmissionControl, AdmissionDecision, RequestIdentity, API_KEY_HEADER};

/// Response header carrying the identity key the decision was made for.
pub const IDENTITY_HEADER: &str = "identity";

/// Response header carrying the governing limiter's count.
pub const REQUEST_COUNT_HEADER: &str = "request-count";

/// Body of every 429 response.
pub const REJECTION_MESSAGE: &str =
    "You have reached the maximum number of requests or actions allowed within a certain time frame";

/// Extract what the limiters key on from a request.
///
/// The peer address comes from axum's `ConnectInfo`, when the server was
/// started with it. A non-UTF-8 `API_KEY` header counts as absent.
pub fn request_identity(request: &Request<Body>) -> RequestIdentity {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    RequestIdentity::new(remote_addr, api_key(request.headers()))
}

fn api_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Middleware that admits or rejects each request.
///
/// Rejected requests get `429 Too Many Requests` with a fixed body; store
/// failures look exactly the same from the outside. Both kinds of response
/// carry the `Identity` and `Request-Count` headers.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn enforce_admission(
    State(admission): State<Arc<dyn AdmissionControl>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let identity = request_identity(&request);
    let decision = admission.decide(&identity).await;

    let mut response = if decision.admitted {
        next.run(request).await
    } else {
        (StatusCode::TOO_MANY_REQUESTS, REJECTION_MESSAGE).into_response()
    };

    set_decision_headers(response.headers_mut(), &decision);
    response
}

fn set_decision_headers(headers: &mut HeaderMap, decision: &AdmissionDecision) {
    match HeaderValue::from_str(&decision.identity) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(IDENTITY_HEADER), value);
        }
        Err(e) => {
            warn!(error = %e, "Identity is not a valid header value, omitting it");
        }
    }
    headers.insert(
        HeaderName::from_static(REQUEST_COUNT_HEADER),
        HeaderValue::from(decision.count),
    );
}
