//! Request tracking
//!
//! Every request gets a typed `x-request-id` (or keeps the one it arrived
//! with), the id is echoed on the response, and credentials are masked before
//! headers reach the trace spans.

use http::HeaderName;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    sensitive_headers::SetSensitiveRequestHeadersLayer,
};

use crate::ids::MakeTypedRequestId;

/// Sensitive headers that should be masked in logs
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "x-api-key",
    "x-amz-security-token",
];

/// Layer that assigns `req_`-prefixed request ids to requests without one
pub fn request_id_layer() -> SetRequestIdLayer<MakeTypedRequestId> {
    SetRequestIdLayer::x_request_id(MakeTypedRequestId)
}

/// Copy the request id onto the response
pub fn request_id_propagation_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}

/// Mark credential headers as sensitive
pub fn sensitive_headers_layer() -> SetSensitiveRequestHeadersLayer {
    SetSensitiveRequestHeadersLayer::new(
        SENSITIVE_HEADERS
            .iter()
            .copied()
            .map(HeaderName::from_static),
    )
}
