//! Error kinds and the HTTP error responses the proxy synthesizes

use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use thiserror::Error;

/// Response type produced by every handler in the proxy
pub type ProxyResponse = Response<BoxBody<Bytes, hyper::Error>>;

/// Failure to pick an endpoint for a route
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalanceError {
    #[error("no healthy hosts available")]
    NoHealthyHosts,
    #[error("algorithm not supported: {0}")]
    AlgorithmNotSupported(String),
}

/// Failure to resolve or parse a route key
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("invalid route '{0}': expected '<METHOD> /<path>'")]
    InvalidRouteKey(String),
    #[error("route not found: {0}")]
    RouteUnknown(String),
}

/// Failure to turn an address string into an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("invalid address '{address}': {reason}")]
    AddressInvalid { address: String, reason: String },
    #[error("unsupported scheme '{scheme}' in address '{address}'")]
    SchemeUnsupported { address: String, scheme: String },
}

/// Error codes for proxy-generated responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyErrorCode {
    /// No route table entry matches the request
    RouteUnknown,
    /// Control-plane input could not be parsed
    BadRequest,
    /// The route has no admitted endpoints
    NoHealthyHosts,
    /// The chosen upstream could not be reached or failed mid-request
    UpstreamFailure,
    /// A handler panicked or hit an unexpected state
    InternalError,
}

impl ProxyErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyErrorCode::RouteUnknown => StatusCode::NOT_FOUND,
            ProxyErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ProxyErrorCode::NoHealthyHosts => StatusCode::BAD_GATEWAY,
            ProxyErrorCode::UpstreamFailure => StatusCode::BAD_GATEWAY,
            ProxyErrorCode::InternalError => StatusCode::BAD_GATEWAY,
        }
    }

    /// Get the error code as a string for the X-Proxy-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            ProxyErrorCode::RouteUnknown => "ROUTE_UNKNOWN",
            ProxyErrorCode::BadRequest => "BAD_REQUEST",
            ProxyErrorCode::NoHealthyHosts => "NO_HEALTHY_HOSTS",
            ProxyErrorCode::UpstreamFailure => "UPSTREAM_FAILURE",
            ProxyErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// JSON error envelope: `{"error":"<Reason>","message":"<Human message>"}`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Canonical reason phrase of the status code
    pub error: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: ProxyErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: code
                .status_code()
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"{}","message":"{}"}}"#,
                self.error,
                self.message.replace('\"', "\\\"")
            )
        })
    }
}

/// Create a JSON error response with X-Proxy-Error header
pub fn json_error_response(code: ProxyErrorCode, message: impl Into<String>) -> ProxyResponse {
    let body = ErrorResponse::new(code, message).to_json();

    Response::builder()
        .status(code.status_code())
        .header("Content-Type", "application/json")
        .header("X-Proxy-Error", code.as_header_value())
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}

/// Create a plain-text error response with X-Proxy-Error header
pub fn text_error_response(code: ProxyErrorCode, message: impl Into<String>) -> ProxyResponse {
    Response::builder()
        .status(code.status_code())
        .header("Content-Type", "text/plain; charset=utf-8")
        .header("X-Proxy-Error", code.as_header_value())
        .body(
            Full::new(Bytes::from(message.into()))
                .map_err(|e| match e {})
                .boxed(),
        )
        .expect("valid response with StatusCode enum and static headers")
}

/// Plain-text response for control-plane acknowledgements
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> ProxyResponse {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(Full::new(body.into()).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static header")
}

pub fn empty_response(status: StatusCode) -> ProxyResponse {
    Response::builder()
        .status(status)
        .body(Empty::<Bytes>::new().map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum")
}
