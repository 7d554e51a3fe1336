//! Control-plane API: backend registration and liveness/readiness
//!
//! Served on the same listener as proxied traffic. A request is a
//! control-plane request only when both method and path match exactly.

use crate::endpoint::Endpoint;
use crate::error::{
    empty_response, json_error_response, text_response, EndpointError, ProxyErrorCode,
    ProxyResponse,
};
use crate::routes::RouteTable;
use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::{Method, Request, StatusCode};
use serde::de::Error as _;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info};

/// Version information for the proxy
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

pub const ADD_PATH: &str = "/addz";
pub const REMOVE_PATH: &str = "/removez";
pub const LIVE_PATH: &str = "/livez";
pub const READY_PATH: &str = "/readyz";

/// Upper bound on an /addz body
const MAX_BODY_BYTES: usize = 64 * 1024;

const MSG_BODY_INVALID: &str = "Request body could not be parsed properly.";
const MSG_ADDRESS_INVALID: &str = "Address could not be parsed properly.";
const MSG_SCHEME_UNSUPPORTED: &str = "Address scheme must be http or https.";
const MSG_PARAMS_MISSING: &str = "path and address query parameters are required.";
const MSG_PATH_NOT_FOUND: &str = "Path not found.";

/// Body of `POST /addz`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddBackendRequest {
    pub path: String,
    pub address: String,
}

impl AddBackendRequest {
    /// Decode a JSON body; anything but a single object is rejected
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        match serde_json::from_slice::<Value>(body)? {
            value @ Value::Object(_) => serde_json::from_value(value),
            _ => Err(serde_json::Error::custom("request body must be a JSON object")),
        }
    }
}

/// Query of `DELETE /removez`
#[derive(Debug, PartialEq, Eq)]
pub struct RemoveBackendQuery {
    pub path: String,
    pub address: String,
}

impl RemoveBackendQuery {
    /// Decode `path` and `address` from a form-encoded query; both must be non-empty
    pub fn from_query(query: Option<&str>) -> Option<Self> {
        let mut path = None;
        let mut address = None;
        for (name, value) in url::form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
            match name.as_ref() {
                "path" => path = Some(value.into_owned()),
                "address" => address = Some(value.into_owned()),
                _ => {}
            }
        }
        match (path, address) {
            (Some(path), Some(address)) if !path.is_empty() && !address.is_empty() => {
                Some(Self { path, address })
            }
            _ => None,
        }
    }
}

/// True if the request targets a control-plane endpoint
pub fn is_control_request(method: &Method, path: &str) -> bool {
    matches!(
        (method, path),
        (&Method::POST, ADD_PATH)
            | (&Method::DELETE, REMOVE_PATH)
            | (&Method::GET, LIVE_PATH)
            | (&Method::GET, READY_PATH)
    )
}

/// Dispatch a control-plane request. Callers check [`is_control_request`] first.
pub async fn handle_control_request(req: Request<Incoming>, routes: &RouteTable) -> ProxyResponse {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!(%method, %path, "Control-plane request");

    match (&method, path.as_str()) {
        (&Method::POST, ADD_PATH) => add_backend(req, routes).await,
        (&Method::DELETE, REMOVE_PATH) => remove_backend(&req, routes),
        (&Method::GET, LIVE_PATH) => text_response(StatusCode::OK, "ok"),
        (&Method::GET, READY_PATH) => readyz(routes),
        _ => json_error_response(ProxyErrorCode::RouteUnknown, MSG_PATH_NOT_FOUND),
    }
}

async fn add_backend(req: Request<Incoming>, routes: &RouteTable) -> ProxyResponse {
    info!("addz request received");

    let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!(error = %e, "Failed to read request body");
            return json_error_response(ProxyErrorCode::BadRequest, MSG_BODY_INVALID);
        }
    };

    let request = match AddBackendRequest::from_json(&body) {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to decode request body");
            return json_error_response(ProxyErrorCode::BadRequest, MSG_BODY_INVALID);
        }
    };

    let endpoint = match Endpoint::parse(&request.address) {
        Ok(endpoint) => endpoint,
        Err(e) => return address_error(&e),
    };

    match routes.register(&request.path, endpoint) {
        Ok(_) => empty_response(StatusCode::CREATED),
        Err(e) => {
            error!(path = %request.path, error = %e, "Path not found");
            json_error_response(ProxyErrorCode::RouteUnknown, MSG_PATH_NOT_FOUND)
        }
    }
}

fn remove_backend(req: &Request<Incoming>, routes: &RouteTable) -> ProxyResponse {
    info!("removez request received");

    let Some(query) = RemoveBackendQuery::from_query(req.uri().query()) else {
        error!("Missing path or address query parameter");
        return json_error_response(ProxyErrorCode::BadRequest, MSG_PARAMS_MISSING);
    };

    let endpoint = match Endpoint::parse(&query.address) {
        Ok(endpoint) => endpoint,
        Err(e) => return address_error(&e),
    };

    match routes.unregister(&query.path, &endpoint) {
        Ok(_) => empty_response(StatusCode::OK),
        Err(e) => {
            error!(path = %query.path, error = %e, "Path not found");
            json_error_response(ProxyErrorCode::RouteUnknown, MSG_PATH_NOT_FOUND)
        }
    }
}

fn address_error(e: &EndpointError) -> ProxyResponse {
    error!(error = %e, "Failed to parse address");
    let message = match e {
        EndpointError::SchemeUnsupported { .. } => MSG_SCHEME_UNSUPPORTED,
        EndpointError::AddressInvalid { .. } => MSG_ADDRESS_INVALID,
    };
    json_error_response(ProxyErrorCode::BadRequest, message)
}

fn readyz(routes: &RouteTable) -> ProxyResponse {
    if routes.is_ready() {
        text_response(StatusCode::OK, "ok")
    } else {
        debug!(routes = routes.len(), "Not ready: a route has no admitted endpoints");
        text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}
