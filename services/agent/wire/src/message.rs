//! Request and response builders for the hub protocol.
//!
//! Requests carry only a path; the session that sends them fills in scheme
//! and authority for the hub it is connected to.

use crate::error::WireError;
use crate::records::{ServiceKey, StatusReport};
use bytes::Bytes;
use http::{header, Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Value of the HTTP/2 `:protocol` pseudo-header on tunnel requests
pub const TUNNEL_PROTOCOL: &str = "mesh-tunnel";

const CONTENT_TYPE_JSON: &str = "application/json";

/// Build a bodiless `GET`
pub fn get(path: &str) -> Result<Request<Bytes>, WireError> {
    Ok(Request::builder()
        .method(Method::GET)
        .uri(path)
        .body(Bytes::new())?)
}

/// Build a request with a JSON body
pub fn json_request<T: Serialize>(
    method: Method,
    path: &str,
    body: &T,
) -> Result<Request<Bytes>, WireError> {
    let body = serde_json::to_vec(body)?;
    Ok(Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, CONTENT_TYPE_JSON)
        .body(Bytes::from(body))?)
}

/// Build a CONNECT-style tunnel request
pub fn tunnel(path: &str) -> Result<Request<Bytes>, WireError> {
    Ok(Request::builder()
        .method(Method::CONNECT)
        .uri(path)
        .body(Bytes::new())?)
}

/// Heartbeat sent to every hub
pub fn post_status(name: &str) -> Result<Request<Bytes>, WireError> {
    json_request(
        Method::POST,
        "/api/status",
        &StatusReport {
            name: name.to_string(),
        },
    )
}

/// Full replacement of the services this agent publishes
pub fn post_services(list: &[ServiceKey]) -> Result<Request<Bytes>, WireError> {
    json_request(Method::POST, "/api/services", &list)
}

/// Decode a JSON response body, regardless of status
pub fn decode_json<T: DeserializeOwned>(res: &Response<Bytes>) -> Result<T, WireError> {
    Ok(serde_json::from_slice(res.body())?)
}

/// Response without a body
pub fn empty_response(status: StatusCode) -> Response<Bytes> {
    let mut res = Response::new(Bytes::new());
    *res.status_mut() = status;
    res
}

/// Response with a JSON body
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Bytes> {
    match serde_json::to_vec(body) {
        Ok(bytes) => {
            let mut res = Response::new(Bytes::from(bytes));
            *res.status_mut() = status;
            res.headers_mut().insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static(CONTENT_TYPE_JSON),
            );
            res
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// Failure response with a `{status, message}` JSON body
pub fn error_response(status: StatusCode, message: &str) -> Response<Bytes> {
    let body = serde_json::json!({
        "status": status.as_u16(),
        "message": message,
    });
    let mut res = Response::new(Bytes::from(body.to_string()));
    *res.status_mut() = status;
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(CONTENT_TYPE_JSON),
    );
    res
}
