//! JSON helpers for driver handlers.
//!
//! Driver requests carry a JSON body; responses use the plugin media type and
//! report failures as `{"Err": "..."}` objects.

use http::{HeaderValue, StatusCode, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::activation::CONTENT_TYPE_V1_1;
use crate::router::{Request, Response};

/// Error payload understood by plugin hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    /// Human-readable failure description.
    #[serde(rename = "Err")]
    pub err: String,
}

/// Failure to decode a request body.
#[derive(Debug, Error)]
#[error("failed to decode request body: {source}")]
pub struct DecodeError {
    #[source]
    source: serde_json::Error,
}

impl DecodeError {
    /// Converts the failure into a `400 Bad Request` error response.
    #[must_use]
    pub fn to_response(&self) -> Response {
        respond_error(StatusCode::BAD_REQUEST, &self.to_string())
    }
}

/// Decodes the JSON body of `request`.
///
/// # Errors
///
/// Returns [`DecodeError`] when the body is empty or does not decode as `T`.
pub fn decode_request<T: DeserializeOwned>(request: &Request) -> Result<T, DecodeError> {
    serde_json::from_slice(request.body()).map_err(|source| DecodeError { source })
}

/// Encodes `value` as a plugin response. `is_error` selects status `500`
/// instead of `200`.
///
/// A value that fails to serialise produces a `500` error response.
#[must_use]
pub fn encode_response<T: Serialize>(value: &T, is_error: bool) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let status = if is_error {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::OK
            };
            json_response(status, body)
        }
        Err(error) => respond_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("failed to encode response: {error}"),
        ),
    }
}

/// Builds a `500` response carrying `{"Err": message}`.
#[must_use]
pub fn error_response(message: impl Into<String>) -> Response {
    respond_error(StatusCode::INTERNAL_SERVER_ERROR, &message.into())
}

fn respond_error(status: StatusCode, message: &str) -> Response {
    let payload = ErrorResponse {
        err: message.to_owned(),
    };
    // A struct with one string field always serialises.
    let body = serde_json::to_vec(&payload).unwrap_or_default();
    json_response(status, body)
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(CONTENT_TYPE_V1_1),
    );
    response
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq, Eq)]
    struct CreateRequest {
        #[serde(rename = "Name")]
        name: String,
    }

    fn request(body: &[u8]) -> Request {
        http::Request::builder()
            .method("POST")
            .uri("/VolumeDriver.Create")
            .body(body.to_vec())
            .expect("build request")
    }

    fn error_message(response: &Response) -> String {
        let payload: ErrorResponse =
            serde_json::from_slice(response.body()).expect("decode error payload");
        payload.err
    }

    #[test]
    fn decodes_typed_bodies() {
        let decoded: CreateRequest =
            decode_request(&request(br#"{"Name":"data"}"#)).expect("decode request");
        assert_eq!(
            decoded,
            CreateRequest {
                name: "data".into()
            }
        );
    }

    #[test]
    fn empty_bodies_fail_to_decode() {
        let error = decode_request::<serde_json::Value>(&request(b"")).expect_err("empty body");
        let response = error.to_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(error_message(&response).starts_with("failed to decode request body"));
    }

    #[test]
    fn malformed_bodies_fail_to_decode() {
        let result = decode_request::<CreateRequest>(&request(br#"{"Name": 7}"#));
        assert!(result.is_err());
    }

    #[test]
    fn encodes_success_with_plugin_media_type() {
        let response = encode_response(&json!({"Mountpoint": "/mnt/data"}), false);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static(CONTENT_TYPE_V1_1))
        );
        assert_eq!(response.body().as_slice(), br#"{"Mountpoint":"/mnt/data"}"#);
    }

    #[test]
    fn encodes_errors_with_server_error_status() {
        let response = encode_response(&json!({"Err": "busy"}), true);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn error_response_wraps_message() {
        let response = error_response("volume not found");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error_message(&response), "volume not found");
    }
}
