//! Rendering of operation results and errors.
use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::{StatusCode, header::CONTENT_TYPE};
use serde::Serialize;

use crate::{constants::TEXT_CONTENT_TYPE, dispatcher::request::WireShape};

/// The JSON body of every response except successful simplified ones.
///
/// Serializes to either `{"response": "<base64>"}` or `{"error": "<message>"}`.
#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseEnvelope {
    Response(String),
    Error(String),
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResponseBody {
    Json(ResponseEnvelope),

    /// The base64 encoded result, sent as is.
    Raw(String),
}

/// A fully rendered response, ready to be written by any listener.
#[derive(Debug, PartialEq, Eq)]
pub struct KeyExResponse {
    pub status: StatusCode,
    pub body: ResponseBody,
}

impl KeyExResponse {
    pub fn success(shape: WireShape, encoded: String) -> Self {
        let body = match shape {
            WireShape::Json => ResponseBody::Json(ResponseEnvelope::Response(encoded)),
            WireShape::Simplified => ResponseBody::Raw(encoded),
        };

        Self {
            status: StatusCode::OK,
            body,
        }
    }

    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ResponseBody::Json(ResponseEnvelope::Error(message.into())),
        }
    }
}

impl IntoResponse for KeyExResponse {
    fn into_response(self) -> Response {
        match self.body {
            ResponseBody::Json(envelope) => (self.status, Json(envelope)).into_response(),
            ResponseBody::Raw(text) => {
                (self.status, [(CONTENT_TYPE, TEXT_CONTENT_TYPE)], text).into_response()
            }
        }
    }
}
