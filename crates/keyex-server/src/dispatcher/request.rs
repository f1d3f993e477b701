//! Parsing of the two accepted request wire shapes.
//!
//! - JSON: the request body is `{"type", "md", "key", "data"}` with `data`
//!   being the base64 encoded payload.
//! - Simplified: the operation metadata is passed in the `x-type`, `x-md` and
//!   `x-key` headers, the body is the base64 encoded payload itself.
use base64::{
    Engine as _, alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use http::{HeaderMap, header::CONTENT_TYPE};
use serde::Deserialize;
use snafu::{OptionExt, ResultExt};

use crate::dispatcher::{
    DecodeBase64Snafu, InvalidHeaderSnafu, MissingDataSnafu, ParseJsonSnafu, Result,
};

/// Standard alphabet. Padding is written on encode but optional on decode.
pub const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub const OPERATION_HEADER: &str = "x-type";
pub const DIGEST_HEADER: &str = "x-md";
pub const KEY_KIND_HEADER: &str = "x-key";

/// How the client talks to us. Errors are always rendered as JSON, successful
/// responses follow the shape of the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireShape {
    Json,
    Simplified,
}

impl WireShape {
    /// The JSON shape is used when the media type of the request is
    /// `application/json`. Parameters like `charset` are ignored.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let is_json = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .is_some_and(|media_type| media_type.trim().eq_ignore_ascii_case("application/json"));

        if is_json { Self::Json } else { Self::Simplified }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Sign,
    Decrypt,
}

impl Operation {
    /// Everything but an explicit `sign` is a decryption, including a missing
    /// operation type.
    fn from_type(operation: Option<&str>) -> Self {
        if operation == Some("sign") {
            Self::Sign
        } else {
            Self::Decrypt
        }
    }
}

/// A parsed request, before the key kind and digest names are validated.
#[derive(Debug)]
pub struct KeyExRequest {
    pub shape: WireShape,
    pub operation: Operation,
    pub digest: Option<String>,
    pub key_kind: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct JsonEnvelope {
    #[serde(rename = "type")]
    operation: Option<String>,
    md: Option<String>,
    key: Option<String>,
    data: Option<String>,
}

impl KeyExRequest {
    pub fn parse(headers: &HeaderMap, body: &[u8]) -> Result<Self> {
        match WireShape::from_headers(headers) {
            WireShape::Json => Self::from_json(body),
            WireShape::Simplified => Self::from_headers(headers, body),
        }
    }

    fn from_json(body: &[u8]) -> Result<Self> {
        let envelope: JsonEnvelope = serde_json::from_slice(body).context(ParseJsonSnafu)?;
        let data = envelope.data.context(MissingDataSnafu)?;
        let data = BASE64.decode(data.trim()).context(DecodeBase64Snafu)?;

        Ok(Self {
            shape: WireShape::Json,
            operation: Operation::from_type(envelope.operation.as_deref()),
            digest: envelope.md,
            key_kind: envelope.key,
            data,
        })
    }

    fn from_headers(headers: &HeaderMap, body: &[u8]) -> Result<Self> {
        let operation = header_value(headers, OPERATION_HEADER)?;
        let digest = header_value(headers, DIGEST_HEADER)?;
        let key_kind = header_value(headers, KEY_KIND_HEADER)?;
        let data = BASE64
            .decode(body.trim_ascii())
            .context(DecodeBase64Snafu)?;

        Ok(Self {
            shape: WireShape::Simplified,
            operation: Operation::from_type(operation.as_deref()),
            digest,
            key_kind,
            data,
        })
    }
}

fn header_value(headers: &HeaderMap, name: &'static str) -> Result<Option<String>> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(|value| value.trim().to_owned())
                .context(InvalidHeaderSnafu { name })
        })
        .transpose()
}
