use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use serde_json::{Map, Value};
use strum_macros::EnumString;
use tracing::instrument;

use crate::error::RpcError;

/// Encoding tag for byte buffers carried as `{message, encoding?}` objects.
#[derive(Debug, Clone, Copy, Eq, PartialEq, EnumString)]
pub enum BufferEncoding {
    /// `message` is UTF-8 text; the `encoding` key is omitted on the wire.
    #[strum(disabled)]
    Utf8,
    #[strum(serialize = "base64")]
    Base64,
}

impl BufferEncoding {
    /// Maps an optional wire tag to an encoding. `None` means UTF-8 text.
    pub fn from_tag(tag: Option<&str>) -> Option<Self> {
        match tag {
            None => Some(Self::Utf8),
            Some(tag) => tag.parse().ok(),
        }
    }

    fn tag(self) -> Option<&'static str> {
        match self {
            Self::Utf8 => None,
            Self::Base64 => Some("base64"),
        }
    }
}

/// Decodes the `message`/`encoding` pair in `params` into raw bytes.
///
/// # Errors
///
/// Returns invalid-params when `message` is missing, the encoding tag is unknown, or the
/// base64 payload is malformed.
#[instrument(skip(params), level = "trace")]
pub fn decode_buffer(params: &Map<String, Value>) -> Result<Vec<u8>, RpcError> {
    let Some(message) = params.get("message").and_then(Value::as_str) else {
        return Err(RpcError::invalid_params("missing message property"));
    };
    let tag = params.get("encoding").and_then(Value::as_str);

    match BufferEncoding::from_tag(tag) {
        Some(BufferEncoding::Base64) => BASE64_STANDARD
            .decode(message)
            .map_err(|_error| RpcError::invalid_params("failed to decode Base64 message")),
        Some(BufferEncoding::Utf8) => Ok(message.as_bytes().to_vec()),
        None => Err(RpcError::invalid_params(format!(
            "unsupported encoding: {}",
            tag.unwrap_or_default()
        ))),
    }
}

/// Encodes `bytes` into a `{message, encoding?}` object.
///
/// Returns `None` when the bytes are not valid UTF-8 under the text encoding.
#[must_use]
pub fn encode_buffer(bytes: &[u8], encoding: BufferEncoding) -> Option<Map<String, Value>> {
    let message = match encoding {
        BufferEncoding::Base64 => BASE64_STANDARD.encode(bytes),
        BufferEncoding::Utf8 => std::str::from_utf8(bytes).ok()?.to_string(),
    };

    let mut object = Map::new();
    object.insert("message".to_string(), Value::String(message));
    if let Some(tag) = encoding.tag() {
        object.insert("encoding".to_string(), Value::String(tag.to_string()));
    }
    Some(object)
}
