//! Body encoding, decoding and link listings

use std::fmt::Write;

use bytes::Bytes;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{ResourceError, Result};
use crate::format::ContentFormat;

/// Interface tag carried by property links
pub const PROPERTY_INTERFACE: &str = "prop";

/// Encode a value in a body format
///
/// Plain text is the JSON rendering of the value.
pub fn encode_value(value: &Value, format: ContentFormat) -> Result<Bytes> {
    match format {
        ContentFormat::TextPlain | ContentFormat::Json => {
            let text = serde_json::to_vec(value).map_err(|e| ResourceError::Encode(e.to_string()))?;
            Ok(Bytes::from(text))
        }
        ContentFormat::Cbor => {
            let bytes =
                serde_ipld_dagcbor::to_vec(value).map_err(|e| ResourceError::Encode(e.to_string()))?;
            Ok(Bytes::from(bytes))
        }
        ContentFormat::LinkFormat => Err(ResourceError::Encode(
            "link format is only produced for sections".to_string(),
        )),
    }
}

/// Decode a request body
///
/// Plain text bodies are parsed as JSON.
pub fn decode_value(payload: &[u8], format: ContentFormat) -> Result<Value> {
    match format {
        ContentFormat::TextPlain | ContentFormat::Json => {
            serde_json::from_slice(payload).map_err(|e| ResourceError::Decode(e.to_string()))
        }
        ContentFormat::Cbor => {
            serde_ipld_dagcbor::from_slice(payload).map_err(|e| ResourceError::Decode(e.to_string()))
        }
        ContentFormat::LinkFormat => Err(ResourceError::UnsupportedFormat(format.mime().to_string())),
    }
}

/// Content fingerprint of an encoded body
pub fn etag(payload: &[u8]) -> [u8; 8] {
    let digest = Sha256::digest(payload);
    let mut tag = [0u8; 8];
    tag.copy_from_slice(&digest[..8]);
    tag
}

/// Render a nested section as an RFC 6690 link listing
///
/// Every property of every trait becomes one link annotated with the
/// encodings a property can be read in. Values whose text form is shorter
/// than `inline_limit` are carried in a `v` attribute. Top-level scalars
/// become bare links.
pub fn link_format(nested: &Map<String, Value>, prefix: &str, inline_limit: usize) -> String {
    let content_formats = ContentFormat::VALUE_FORMATS
        .iter()
        .map(|format| format.id().to_string())
        .collect::<Vec<_>>()
        .join(" ");

    let mut links = Vec::new();
    for (trait_id, entry) in nested {
        match entry {
            Value::Object(props) => {
                for (prop_id, value) in props {
                    let mut link = format!("<{prefix}{trait_id}/{prop_id}>");
                    let text = value_text(value);
                    if text.chars().count() < inline_limit {
                        let _ = write!(link, ";v={}", attribute_value(&text));
                    }
                    let _ = write!(link, ";if={PROPERTY_INTERFACE};ct=\"{content_formats}\"");
                    links.push(link);
                }
            }
            _ => links.push(format!("<{prefix}{trait_id}>")),
        }
    }

    links.join(",")
}

/// Strings render without quotes; everything else as JSON
fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Quote an attribute value unless it is a bare token
fn attribute_value(text: &str) -> String {
    let bare = !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "!#$%&'()*+-.:<=>?@[]^_`{|}~".contains(c));
    if bare {
        text.to_string()
    } else {
        let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    }
}
