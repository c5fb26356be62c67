//! Encoding of states as blob content.
//!
//! A state is stored as a JSON document. Blobs travel base64-encoded;
//! GitHub wraps the base64 it returns at 60 columns.

use crate::api::Blob;
use crate::error::{GithubError, GithubResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serializes `state` to JSON and base64-encodes it.
///
/// Fails with [`GithubError::PayloadTooLarge`] when the JSON document is
/// longer than `limit` bytes.
pub fn encode_payload<St: Serialize>(state: &St, limit: usize) -> GithubResult<String> {
    let json = serde_json::to_vec(state).map_err(|e| GithubError::Encode(e.to_string()))?;
    if json.len() > limit {
        return Err(GithubError::PayloadTooLarge {
            size: json.len(),
            limit,
        });
    }
    Ok(STANDARD.encode(json))
}

/// Decodes base64 content (whitespace allowed) into a state.
pub fn decode_payload<St: DeserializeOwned>(content: &str) -> GithubResult<St> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let json = STANDARD
        .decode(compact)
        .map_err(|e| GithubError::Decode(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| GithubError::Decode(e.to_string()))
}

/// Decodes a fetched blob into a state.
pub fn decode_blob<St: DeserializeOwned>(blob: &Blob) -> GithubResult<St> {
    match blob.encoding.as_str() {
        "base64" => decode_payload(&blob.content),
        "utf-8" | "utf8" => {
            serde_json::from_str(&blob.content).map_err(|e| GithubError::Decode(e.to_string()))
        }
        other => Err(GithubError::Decode(format!("unsupported blob encoding: {other}"))),
    }
}
