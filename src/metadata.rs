//! Codec for the tus `Upload-Metadata` header.
//!
//! Grammar: a comma-separated list of `key SP base64(value)` pairs. Keys are
//! restricted to ASCII letters, digits, `-`, and `_`. A key with an empty
//! value is encoded bare, with no trailing space or base64 payload.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Encode a metadata map into an `Upload-Metadata` header value.
///
/// Iteration order follows the map's own ordering; callers that need a
/// deterministic header (e.g. for tests) should pass a `BTreeMap`.
pub fn encode<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .map(|(key, value)| {
            if value.is_empty() {
                key.to_string()
            } else {
                format!("{key} {}", STANDARD.encode(value.as_bytes()))
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Decode an `Upload-Metadata` header value back into a key/value map.
///
/// Tolerates a missing value (bare key) as an empty string. Malformed
/// base64 for a given pair is skipped rather than failing the whole decode,
/// since metadata is informational and a single bad entry should not make
/// an otherwise-valid header unreadable.
pub fn decode(header: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for pair in header.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        match pair.split_once(' ') {
            Some((key, encoded)) => {
                if let Ok(bytes) = STANDARD.decode(encoded.trim()) {
                    if let Ok(value) = String::from_utf8(bytes) {
                        map.insert(key.to_string(), value);
                    }
                }
            }
            None => {
                map.insert(pair.to_string(), String::new());
            }
        }
    }
    map
}
