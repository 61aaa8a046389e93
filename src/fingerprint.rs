//! Deterministic file fingerprinting for resumption lookups.

use sha2::{Digest, Sha256};

/// A stable identifier for a file, used as the store key for resumption.
///
/// Derived from the file's name, size, and (optional) MIME type only — never
/// from its local path, wall-clock time, or any random component — so the
/// same logical file produces the same fingerprint across processes and
/// machines.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint for a file with a known size.
    pub fn new(name: &str, size: u64, mime: Option<&str>) -> Self {
        Self::compute(name, SizeComponent::Known(size), mime)
    }

    /// Compute the fingerprint for a file whose size is not yet known
    /// (e.g. a streaming source materialized lazily).
    pub fn dynamic(name: &str, mime: Option<&str>) -> Self {
        Self::compute(name, SizeComponent::Dynamic, mime)
    }

    fn compute(name: &str, size: SizeComponent, mime: Option<&str>) -> Self {
        let mut input = String::new();
        input.push_str(name);
        input.push_str("::");
        match size {
            SizeComponent::Known(n) => input.push_str(&format!("size-{n}")),
            SizeComponent::Dynamic => input.push_str("size-dynamic"),
        }
        if let Some(mime) = mime {
            if !mime.is_empty() {
                input.push_str("::");
                input.push_str("mime-");
                input.push_str(mime);
            }
        }

        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        let digest = hasher.finalize();
        Self(hex_encode(&digest))
    }

    /// The fingerprint's string representation, suitable as a store key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

enum SizeComponent {
    Known(u64),
    Dynamic,
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_calls() {
        let a = Fingerprint::new("video.mp4", 1_572_864, Some("video/mp4"));
        let b = Fingerprint::new("video.mp4", 1_572_864, Some("video/mp4"));
        assert_eq!(a, b);
    }

    #[test]
    fn differs_on_name_size_or_mime() {
        let base = Fingerprint::new("a.png", 100, Some("image/png"));
        assert_ne!(base, Fingerprint::new("b.png", 100, Some("image/png")));
        assert_ne!(base, Fingerprint::new("a.png", 101, Some("image/png")));
        assert_ne!(base, Fingerprint::new("a.png", 100, Some("image/jpeg")));
        assert_ne!(base, Fingerprint::new("a.png", 100, None));
    }

    #[test]
    fn dynamic_distinct_from_known_size() {
        let known = Fingerprint::new("a.bin", 0, None);
        let dynamic = Fingerprint::dynamic("a.bin", None);
        assert_ne!(known, dynamic);
    }

    #[test]
    fn is_a_64_char_hex_string() {
        let fp = Fingerprint::new("file", 10, None);
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
