//! Content-addressed keys shared by the memory and disk tiers.

use sha2::{Digest, Sha256};

/// Digest bytes kept per key (128 bits).
const KEY_BYTES: usize = 16;

/// Fixed-length, filesystem-safe identifier derived from an image URL.
///
/// Keys are the lowercase hex rendering of the first 128 bits of the URL's
/// SHA-256 digest. They partition the caches; they are not a security boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for a URL.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        let digest = Sha256::digest(url.as_bytes());
        Self(hex::encode(&digest[..KEY_BYTES]))
    }

    /// Parses a key previously rendered with [`CacheKey::as_str`].
    ///
    /// Returns `None` for anything that is not exactly 32 lowercase hex digits.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == KEY_BYTES * 2
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(raw.to_string()))
    }

    /// Returns the hex form of the key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_url() {
        let key = CacheKey::from_url("https://example.com/photos/1.png");
        assert_eq!(key.as_str().len(), 32);
        assert!(
            key.as_str()
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        );
    }

    #[test]
    fn test_key_consistency() {
        let url = "https://example.com/image.png";
        assert_eq!(CacheKey::from_url(url), CacheKey::from_url(url));
        assert_ne!(
            CacheKey::from_url(url),
            CacheKey::from_url("https://example.com/image.jpg")
        );
    }

    #[test]
    fn test_known_digest_prefix() {
        // sha256("") = e3b0c44298fc1c149afbf4c8996fb924...
        assert_eq!(
            CacheKey::from_url("").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb924"
        );
    }

    #[test]
    fn test_parse() {
        let key = CacheKey::from_url("https://example.com/a.webp");
        assert_eq!(CacheKey::parse(key.as_str()), Some(key));
        assert_eq!(CacheKey::parse("../etc/passwd"), None);
        assert_eq!(CacheKey::parse("E3B0C44298FC1C149AFBF4C8996FB924"), None);
        assert_eq!(CacheKey::parse("e3b0"), None);
    }
}
