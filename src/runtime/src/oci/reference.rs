//! Digest and image reference parsing.
//!
//! Images are always addressed by content digest (`repository@sha256:...`);
//! tags are never resolved.

use soci_wrapper_core::error::{Result, SociError};

/// Supported digest algorithms and the hex length of their encoded part.
const ALGORITHMS: &[(&str, usize)] = &[("sha256", 64), ("sha384", 96), ("sha512", 128)];

/// A validated content digest (e.g., "sha256:abc123...").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageDigest(String);

impl ImageDigest {
    /// Parse a digest string.
    ///
    /// Accepts `sha256`, `sha384` and `sha512` digests with lowercase hex.
    pub fn parse(digest: &str) -> Result<Self> {
        let digest = digest.trim();
        let (algorithm, encoded) = digest.split_once(':').ok_or_else(|| {
            SociError::InvalidRequest(format!(
                "Invalid digest '{}': expected algorithm:hex",
                digest
            ))
        })?;

        let expected_len = ALGORITHMS
            .iter()
            .find(|(name, _)| *name == algorithm)
            .map(|(_, len)| *len)
            .ok_or_else(|| {
                SociError::InvalidRequest(format!(
                    "Invalid digest '{}': unsupported algorithm '{}'",
                    digest, algorithm
                ))
            })?;

        let valid_hex = encoded
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if encoded.len() != expected_len || !valid_hex {
            return Err(SociError::InvalidRequest(format!(
                "Invalid digest '{}': expected {} lowercase hex characters",
                digest, expected_len
            )));
        }

        Ok(Self(digest.to_string()))
    }

    /// Algorithm part (e.g., "sha256").
    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map(|(a, _)| a).unwrap_or_default()
    }

    /// Hex-encoded part.
    pub fn encoded(&self) -> &str {
        self.0.split_once(':').map(|(_, e)| e).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Repository plus digest, the immutable identity of a source image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Repository path (e.g., "team/app")
    pub repository: String,
    /// Content digest of the manifest (or manifest list)
    pub digest: ImageDigest,
}

impl ImageReference {
    pub fn new(repository: impl Into<String>, digest: ImageDigest) -> Result<Self> {
        let repository = repository.into();
        if repository.trim().is_empty() {
            return Err(SociError::InvalidRequest(
                "Empty repository name".to_string(),
            ));
        }
        Ok(Self { repository, digest })
    }

    /// Image name as recorded by the builder: `repository@digest`.
    pub fn name(&self) -> String {
        format!("{}@{}", self.repository, self.digest)
    }

    /// Fully qualified reference on a registry host.
    pub fn on_registry(&self, registry: &str) -> String {
        format!("{}/{}@{}", registry, self.repository, self.digest)
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA256: &str =
        "sha256:abcdef1234567890abcdef1234567890abcdef1234567890abcdef1234567890";

    #[test]
    fn test_parse_sha256() {
        let d = ImageDigest::parse(SHA256).unwrap();
        assert_eq!(d.algorithm(), "sha256");
        assert_eq!(d.encoded().len(), 64);
        assert_eq!(d.to_string(), SHA256);
    }

    #[test]
    fn test_parse_sha512() {
        let digest = format!("sha512:{}", "0".repeat(128));
        let d = ImageDigest::parse(&digest).unwrap();
        assert_eq!(d.algorithm(), "sha512");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let d = ImageDigest::parse(&format!("  {}  ", SHA256)).unwrap();
        assert_eq!(d.as_str(), SHA256);
    }

    #[test]
    fn test_parse_missing_algorithm() {
        assert!(ImageDigest::parse("abcdef").is_err());
    }

    #[test]
    fn test_parse_unknown_algorithm() {
        let err = ImageDigest::parse(&format!("md5:{}", "a".repeat(32))).unwrap_err();
        assert!(err.to_string().contains("unsupported algorithm"));
    }

    #[test]
    fn test_parse_wrong_length() {
        assert!(ImageDigest::parse("sha256:abc123").is_err());
    }

    #[test]
    fn test_parse_uppercase_hex_rejected() {
        let digest = format!("sha256:{}", "A".repeat(64));
        assert!(ImageDigest::parse(&digest).is_err());
    }

    #[test]
    fn test_parse_tag_rejected() {
        assert!(ImageDigest::parse("latest").is_err());
    }

    #[test]
    fn test_reference_name() {
        let r = ImageReference::new("team/app", ImageDigest::parse(SHA256).unwrap()).unwrap();
        assert_eq!(r.name(), format!("team/app@{}", SHA256));
        assert_eq!(
            r.on_registry("123456789012.dkr.ecr.us-west-2.amazonaws.com"),
            format!(
                "123456789012.dkr.ecr.us-west-2.amazonaws.com/team/app@{}",
                SHA256
            )
        );
    }

    #[test]
    fn test_reference_empty_repository() {
        let r = ImageReference::new("  ", ImageDigest::parse(SHA256).unwrap());
        assert!(r.is_err());
    }
}
