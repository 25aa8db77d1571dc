//! Invocation input.

use soci_wrapper_core::error::{Result, SociError};

use crate::oci::{build_ecr_registry_url, ImageDigest, ImageReference};

/// The four arguments of one invocation, validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub repository: String,
    pub digest: ImageDigest,
    pub region: String,
    pub account: String,
}

impl InvocationRequest {
    /// Validate raw arguments. Performs no I/O.
    pub fn new(repository: &str, digest: &str, region: &str, account: &str) -> Result<Self> {
        let repository = repository.trim();
        if repository.is_empty() {
            return Err(SociError::InvalidRequest(
                "Repository name must not be empty".to_string(),
            ));
        }

        let digest = ImageDigest::parse(digest)?;

        let region = region.trim();
        if region.is_empty() {
            return Err(SociError::InvalidRequest(
                "AWS region must not be empty".to_string(),
            ));
        }

        let account = account.trim();
        if account.is_empty() || !account.chars().all(|c| c.is_ascii_digit()) {
            return Err(SociError::InvalidRequest(format!(
                "AWS account must be a numeric id, got '{}'",
                account
            )));
        }

        Ok(Self {
            repository: repository.to_string(),
            digest,
            region: region.to_string(),
            account: account.to_string(),
        })
    }

    /// Registry host derived from the account and region.
    pub fn registry_url(&self) -> String {
        build_ecr_registry_url(&self.region, &self.account)
    }

    pub fn image_reference(&self) -> ImageReference {
        ImageReference {
            repository: self.repository.clone(),
            digest: self.digest.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest() -> String {
        format!("sha256:{}", "0123456789abcdef".repeat(4))
    }

    #[test]
    fn test_valid_request() {
        let req = InvocationRequest::new("team/app", &digest(), "us-west-2", "123456789012").unwrap();
        assert_eq!(req.registry_url(), "123456789012.dkr.ecr.us-west-2.amazonaws.com");
        assert_eq!(req.image_reference().name(), format!("team/app@{}", digest()));
    }

    #[test]
    fn test_china_region() {
        let req = InvocationRequest::new("app", &digest(), "cn-north-1", "123456789012").unwrap();
        assert!(req.registry_url().ends_with(".amazonaws.com.cn"));
    }

    #[test]
    fn test_rejects_empty_repository() {
        let err = InvocationRequest::new("  ", &digest(), "us-west-2", "1").unwrap_err();
        assert!(matches!(err, SociError::InvalidRequest(_)));
    }

    #[test]
    fn test_rejects_bad_digest() {
        assert!(InvocationRequest::new("app", "latest", "us-west-2", "1").is_err());
        assert!(InvocationRequest::new("app", "sha256:ABC", "us-west-2", "1").is_err());
    }

    #[test]
    fn test_rejects_empty_region() {
        assert!(InvocationRequest::new("app", &digest(), "", "1").is_err());
    }

    #[test]
    fn test_rejects_non_numeric_account() {
        assert!(InvocationRequest::new("app", &digest(), "us-west-2", "").is_err());
        assert!(InvocationRequest::new("app", &digest(), "us-west-2", "12ab").is_err());
    }
}
