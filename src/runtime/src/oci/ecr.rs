//! Amazon ECR endpoint naming and authorization tokens.

use base64::Engine;
use soci_wrapper_core::error::{Result, SociError};

/// Registry host for an account in a region.
///
/// China regions (`cn-*`) live under `amazonaws.com.cn`.
pub fn build_ecr_registry_url(region: &str, account: &str) -> String {
    let domain = if region.starts_with("cn") {
        ".amazonaws.com.cn"
    } else {
        ".amazonaws.com"
    };
    format!("{}.dkr.ecr.{}{}", account, region, domain)
}

/// Fetch an authorization token from ECR and return `(username, password)`.
///
/// Uses the default AWS credential chain with the given region.
pub async fn fetch_authorization(registry_url: &str, region: &str) -> Result<(String, String)> {
    let registry_err = |message: String| SociError::RegistryError {
        registry: registry_url.to_string(),
        message,
    };

    let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()))
        .load()
        .await;
    let client = aws_sdk_ecr::Client::new(&sdk_config);

    tracing::debug!(registry_url = %registry_url, region = %region, "Requesting ECR authorization token");

    let output = client.get_authorization_token().send().await.map_err(|e| {
        registry_err(format!(
            "Failed to get ECR authorization token: {}",
            aws_sdk_ecr::error::DisplayErrorContext(&e)
        ))
    })?;

    let token = output
        .authorization_data()
        .iter()
        .find_map(|data| data.authorization_token())
        .ok_or_else(|| registry_err("ECR returned no authorization data".to_string()))?;

    decode_authorization_token(token).map_err(|e| registry_err(e.to_string()))
}

/// Decode a base64 `user:password` token.
pub fn decode_authorization_token(token: &str) -> Result<(String, String)> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token.trim())
        .map_err(|e| SociError::SerializationError(format!("Invalid authorization token: {}", e)))?;
    let decoded = String::from_utf8(decoded).map_err(|e| {
        SociError::SerializationError(format!("Authorization token is not UTF-8: {}", e))
    })?;

    let (user, password) = decoded.split_once(':').ok_or_else(|| {
        SociError::SerializationError("Authorization token is not user:password".to_string())
    })?;
    Ok((user.to_string(), password.to_string()))
}
