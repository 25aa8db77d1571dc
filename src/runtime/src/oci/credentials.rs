//! Registry credential resolution.
//!
//! Order: `REGISTRY_USERNAME` / `REGISTRY_PASSWORD` from the environment,
//! then an ECR authorization token for the target registry.

use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use soci_wrapper_core::error::Result;

use super::ecr;

pub const ENV_REGISTRY_USERNAME: &str = "REGISTRY_USERNAME";
pub const ENV_REGISTRY_PASSWORD: &str = "REGISTRY_PASSWORD";

/// Authentication credentials for a container registry.
#[derive(Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Basic credentials from `REGISTRY_USERNAME` / `REGISTRY_PASSWORD`, if both are set.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an injectable variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let username = lookup(ENV_REGISTRY_USERNAME).filter(|v| !v.is_empty())?;
        let password = lookup(ENV_REGISTRY_PASSWORD).filter(|v| !v.is_empty())?;
        Some(Self::basic(username, password))
    }

    /// Resolve credentials for `registry_url`, falling back to an ECR token
    /// fetched in `region` when the environment provides none.
    pub async fn resolve(registry_url: &str, region: &str) -> Result<Self> {
        if let Some(auth) = Self::from_env() {
            tracing::debug!(registry_url = %registry_url, "Using registry credentials from environment");
            return Ok(auth);
        }

        let (username, password) = ecr::fetch_authorization(registry_url, region).await?;
        tracing::debug!(registry_url = %registry_url, "Using ECR authorization token");
        Ok(Self::basic(username, password))
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    /// Convert to oci-distribution auth type.
    pub(crate) fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_both_set() {
        let auth = RegistryAuth::from_lookup(lookup(&[
            ("REGISTRY_USERNAME", "AWS"),
            ("REGISTRY_PASSWORD", "token"),
        ]))
        .unwrap();
        assert!(!auth.is_anonymous());
        assert!(matches!(auth.to_oci_auth(), OciRegistryAuth::Basic(_, _)));
    }

    #[test]
    fn test_from_lookup_partial() {
        assert!(RegistryAuth::from_lookup(lookup(&[("REGISTRY_USERNAME", "AWS")])).is_none());
        assert!(RegistryAuth::from_lookup(lookup(&[
            ("REGISTRY_USERNAME", "AWS"),
            ("REGISTRY_PASSWORD", ""),
        ]))
        .is_none());
    }

    #[test]
    fn test_anonymous_to_oci() {
        let auth = RegistryAuth::anonymous();
        assert!(auth.is_anonymous());
        assert!(matches!(auth.to_oci_auth(), OciRegistryAuth::Anonymous));
    }

    #[test]
    fn test_debug_redacts_password() {
        let auth = RegistryAuth::basic("AWS", "hunter2");
        let debug = format!("{:?}", auth);
        assert!(debug.contains("AWS"));
        assert!(!debug.contains("hunter2"));
    }
}
