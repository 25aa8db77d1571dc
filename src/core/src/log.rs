//! Log output format and the per-invocation logging context.

use uuid::Uuid;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines (default).
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "unknown log format: '{}' (supported: text, json)",
                other
            )),
        }
    }
}

/// Request-scoped values attached to every pipeline log event.
///
/// Passed explicitly through the stages; fields are filled in as they become
/// known (the registry URL up front, the index digest after selection).
#[derive(Debug, Clone)]
pub struct LogContext {
    pub invocation_id: Uuid,
    pub repository: String,
    pub digest: String,
    pub registry_url: Option<String>,
    pub index_digest: Option<String>,
}

impl LogContext {
    pub fn new(repository: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            invocation_id: Uuid::new_v4(),
            repository: repository.into(),
            digest: digest.into(),
            registry_url: None,
            index_digest: None,
        }
    }

    pub fn with_registry_url(mut self, registry_url: impl Into<String>) -> Self {
        self.registry_url = Some(registry_url.into());
        self
    }

    pub fn set_index_digest(&mut self, index_digest: impl Into<String>) {
        self.index_digest = Some(index_digest.into());
    }

    pub fn info(&self, message: &str) {
        tracing::info!(
            invocation_id = %self.invocation_id,
            repository = %self.repository,
            digest = %self.digest,
            registry_url = self.registry_url.as_deref().unwrap_or(""),
            index_digest = self.index_digest.as_deref().unwrap_or(""),
            "{}",
            message
        );
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(
            invocation_id = %self.invocation_id,
            repository = %self.repository,
            digest = %self.digest,
            registry_url = self.registry_url.as_deref().unwrap_or(""),
            index_digest = self.index_digest.as_deref().unwrap_or(""),
            "{}",
            message
        );
    }

    pub fn error(&self, message: &str, error: &dyn std::error::Error) {
        tracing::error!(
            invocation_id = %self.invocation_id,
            repository = %self.repository,
            digest = %self.digest,
            registry_url = self.registry_url.as_deref().unwrap_or(""),
            index_digest = self.index_digest.as_deref().unwrap_or(""),
            error = %error,
            "{}",
            message
        );
    }
}
