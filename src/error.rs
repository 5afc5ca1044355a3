use thiserror::Error;

/// Errors surfaced by provider operations.
///
/// Internal managers work with `anyhow` and attach context as they go; the
/// provider boundary folds those into this taxonomy without rewording them.
/// Callers only ever see one of these variants.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Malformed target options, or no credential after the env fallback.
    #[error("{0}")]
    Configuration(String),

    /// An operation ran before `initialize` supplied the provider config.
    #[error("{0}")]
    Precondition(String),

    /// Opaque failure from the Hetzner API. Lookup-not-found and
    /// call-failure are deliberately not distinguished.
    #[error("hetzner api: {0:#}")]
    Api(anyhow::Error),

    /// A bounded wait ran out of wall clock.
    #[error("timeout: {what} timed out after {minutes:.2} minutes")]
    Timeout { what: &'static str, minutes: f64 },

    /// Overlay session construction, dial, or transport setup failure.
    #[error("tunnel: {0:#}")]
    Transport(anyhow::Error),

    /// Failure reported by the container-engine collaborator, passed
    /// through unmodified.
    #[error(transparent)]
    Delegate(anyhow::Error),
}

impl ProviderError {
    /// Elapsed minutes carried by a [`ProviderError::Timeout`], if any.
    pub fn timeout_minutes(&self) -> Option<f64> {
        match self {
            ProviderError::Timeout { minutes, .. } => Some(*minutes),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_carries_minutes() {
        let err = ProviderError::Timeout {
            what: "dialing",
            minutes: 10.02,
        };
        assert_eq!(
            err.to_string(),
            "timeout: dialing timed out after 10.02 minutes"
        );
        assert_eq!(err.timeout_minutes(), Some(10.02));
    }

    #[test]
    fn test_api_display_includes_context_chain() {
        let inner = anyhow::anyhow!("volume quota exceeded").context("failed to create volume");
        let err = ProviderError::Api(inner);
        let rendered = err.to_string();
        assert!(rendered.starts_with("hetzner api: "));
        assert!(rendered.contains("failed to create volume"));
        assert!(rendered.contains("volume quota exceeded"));
    }

    #[test]
    fn test_delegate_display_is_transparent() {
        let err = ProviderError::Delegate(anyhow::anyhow!("image pull failed"));
        assert_eq!(err.to_string(), "image pull failed");
    }

    #[test]
    fn test_non_timeout_has_no_minutes() {
        let err = ProviderError::Configuration("auth token not set in env/target options".into());
        assert_eq!(err.timeout_minutes(), None);
    }
}
