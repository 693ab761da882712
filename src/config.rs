//! Client configuration.

use crate::error::ClientError;

/// Default bound on concurrent invocation callbacks.
pub const DEFAULT_MAX_INFLIGHT_INVOCATIONS: usize = 64;

/// Per-connection configuration. Construct directly, via the builders, or
/// from environment variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base hub URL, e.g. `https://host/hub`.
    pub url: String,
    /// Optional bearer credential for negotiation and the socket upgrade.
    pub access_token: Option<String>,
    /// Bound on concurrent invocation callbacks; saturation rejects.
    pub max_inflight_invocations: usize,
}

impl ClientConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            access_token: None,
            max_inflight_invocations: DEFAULT_MAX_INFLIGHT_INVOCATIONS,
        }
    }

    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_max_inflight_invocations(mut self, bound: usize) -> Self {
        self.max_inflight_invocations = bound;
        self
    }

    /// Build config from environment variables.
    ///
    /// Required:
    /// - `HUBLINK_URL`: base hub URL
    ///
    /// Optional:
    /// - `HUBLINK_ACCESS_TOKEN`: bearer credential
    /// - `HUBLINK_MAX_INFLIGHT_INVOCATIONS`: default 64
    ///
    /// # Errors
    ///
    /// [`ClientError::Config`] when `HUBLINK_URL` is unset.
    pub fn from_env() -> Result<Self, ClientError> {
        let url = std::env::var("HUBLINK_URL")
            .map_err(|_| ClientError::Config("HUBLINK_URL is required".into()))?;

        Ok(Self {
            url,
            access_token: std::env::var("HUBLINK_ACCESS_TOKEN").ok(),
            max_inflight_invocations: env_parse(
                "HUBLINK_MAX_INFLIGHT_INVOCATIONS",
                DEFAULT_MAX_INFLIGHT_INVOCATIONS,
            ),
        })
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
