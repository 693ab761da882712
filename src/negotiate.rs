//! Out-of-band session negotiation.
//!
//! DESIGN
//! ======
//! Before the persistent socket opens, the client POSTs to
//! `<base-url>/negotiate` to obtain a connection id and the server's
//! transport capability list. The exchange sits behind the [`Negotiate`]
//! trait so the connection facade can be tested against a stub.
//!
//! A non-empty `error` field in an otherwise well-formed response is returned
//! to the caller rather than raised here: checking it before connecting is
//! the caller's documented obligation, and the facade honors it.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

// =============================================================================
// TYPES
// =============================================================================

/// Per-attempt negotiation input: where to negotiate and with what credential.
#[derive(Clone, Debug)]
pub struct NegotiationRequest {
    /// Base hub URL, e.g. `https://host/hub`. The `/negotiate` suffix is
    /// appended here; the same base later derives the socket target.
    pub url: String,
    /// Optional bearer credential, forwarded as `Authorization: Bearer ...`
    /// on both the negotiate request and the socket upgrade.
    pub access_token: Option<String>,
}

/// Server reply to a negotiate request. Created once per attempt, consumed by
/// the connection establisher, never mutated.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NegotiationResponse {
    pub connection_id: String,
    pub available_transports: Vec<AvailableTransport>,
    /// Redirect target, when the server delegates to another endpoint.
    /// Parsed but not followed; redirect handling is out of scope.
    pub url: Option<String>,
    /// Credential to use against a redirect target. Parsed, not followed.
    pub access_token: Option<String>,
    /// Non-empty when the server refuses the session. Surfaced, not thrown.
    pub error: Option<String>,
}

/// One transport the server offers, with its supported transfer formats.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AvailableTransport {
    pub transport: String,
    pub transfer_formats: Vec<String>,
}

// =============================================================================
// NEGOTIATOR
// =============================================================================

/// Negotiation seam. Mockable in tests.
#[async_trait]
pub trait Negotiate: Send + Sync {
    /// Perform the negotiate exchange.
    ///
    /// # Errors
    ///
    /// [`ClientError::NegotiationTransport`] when the HTTP request itself
    /// fails; [`ClientError::NegotiationProtocol`] when the body cannot be
    /// deserialized.
    async fn negotiate(&self, request: &NegotiationRequest) -> Result<NegotiationResponse, ClientError>;
}

/// HTTP negotiator backed by reqwest.
#[derive(Debug, Default)]
pub struct HttpNegotiator {
    http: reqwest::Client,
}

impl HttpNegotiator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Negotiate for HttpNegotiator {
    async fn negotiate(&self, request: &NegotiationRequest) -> Result<NegotiationResponse, ClientError> {
        let url = format!("{}/negotiate", request.url.trim_end_matches('/'));

        let mut post = self.http.post(&url).header(CONTENT_TYPE, "application/json");
        if let Some(token) = &request.access_token {
            post = post.bearer_auth(token);
        }

        // Empty body; the server keys everything off the URL and headers.
        let response = post.send().await.map_err(ClientError::NegotiationTransport)?;

        let negotiated = response
            .json::<NegotiationResponse>()
            .await
            .map_err(ClientError::NegotiationProtocol)?;

        tracing::debug!(
            connection_id = %negotiated.connection_id,
            transports = negotiated.available_transports.len(),
            "negotiation complete"
        );
        Ok(negotiated)
    }
}

#[cfg(test)]
#[path = "negotiate_test.rs"]
mod tests;
