//! Hub protocol message model.
//!
//! DESIGN
//! ======
//! Every post-handshake message is an [`Envelope`]: a JSON object whose
//! integer `type` field selects one of a closed set of kinds. Kind-specific
//! fields are optional on the struct and omitted from the wire when absent,
//! so one serde type covers the whole set. Handshake-phase messages have no
//! `type` field and never share a frame with envelopes, so they get their own
//! structs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol name sent in the handshake. Only the JSON protocol is supported.
pub const PROTOCOL_NAME: &str = "json";

/// Handshake protocol version. Always 1.
pub const PROTOCOL_VERSION: i32 = 1;

// =============================================================================
// MESSAGE KIND
// =============================================================================

/// Message kind selected by the wire `type` discriminant.
///
/// Unrecognized discriminants map to [`MessageKind::Unknown`] rather than an
/// error: an unknown-but-well-formed message is non-fatal and is handed to
/// the caller for logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// Request to invoke a named method with arguments on the peer.
    Invocation,
    /// One item of streamed response data from a prior stream invocation.
    StreamItem,
    /// Terminal result (or error) of a prior invocation.
    Completion,
    /// Request to invoke a streaming method on the peer.
    StreamInvocation,
    /// Client-sent cancellation of a streaming invocation.
    CancelInvocation,
    /// Liveness probe, sent by either party.
    Ping,
    /// Server-initiated connection close, optionally carrying an error.
    Close,
    /// Handshake-phase only: protocol/version proposal.
    HandshakeRequest,
    /// Handshake-phase only: acknowledgement of the proposal.
    HandshakeResponse,
    /// Any discriminant outside 1..=9.
    Unknown(i64),
}

impl MessageKind {
    /// Map a wire discriminant to a kind. Total: out-of-range values become
    /// [`MessageKind::Unknown`].
    #[must_use]
    pub fn from_wire(value: i64) -> Self {
        match value {
            1 => Self::Invocation,
            2 => Self::StreamItem,
            3 => Self::Completion,
            4 => Self::StreamInvocation,
            5 => Self::CancelInvocation,
            6 => Self::Ping,
            7 => Self::Close,
            8 => Self::HandshakeRequest,
            9 => Self::HandshakeResponse,
            other => Self::Unknown(other),
        }
    }

    /// The wire discriminant for this kind.
    #[must_use]
    pub fn as_wire(self) -> i64 {
        match self {
            Self::Invocation => 1,
            Self::StreamItem => 2,
            Self::Completion => 3,
            Self::StreamInvocation => 4,
            Self::CancelInvocation => 5,
            Self::Ping => 6,
            Self::Close => 7,
            Self::HandshakeRequest => 8,
            Self::HandshakeResponse => 9,
            Self::Unknown(other) => other,
        }
    }
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// The wire-level message shape shared by all post-handshake kinds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Wire discriminant; see [`MessageKind::from_wire`].
    #[serde(rename = "type")]
    pub kind: i64,
    /// Correlates invocations with their completion. Absent on a plain
    /// invocation means fire-and-forget: no completion is expected.
    #[serde(rename = "invocationId", skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    /// Method name on invocation kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Method arguments on invocation kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<Value>>,
    /// Invocation result on completions. Absent for void methods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Error on completions and close messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stream item payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Value>,
}

impl Envelope {
    /// The typed kind for this envelope's discriminant.
    #[must_use]
    pub fn message_kind(&self) -> MessageKind {
        MessageKind::from_wire(self.kind)
    }

    /// Build an invocation that expects a completion for `invocation_id`.
    #[must_use]
    pub fn invocation(invocation_id: impl Into<String>, target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            kind: MessageKind::Invocation.as_wire(),
            invocation_id: Some(invocation_id.into()),
            target: Some(target.into()),
            arguments: Some(arguments),
            result: None,
            error: None,
            item: None,
        }
    }

    /// Build a fire-and-forget invocation (no completion expected).
    #[must_use]
    pub fn non_blocking_invocation(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            kind: MessageKind::Invocation.as_wire(),
            invocation_id: None,
            target: Some(target.into()),
            arguments: Some(arguments),
            result: None,
            error: None,
            item: None,
        }
    }

    /// Build a ping.
    #[must_use]
    pub fn ping() -> Self {
        Self {
            kind: MessageKind::Ping.as_wire(),
            invocation_id: None,
            target: None,
            arguments: None,
            result: None,
            error: None,
            item: None,
        }
    }
}

// =============================================================================
// HANDSHAKE
// =============================================================================

/// Handshake proposal, framed and written immediately after the socket opens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: i32,
}

impl HandshakeRequest {
    /// The fixed `{protocol:"json", version:1}` proposal.
    #[must_use]
    pub fn json_v1() -> Self {
        Self {
            protocol: PROTOCOL_NAME.to_owned(),
            version: PROTOCOL_VERSION,
        }
    }
}

/// Handshake acknowledgement. `{}` on the wire means the server accepted the
/// proposal; a non-empty `error` means it did not. Success is judged strictly
/// by the absence of the `error` field, never by matching payload text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
