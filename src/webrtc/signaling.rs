//! Signaling wire types
//!
//! One message type travels over the channel's `"message"` event, multiplexed
//! by field presence:
//!
//! ```json
//! { "sdp": { "type": "offer", "sdp": "v=0..." }, "originId": "..." }
//! { "ice": { "candidate": "candidate:...", "sdpMid": "0", "sdpMLineIndex": 0 }, "originId": "..." }
//! ```

use serde::{Deserialize, Serialize};

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl std::fmt::Display for SdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdpType::Offer => write!(f, "offer"),
            SdpType::Answer => write!(f, "answer"),
        }
    }
}

/// Session description, JSON-compatible with the browser's `RTCSessionDescription`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate string
    pub candidate: String,
    /// SDP mid (media ID)
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    /// SDP mline index
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    /// Username fragment
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn with_mid(mut self, mid: impl Into<String>, index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_mline_index = Some(index);
        self
    }

    /// Empty candidate strings mark end-of-candidates
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

/// Signaling message exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice: Option<IceCandidate>,
    /// Session id of the sender, used to drop self-echoes
    #[serde(alias = "uuid", default)]
    pub origin_id: String,
}

/// What a [`SignalMessage`] carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind<'a> {
    SessionDescription(&'a SessionDescription),
    IceCandidate(&'a IceCandidate),
}

impl SignalMessage {
    pub fn description(description: SessionDescription, origin_id: impl Into<String>) -> Self {
        Self {
            sdp: Some(description),
            ice: None,
            origin_id: origin_id.into(),
        }
    }

    pub fn candidate(candidate: IceCandidate, origin_id: impl Into<String>) -> Self {
        Self {
            sdp: None,
            ice: Some(candidate),
            origin_id: origin_id.into(),
        }
    }

    /// Payload of the message; a description wins over a candidate
    pub fn kind(&self) -> Option<SignalKind<'_>> {
        if let Some(ref sdp) = self.sdp {
            Some(SignalKind::SessionDescription(sdp))
        } else {
            self.ice.as_ref().map(SignalKind::IceCandidate)
        }
    }

    /// Whether this message originated from `session_id`
    pub fn is_echo_of(&self, session_id: &str) -> bool {
        self.origin_id == session_id
    }
}
