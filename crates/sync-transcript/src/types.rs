use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Highest sync wire-protocol version this device can fully interpret.
///
/// Transcripts carrying a higher `required_protocol_version` are recorded as
/// a visible "unknown protocol version" marker instead of being silently
/// dropped.
pub const CURRENT_PROTOCOL_VERSION: u32 = 7;

/// Upper bound for timestamps the interaction store can represent. The store
/// keeps timestamps in a signed 64-bit column, so anything above `i64::MAX`
/// is rejected before reconciliation starts.
pub const MAX_STORE_TIMESTAMP: u64 = i64::MAX as u64;

/// Stable identifier for a message recipient (service id of an account).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The local account, used to tell "authored locally" records apart from
/// records that only exist as remote copies.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub address: Address,
}

/// Serialized disappearing-message configuration for a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisappearingToken {
    pub enabled: bool,
    pub duration_seconds: u32,
    pub version: u32,
}

impl DisappearingToken {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            duration_seconds: 0,
            version: 1,
        }
    }

    pub fn enabled(duration_seconds: u32) -> Self {
        Self {
            enabled: true,
            duration_seconds,
            version: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Viewed,
    Failed,
    Skipped,
}

/// Per-recipient delivery/read/viewed state as seen by the sending device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientState {
    pub status: DeliveryStatus,
    pub delivered_at: Option<u64>,
    pub read_at: Option<u64>,
    pub viewed_at: Option<u64>,
    pub error_code: Option<u32>,
}

impl RecipientState {
    pub fn with_status(status: DeliveryStatus) -> Self {
        Self {
            status,
            delivered_at: None,
            read_at: None,
            viewed_at: None,
            error_code: None,
        }
    }
}

/// Pointer to attachment bytes that still live on the CDN; downloading is
/// enqueued, never awaited, during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentPointer {
    pub cdn_key: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub file_name: Option<String>,
}

/// An attachment pointer that has been linked to a stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRecord {
    pub unique_id: String,
    pub pointer: AttachmentPointer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotedReply {
    pub quoted_timestamp: u64,
    pub author: Address,
    pub body: Option<String>,
    pub attachment: Option<AttachmentPointer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkPreview {
    pub url: String,
    pub title: Option<String>,
    pub image: Option<AttachmentPointer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickerInfo {
    pub pack_id: String,
    pub sticker_id: u32,
    pub data: Option<AttachmentPointer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollCreate {
    pub question: String,
    pub options: Vec<String>,
    pub allows_multiple: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftBadge {
    pub receipt_credential: Vec<u8>,
}

/// Reference to the story a message replies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryRef {
    pub story_timestamp: u64,
    pub story_author: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentNotification {
    pub receipt: Vec<u8>,
    pub note: Option<String>,
}

/// Payment amounts are carried as opaque picomob strings; the payments
/// collaborator owns their interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedPaymentInfo {
    pub amount: Option<String>,
    pub fee: Option<String>,
    pub note: Option<String>,
    pub expires_at: Option<u64>,
}

/// Content of a `TranscriptKind::Message` transcript, before anything is
/// persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessageParams {
    pub body: Option<String>,
    pub attachments: Vec<AttachmentPointer>,
    pub quote: Option<QuotedReply>,
    pub link_preview: Option<LinkPreview>,
    pub sticker: Option<StickerInfo>,
    pub poll: Option<PollCreate>,
    pub gift_badge: Option<GiftBadge>,
    pub is_view_once: bool,
    pub expiration_started_at: Option<u64>,
    pub expiration_duration_seconds: Option<u32>,
    pub story_ref: Option<StoryRef>,
}

impl SentMessageParams {
    /// Whether reconciling this transcript would produce something the
    /// conversation view can render.
    pub fn has_renderable_content(&self) -> bool {
        self.body.as_deref().is_some_and(|b| !b.trim().is_empty())
            || !self.attachments.is_empty()
            || self.quote.is_some()
            || self.link_preview.is_some()
            || self.sticker.is_some()
            || self.poll.is_some()
            || self.gift_badge.is_some()
    }
}

/// Destination conversation of a transcript. A target always resolves to
/// exactly one local thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TranscriptTarget {
    Group {
        thread_id: String,
    },
    Contact {
        thread_id: String,
        token: DisappearingToken,
    },
}

impl TranscriptTarget {
    pub fn thread_id(&self) -> &str {
        match self {
            Self::Group { thread_id } => thread_id,
            Self::Contact { thread_id, .. } => thread_id,
        }
    }

    pub fn disappearing_token(&self) -> Option<&DisappearingToken> {
        match self {
            Self::Group { .. } => None,
            Self::Contact { token, .. } => Some(token),
        }
    }
}

/// What kind of sent event a transcript describes. Exhaustive; the receiver
/// dispatches on this with a compiler-checked match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TranscriptKind {
    Message(SentMessageParams),
    RecipientUpdate,
    ExpirationTimerUpdate,
    EndSession,
    PaymentNotification {
        server_timestamp: u64,
        notification: PaymentNotification,
    },
    ArchivedPayment(ArchivedPaymentInfo),
}

/// A sync transcript: one already-sent event from another linked device,
/// consumed exactly once. The timestamp doubles as the cross-device
/// correlation key; there is no separate transcript id in the wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub timestamp: u64,
    pub target: TranscriptTarget,
    pub kind: TranscriptKind,
    pub recipient_states: HashMap<Address, RecipientState>,
    pub required_protocol_version: Option<u32>,
}
