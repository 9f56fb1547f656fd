//! Gateway-shaped webhook events that invalidate cached sync state.

use serde::Deserialize;
use serde_json::Value;

use crate::discord::ReactionEmoji;
use crate::{Error, Result};

/// A reaction added to or removed from a message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReactionEvent {
    pub channel_id: String,
    pub message_id: String,
    pub user_id: String,
    pub emoji: ReactionEmoji,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageEvent {
    pub channel_id: String,
    #[serde(rename = "id")]
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    ReactionAdded(ReactionEvent),
    ReactionRemoved(ReactionEvent),
    MessageCreated(MessageEvent),
    MessageDeleted(MessageEvent),
    /// Any other event type; acknowledged and ignored.
    Other(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    t: Option<String>,
    #[serde(default)]
    d: Value,
}

impl WebhookEvent {
    /// Parse a `{ "t": TYPE, "d": {...} }` body.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|error| Error::Validation(format!("webhook body is not an event: {error}")))?;
        let kind = envelope.t.unwrap_or_default();

        let event = match kind.as_str() {
            "MESSAGE_REACTION_ADD" => Self::ReactionAdded(payload(&kind, envelope.d)?),
            "MESSAGE_REACTION_REMOVE" => Self::ReactionRemoved(payload(&kind, envelope.d)?),
            "MESSAGE_CREATE" => Self::MessageCreated(payload(&kind, envelope.d)?),
            "MESSAGE_DELETE" => Self::MessageDeleted(payload(&kind, envelope.d)?),
            _ => Self::Other(kind),
        };
        Ok(event)
    }

    pub fn channel_id(&self) -> Option<&str> {
        match self {
            Self::ReactionAdded(event) | Self::ReactionRemoved(event) => Some(&event.channel_id),
            Self::MessageCreated(event) | Self::MessageDeleted(event) => Some(&event.channel_id),
            Self::Other(_) => None,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::ReactionAdded(_) => "MESSAGE_REACTION_ADD",
            Self::ReactionRemoved(_) => "MESSAGE_REACTION_REMOVE",
            Self::MessageCreated(_) => "MESSAGE_CREATE",
            Self::MessageDeleted(_) => "MESSAGE_DELETE",
            Self::Other(kind) => kind,
        }
    }
}

fn payload<T: for<'de> Deserialize<'de>>(kind: &str, data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|error| Error::Validation(format!("invalid {kind} payload: {error}")))
}
