//! Normalized event model for the Weld engine.
//!
//! Platform adapters translate their wire formats into one [`Event`] shape
//! per category. The engine never sees protocol-specific types: every event
//! exposes `event_type`, `sub_type`, `platform` and `bot_id`, plus a
//! category-specific [`Payload`]. Attributes a platform carries beyond the
//! normalized set travel in the `extra` bag as raw JSON.
//!
//! # Example
//!
//! ```rust,ignore
//! use weld_core::{Event, EventCategory, MessagePayload};
//!
//! let event = Event::message(
//!     "onebot",
//!     "12345",
//!     MessagePayload::from_raw("9876", None, "/echo hi", &["/".into()]),
//! );
//! assert_eq!(event.category, EventCategory::Message);
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::message::{shell_split, strip_prefix};

/// Classification of event categories.
///
/// The category determines which handler pools an event is dispatched to
/// and which default clauses apply to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Chat messages (private or group).
    Message,
    /// Membership and state notices (joins, leaves, recalls).
    Notice,
    /// Requests awaiting approval (friend requests, join requests).
    Request,
    /// Meta events (lifecycle, heartbeats).
    Meta,
    /// External calls injected by other subsystems.
    External,
}

impl FromStr for EventCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "message" => EventCategory::Message,
            "notice" => EventCategory::Notice,
            "request" => EventCategory::Request,
            "meta" | "meta_event" => EventCategory::Meta,
            "external" => EventCategory::External,
            _ => return Err(()),
        })
    }
}

/// A normalized inbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// High-level category, used for pool selection.
    pub category: EventCategory,
    /// Primary type within the category (e.g. `"group"`, `"group_increase"`).
    pub event_type: String,
    /// Secondary type (e.g. `"normal"`, `"invite"`). Empty when absent.
    #[serde(default)]
    pub sub_type: String,
    /// Adapter/platform name (e.g. `"onebot"`).
    pub platform: String,
    /// The bot account this event arrived on.
    pub bot_id: String,
    /// Category-specific attributes.
    pub payload: Payload,
    /// Platform attributes outside the normalized set.
    #[serde(default)]
    pub extra: Json,
}

/// Category-specific event attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Message(MessagePayload),
    Notice(NoticePayload),
    Request(RequestPayload),
    Meta(MetaPayload),
    External(ExternalPayload),
}

/// Attributes of a chat message event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Sender identifier.
    pub user_id: String,
    /// Group identifier for group messages, `None` for private chats.
    pub group_id: Option<String>,
    /// The message text exactly as received.
    pub raw_text: String,
    /// Text with the global command prefix stripped (equals `raw_text`
    /// when no prefix was present).
    pub text: String,
    /// Shell-split tokens of `text`.
    pub tokens: Vec<String>,
    /// Whether a global command prefix was present and stripped.
    pub prefix_present: bool,
    /// Whether the message addressed the bot directly.
    pub to_me: bool,
}

impl MessagePayload {
    /// Normalizes raw message text: strips the first matching global prefix
    /// and tokenizes the remainder.
    pub fn from_raw(
        user_id: impl Into<String>,
        group_id: Option<String>,
        raw_text: impl Into<String>,
        prefixes: &[String],
    ) -> Self {
        let raw_text = raw_text.into();
        let (text, prefix_present) = match strip_prefix(&raw_text, prefixes) {
            Some(stripped) => (stripped.to_string(), true),
            None => (raw_text.clone(), false),
        };
        let tokens = shell_split(&text);
        Self {
            user_id: user_id.into(),
            group_id,
            raw_text,
            text,
            tokens,
            prefix_present,
            to_me: false,
        }
    }
}

/// Attributes of a membership/state notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticePayload {
    pub user_id: String,
    pub group_id: Option<String>,
    /// The account that performed the action, when distinct from `user_id`.
    pub operator_id: Option<String>,
}

/// Attributes of an approval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    pub user_id: String,
    pub group_id: Option<String>,
    /// Free-form text attached to the request.
    #[serde(default)]
    pub comment: String,
    /// Opaque handle used to approve or reject the request.
    pub flag: String,
}

/// Attributes of a meta event (heartbeat, lifecycle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaPayload {
    #[serde(default)]
    pub status: Json,
}

/// Attributes of an external call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalPayload {
    /// The routing key the call was issued under.
    pub key: String,
    #[serde(default)]
    pub data: Json,
}

impl Event {
    /// Creates a message event.
    pub fn message(
        platform: impl Into<String>,
        bot_id: impl Into<String>,
        payload: MessagePayload,
    ) -> Self {
        let event_type = if payload.group_id.is_some() {
            "group"
        } else {
            "private"
        };
        Self {
            category: EventCategory::Message,
            event_type: event_type.into(),
            sub_type: String::new(),
            platform: platform.into(),
            bot_id: bot_id.into(),
            payload: Payload::Message(payload),
            extra: Json::Null,
        }
    }

    /// Creates a notice event.
    pub fn notice(
        platform: impl Into<String>,
        bot_id: impl Into<String>,
        event_type: impl Into<String>,
        sub_type: impl Into<String>,
        payload: NoticePayload,
    ) -> Self {
        Self {
            category: EventCategory::Notice,
            event_type: event_type.into(),
            sub_type: sub_type.into(),
            platform: platform.into(),
            bot_id: bot_id.into(),
            payload: Payload::Notice(payload),
            extra: Json::Null,
        }
    }

    /// Creates a request event.
    pub fn request(
        platform: impl Into<String>,
        bot_id: impl Into<String>,
        event_type: impl Into<String>,
        sub_type: impl Into<String>,
        payload: RequestPayload,
    ) -> Self {
        Self {
            category: EventCategory::Request,
            event_type: event_type.into(),
            sub_type: sub_type.into(),
            platform: platform.into(),
            bot_id: bot_id.into(),
            payload: Payload::Request(payload),
            extra: Json::Null,
        }
    }

    /// Creates a meta event.
    pub fn meta(
        platform: impl Into<String>,
        bot_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: MetaPayload,
    ) -> Self {
        Self {
            category: EventCategory::Meta,
            event_type: event_type.into(),
            sub_type: String::new(),
            platform: platform.into(),
            bot_id: bot_id.into(),
            payload: Payload::Meta(payload),
            extra: Json::Null,
        }
    }

    /// Creates an external-call event. `event_type` carries the routing key.
    pub fn external(
        platform: impl Into<String>,
        bot_id: impl Into<String>,
        payload: ExternalPayload,
    ) -> Self {
        Self {
            category: EventCategory::External,
            event_type: payload.key.clone(),
            sub_type: String::new(),
            platform: platform.into(),
            bot_id: bot_id.into(),
            payload: Payload::External(payload),
            extra: Json::Null,
        }
    }

    /// Returns the message payload, if this is a message event.
    pub fn as_message(&self) -> Option<&MessagePayload> {
        match &self.payload {
            Payload::Message(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the notice payload, if this is a notice event.
    pub fn as_notice(&self) -> Option<&NoticePayload> {
        match &self.payload {
            Payload::Notice(n) => Some(n),
            _ => None,
        }
    }

    /// Returns the request payload, if this is a request event.
    pub fn as_request(&self) -> Option<&RequestPayload> {
        match &self.payload {
            Payload::Request(r) => Some(r),
            _ => None,
        }
    }

    /// Returns the sender identifier common to message, notice and request
    /// events, when one exists.
    pub fn user_id(&self) -> Option<&str> {
        match &self.payload {
            Payload::Message(m) => Some(&m.user_id),
            Payload::Notice(n) => Some(&n.user_id),
            Payload::Request(r) => Some(&r.user_id),
            _ => None,
        }
    }

    /// Returns the group identifier, when one exists.
    pub fn group_id(&self) -> Option<&str> {
        match &self.payload {
            Payload::Message(m) => m.group_id.as_deref(),
            Payload::Notice(n) => n.group_id.as_deref(),
            Payload::Request(r) => r.group_id.as_deref(),
            _ => None,
        }
    }
}
