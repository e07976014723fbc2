//! # Weld Core
//!
//! Foundation types for the Weld bot engine.
//!
//! This crate defines what the condition/dispatch engine in `weld-engine`
//! operates on, without any engine logic of its own:
//!
//! - **Event model**: the normalized per-category [`Event`] shape adapters
//!   produce ([`EventCategory`], [`Payload`])
//! - **Value model**: the dynamic [`Value`] type field extraction yields
//! - **Session**: one event paired with its bot account ([`Session`])
//! - **Bot API**: the narrow [`BotApi`] callback surface for extractors
//! - **Message utilities**: prefix stripping and shell tokenization
//!
//! Protocol transports, bot lifecycle and configuration loading are out of
//! scope here; adapters translate their wire formats into [`Event`] and hand
//! a [`Session`] to the engine.

pub mod api;
pub mod event;
pub mod message;
pub mod session;
pub mod value;

pub use api::{ApiError, ApiResult, BotApi};
pub use event::{
    Event, EventCategory, ExternalPayload, MessagePayload, MetaPayload, NoticePayload, Payload,
    RequestPayload,
};
pub use message::{shell_split, strip_prefix};
pub use session::Session;
pub use value::{LocalizedText, Value};
