//! Evaluation session: one event plus the bot it arrived on.

use std::sync::Arc;

use crate::api::BotApi;
use crate::event::{Event, EventCategory};

/// The subject of one evaluation: an event and the API of the bot account
/// that received it. Cheap to clone; extractors borrow it.
#[derive(Clone)]
pub struct Session {
    event: Arc<Event>,
    api: Arc<dyn BotApi>,
}

impl Session {
    /// Creates a session for an inbound event.
    pub fn new(event: Arc<Event>, api: Arc<dyn BotApi>) -> Self {
        Self { event, api }
    }

    /// The event under evaluation.
    pub fn event(&self) -> &Arc<Event> {
        &self.event
    }

    /// The bot API extractors may call back into.
    pub fn api(&self) -> &Arc<dyn BotApi> {
        &self.api
    }

    /// The event's category.
    pub fn category(&self) -> EventCategory {
        self.event.category
    }

    /// Returns a session over a replacement event, keeping the same bot.
    pub fn with_event(&self, event: Arc<Event>) -> Self {
        Self {
            event,
            api: Arc::clone(&self.api),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("category", &self.event.category)
            .field("event_type", &self.event.event_type)
            .field("bot_id", &self.event.bot_id)
            .finish()
    }
}
