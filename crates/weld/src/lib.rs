//! # Weld
//!
//! A multi-platform chat-bot automation framework: inbound events from one
//! or more simultaneously connected bot accounts are matched against
//! declared conditions and routed to handler functions.
//!
//! This facade crate re-exports the public API:
//!
//! - [`weld_core`]: the normalized event/value model, sessions and the
//!   bot API surface ([`Event`], [`Session`], [`BotApi`])
//! - [`weld_engine`]: the condition language and dispatch engine
//!   ([`Engine`], [`FieldRegistry`], [`StandardFields`])
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use weld::{Engine, Event, FieldRegistry, Session, StandardConfig, StandardFields};
//!
//! let registry = Arc::new(FieldRegistry::new());
//! let fields = StandardFields::install(&registry, StandardConfig::default())?;
//! let engine = Engine::new(Arc::clone(&registry));
//!
//! engine
//!     .on_message()
//!     .cond("ping")
//!     .cond(fields.prefix.eq(true))
//!     .handler(|event: Arc<Event>| async move {
//!         println!("pong for {:?}", event.user_id());
//!     })?;
//! ```

pub use weld_core::*;
pub use weld_engine::*;

/// Prelude for common imports.
pub mod prelude {
    pub use weld_core::{Event, EventCategory, Session, Value};
    pub use weld_engine::prelude::*;
}
