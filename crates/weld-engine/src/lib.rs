//! # Weld Engine
//!
//! The condition expression language and event dispatch engine of the
//! Weld bot framework.
//!
//! For every inbound event and every registered handler, the engine
//! decides whether the handler fires, with what side-channel context
//! (regex captures, parsed command arguments, resolved language), and
//! with which cleanup semantics (one-shot expiry, reload clearing). It is
//! a small interpreted rule language, lazily and asynchronously
//! evaluated, cacheable, priority-ordered, with automatic default-clause
//! injection, embedded in an event bus.
//!
//! ## Architecture
//!
//! - **Field registry** ([`FieldRegistry`], [`Field`]): named extraction
//!   points over events, with per-field priorities, cache policies,
//!   override shortcuts, remap policies and default clauses
//! - **Expression AST** ([`Expr`], [`all`], [`any`], [`not`]): binary
//!   relational nodes and priority-ordered boolean combinators
//! - **Evaluator** ([`Evaluator`]): recursive async evaluation with a
//!   per-call side channel ([`EvaluationResult`]) and a top-level fault
//!   barrier
//! - **Condition builder** ([`ConditionBuilder`], [`Cond`]): lowers
//!   developer input into a resolved tree, injecting default clauses
//! - **Handler pool** ([`HandlerPool`]): registration-ordered,
//!   O(1)-removable entries, bucketed by declared context needs
//! - **Engine** ([`Engine`]): the dispatcher and registration surface
//!
//! ## Data flow
//!
//! ```text
//! ┌─────────┐     ┌────────────────┐     ┌───────────┐
//! │ Adapter │────▶│     Engine     │────▶│  handler  │ (detached task)
//! │ (event) │     │ pools × eval   │────▶│  handler  │
//! └─────────┘     └────────────────┘────▶│  handler  │
//!                                        └───────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use weld_core::{Event, Session};
//! use weld_engine::{CmdArgs, Engine, FieldRegistry, StandardConfig, StandardFields, TargetItem};
//! use weld_engine::schema::IntSchema;
//!
//! let registry = Arc::new(FieldRegistry::new());
//! let fields = StandardFields::install(&registry, StandardConfig::default())?;
//! let engine = Engine::new(Arc::clone(&registry));
//!
//! engine
//!     .on_message()
//!     .cond(fields.command.prefix_of(vec![
//!         TargetItem::text("ban"),
//!         TargetItem::schema(IntSchema),
//!     ]))
//!     .handler(|event: Arc<Event>, args: CmdArgs| async move {
//!         // args[0] is the validated user id
//!     })?;
//!
//! engine.dispatch(&session).await;
//! ```

pub mod builder;
pub mod cache;
pub mod dispatch;
pub mod error;
pub mod eval;
pub mod expr;
pub mod extract;
pub mod field;
pub mod fields;
pub mod locale;
mod ops;
pub mod pool;
pub mod registry;
pub mod schema;

pub use builder::{ABSOLUTE_EPOCH_THRESHOLD, Cond, ConditionBuilder};
pub use cache::{CacheKey, CachedVerdict, EvalCache, MemoryCache, NoCache};
pub use dispatch::{Engine, HelpEntry, Registration};
pub use error::{
    BuildError, EvalError, ExtractError, ExtractResult, RegistryError, SchemaError,
};
pub use eval::{Clock, EvaluationResult, Evaluator, RegexMatch, Verdict, system_clock};
pub use expr::{
    BinaryExpr, Expr, ExprKind, Operand, Operator, Pattern, TargetItem, ValueFn, all, always,
    any, not,
};
pub use extract::{
    BoxedHandler, CmdArgs, ContextNeeds, DispatchContext, FromDispatch, Handler, into_handler,
};
pub use field::{CachePolicy, Field, FieldClause, FieldExtractor, OperandRemap};
pub use fields::{
    AdminProbe, ApiAdminProbe, Gate, OpenGate, PerUserCache, StandardConfig, StandardFields,
};
pub use locale::{LocaleTable, Localizer, LocalizerProvider, MapLocalizer, NullLocalizer};
pub use pool::{Attach, HandlerPool, PoolEntry, PreHook, Token};
pub use registry::FieldRegistry;
pub use schema::{ArgSchema, BoolSchema, IntSchema, Typed, schema};

/// Prelude for common imports.
pub mod prelude {
    pub use super::builder::Cond;
    pub use super::dispatch::Engine;
    pub use super::eval::{EvaluationResult, RegexMatch, Verdict};
    pub use super::expr::{Expr, TargetItem, all, always, any, not};
    pub use super::extract::CmdArgs;
    pub use super::field::Field;
    pub use super::fields::{StandardConfig, StandardFields};
    pub use super::registry::FieldRegistry;
    pub use super::schema::{ArgSchema, BoolSchema, IntSchema};
}
