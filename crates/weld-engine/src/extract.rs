//! Handler parameter extraction, Axum-style.
//!
//! Handlers are plain async functions whose parameters declare the
//! side-channel context they need: the matched event, regex captures,
//! parsed command arguments, a localizer, and nothing else. The [`Handler`]
//! trait is blanket-implemented for such functions, and each parameter
//! type contributes its [`ContextNeeds`] bit; the dispatcher buckets pool
//! entries by that set and only assembles the context kinds a bucket's
//! handlers asked for.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use weld_core::Event;
//! use weld_engine::{CmdArgs, RegexMatch};
//!
//! async fn ban(event: Arc<Event>, args: CmdArgs) {
//!     // args[0] is the schema-validated user id
//! }
//!
//! async fn greet(m: RegexMatch) {
//!     println!("captured: {:?}", m.group(1));
//! }
//! ```

use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use weld_core::{Event, Value};

use crate::error::{ExtractError, ExtractResult};
use crate::eval::{EvaluationResult, RegexMatch};
use crate::locale::Localizer;

/// The set of side-channel context kinds a handler declares needing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContextNeeds(u8);

impl ContextNeeds {
    pub const NONE: Self = Self(0);
    /// The matched (possibly isolated) event.
    pub const EVENT: Self = Self(1);
    /// Regex captures from a pattern operator.
    pub const MATCH: Self = Self(1 << 1);
    /// Parsed command arguments.
    pub const ARGS: Self = Self(1 << 2);
    /// A localizer resolved for the matched language.
    pub const LOCALIZER: Self = Self(1 << 3);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Context assembled by the dispatcher for one matched handler.
pub struct DispatchContext {
    /// The matched event; deep-copied when the expression used dynamic
    /// operators or the registration asked for isolation.
    pub event: Arc<Event>,
    /// The evaluation outcome, including side-channel context.
    pub result: EvaluationResult,
    /// Present only when the handler declared needing it.
    pub localizer: Option<Localizer>,
}

/// Types extractable from a [`DispatchContext`] as handler parameters.
pub trait FromDispatch: Sized + Send {
    /// The context kind this parameter requires.
    const NEEDS: ContextNeeds;

    fn from_dispatch(cx: &DispatchContext) -> ExtractResult<Self>;
}

impl FromDispatch for Arc<Event> {
    const NEEDS: ContextNeeds = ContextNeeds::EVENT;

    fn from_dispatch(cx: &DispatchContext) -> ExtractResult<Self> {
        Ok(Arc::clone(&cx.event))
    }
}

impl FromDispatch for RegexMatch {
    const NEEDS: ContextNeeds = ContextNeeds::MATCH;

    fn from_dispatch(cx: &DispatchContext) -> ExtractResult<Self> {
        cx.result.captures.clone().ok_or(ExtractError::Missing("a regex match"))
    }
}

/// Parsed command arguments published during evaluation.
#[derive(Debug, Clone, Default)]
pub struct CmdArgs(pub Vec<Value>);

impl Deref for CmdArgs {
    type Target = Vec<Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromDispatch for CmdArgs {
    const NEEDS: ContextNeeds = ContextNeeds::ARGS;

    fn from_dispatch(cx: &DispatchContext) -> ExtractResult<Self> {
        Ok(CmdArgs(cx.result.parsed_args.clone()))
    }
}

impl FromDispatch for Localizer {
    const NEEDS: ContextNeeds = ContextNeeds::LOCALIZER;

    fn from_dispatch(cx: &DispatchContext) -> ExtractResult<Self> {
        cx.localizer.clone().ok_or(ExtractError::Missing("a localizer"))
    }
}

/// The trait handlers satisfy, blanket-implemented for async functions of
/// 0 to 4 [`FromDispatch`] parameters.
#[async_trait]
pub trait Handler<T>: Clone + Send + Sync + 'static {
    /// Union of the parameters' context needs; decides the pool bucket.
    const NEEDS: ContextNeeds;

    async fn call(self, cx: Arc<DispatchContext>);
}

/// A type-erased handler stored in pools.
///
/// Internally a closure that clones the original handler per invocation.
pub type BoxedHandler = Arc<dyn Fn(Arc<DispatchContext>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Converts a handler function into a boxed handler.
pub fn into_handler<F, T>(f: F) -> BoxedHandler
where
    F: Handler<T> + Send + Sync + 'static,
    T: 'static,
{
    Arc::new(move |cx| f.clone().call(cx))
}

macro_rules! impl_handler {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case)]
        #[async_trait]
        impl<F, Fut, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = ()> + Send + 'static,
            $( $ty: FromDispatch + 'static, )*
        {
            const NEEDS: ContextNeeds = ContextNeeds::NONE$(.union($ty::NEEDS))*;

            async fn call(self, cx: Arc<DispatchContext>) {
                $(
                    let Ok($ty) = $ty::from_dispatch(&cx) else { return };
                )*

                (self)($($ty,)*).await;
            }
        }
    };
}

// Handler parameters are restricted to the four context kinds, so four
// arities suffice.
impl_handler!();
impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
