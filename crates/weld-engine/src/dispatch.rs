//! The engine: handler registration and event dispatch.
//!
//! [`Engine`] owns the field registry, the evaluator and the handler
//! pools. Pools are bucketed by `(event category, context needs)`: one
//! bucket per combination of side-channel context its handlers declared
//! needing, so dispatch assembles only what a matched handler will
//! actually consume.
//!
//! For each inbound event, every entry of the category's buckets is
//! visited newest-registration-first:
//!
//! 1. expired one-shot entries are removed lazily, without touching any
//!    extractor,
//! 2. the entry's expression is evaluated (faults are contained and count
//!    as non-matches),
//! 3. on a match, a one-shot entry is removed before its handler is
//!    scheduled (exactly-once), and
//! 4. the handler runs as a detached task, so a slow or panicking handler
//!    cannot block sibling handlers, the rest of the pool walk, or the
//!    next inbound event.
//!
//! # Example
//!
//! ```rust,ignore
//! use weld_engine::Engine;
//!
//! let engine = Engine::new(registry);
//! engine
//!     .on_message()
//!     .cond("hello")
//!     .cond(fields.prefix.eq(true))
//!     .handler(|event: Arc<Event>| async move {
//!         println!("{}", event.as_message().unwrap().text);
//!     })?;
//!
//! engine.dispatch(&session).await;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{Level, debug, span, trace};

use weld_core::{Event, EventCategory, Payload, Session, shell_split};

use crate::builder::{Cond, ConditionBuilder};
use crate::cache::EvalCache;
use crate::error::BuildError;
use crate::eval::{Clock, EvaluationResult, Evaluator, Verdict};
use crate::expr::Expr;
use crate::extract::{BoxedHandler, ContextNeeds, DispatchContext, Handler, into_handler};
use crate::locale::{LocalizerProvider, NullLocalizer};
use crate::pool::{Attach, HandlerPool, PoolEntry, Token};
use crate::registry::FieldRegistry;

/// One entry of the help index, recorded at registration time.
#[derive(Debug, Clone)]
pub struct HelpEntry {
    pub module: Option<String>,
    pub usage: String,
}

#[derive(Default)]
struct PoolTable {
    pools: HashMap<(EventCategory, ContextNeeds), HandlerPool>,
    index: HashMap<Token, (EventCategory, ContextNeeds)>,
}

/// The condition/dispatch engine.
pub struct Engine {
    registry: Arc<FieldRegistry>,
    evaluator: Evaluator,
    table: Mutex<PoolTable>,
    next_token: AtomicU64,
    help: Mutex<Vec<HelpEntry>>,
    localizer: Arc<dyn LocalizerProvider>,
}

impl Engine {
    /// Creates an engine over a populated field registry, with an
    /// in-process cache, the wall clock and no localization.
    pub fn new(registry: Arc<FieldRegistry>) -> Self {
        Self {
            registry,
            evaluator: Evaluator::new(),
            table: Mutex::new(PoolTable::default()),
            next_token: AtomicU64::new(0),
            help: Mutex::new(Vec::new()),
            localizer: Arc::new(NullLocalizer),
        }
    }

    /// Replaces the evaluation cache storage.
    pub fn with_cache(mut self, cache: Arc<dyn EvalCache>) -> Self {
        self.evaluator = std::mem::take(&mut self.evaluator).with_cache(cache);
        self
    }

    /// Replaces the time source used for expiry decisions.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.evaluator = std::mem::take(&mut self.evaluator).with_clock(clock);
        self
    }

    /// Wires a localizer provider.
    pub fn with_localizer(mut self, provider: Arc<dyn LocalizerProvider>) -> Self {
        self.localizer = provider;
        self
    }

    pub fn registry(&self) -> &Arc<FieldRegistry> {
        &self.registry
    }

    /// Current time in unix seconds, per the injected clock.
    pub fn now(&self) -> u64 {
        self.evaluator.now()
    }

    // =========================================================================
    // Registration surface
    // =========================================================================

    /// Starts a message-handler registration.
    pub fn on_message(&self) -> Registration<'_> {
        Registration::new(self, EventCategory::Message)
    }

    /// Starts a notice-handler registration.
    pub fn on_notice(&self) -> Registration<'_> {
        Registration::new(self, EventCategory::Notice)
    }

    /// Starts a request-handler registration.
    pub fn on_request(&self) -> Registration<'_> {
        Registration::new(self, EventCategory::Request)
    }

    /// Starts a meta-handler registration.
    pub fn on_meta(&self) -> Registration<'_> {
        Registration::new(self, EventCategory::Meta)
    }

    /// Starts an external-call registration for one routing key.
    pub fn on_external(&self, key: impl Into<String>) -> Registration<'_> {
        Registration::new(self, EventCategory::External).cond(Cond::Text(key.into()))
    }

    /// Compiles conditions for ad hoc evaluation outside registration.
    pub fn compile(
        &self,
        category: EventCategory,
        conds: Vec<Cond>,
    ) -> Result<Expr, BuildError> {
        ConditionBuilder::new(&self.registry, category).build(conds, None, self.now())
    }

    fn register_entry(
        &self,
        category: EventCategory,
        conds: Vec<Cond>,
        expiry: Option<u64>,
        attach: Attach,
        needs: ContextNeeds,
        handler: BoxedHandler,
    ) -> Result<Token, BuildError> {
        let expr =
            ConditionBuilder::new(&self.registry, category).build(conds, expiry, self.now())?;
        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(usage) = attach.help.clone() {
            self.help.lock().push(HelpEntry {
                module: attach.module.clone(),
                usage,
            });
        }
        let entry = PoolEntry {
            key: Arc::new(expr),
            handler,
            token,
            attach,
        };
        let mut table = self.table.lock();
        table.pools.entry((category, needs)).or_default().push(entry);
        table.index.insert(token, (category, needs));
        debug!(token, ?category, "registered handler");
        Ok(token)
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Dispatches one inbound event: evaluates every live entry of the
    /// category's buckets and schedules each matching handler as a
    /// detached task. Returns how many handlers were scheduled.
    pub async fn dispatch(&self, session: &Session) -> usize {
        let event = session.event();
        let span = span!(
            Level::DEBUG,
            "dispatch",
            category = ?event.category,
            event_type = %event.event_type,
        );

        let buckets: Vec<(ContextNeeds, Vec<PoolEntry>)> = {
            let _enter = span.enter();
            let table = self.table.lock();
            table
                .pools
                .iter()
                .filter(|((category, _), pool)| {
                    *category == event.category && !pool.is_empty()
                })
                .map(|((_, needs), pool)| (*needs, pool.snapshot_newest_first()))
                .collect()
        };

        let now = self.now();
        let mut scheduled = 0;
        for (needs, entries) in buckets {
            for entry in entries {
                if entry.key.is_expired(now) {
                    trace!(token = entry.token, "removing expired one-shot entry");
                    self.remove(entry.token);
                    continue;
                }
                let result = self
                    .evaluator
                    .evaluate(session, &entry.key, entry.attach.debug)
                    .await;
                if !result.matched {
                    continue;
                }
                // One-shot entries leave the pool the instant they fire;
                // losing the removal race means another dispatch already
                // claimed it.
                if entry.key.expires_at.is_some() && !self.remove(entry.token) {
                    continue;
                }
                self.schedule(session, needs, entry, result);
                scheduled += 1;
            }
        }
        scheduled
    }

    fn schedule(
        &self,
        session: &Session,
        needs: ContextNeeds,
        entry: PoolEntry,
        result: EvaluationResult,
    ) {
        let wants_event =
            needs.contains(ContextNeeds::EVENT) || entry.attach.pre_hook.is_some();
        let event = if wants_event {
            self.event_view(session, &entry)
        } else {
            Arc::clone(session.event())
        };
        let localizer = needs
            .contains(ContextNeeds::LOCALIZER)
            .then(|| self.localizer.localizer(session, result.resolved_lang.as_deref()));

        let cx = Arc::new(DispatchContext {
            event,
            result,
            localizer,
        });
        let pre_hook = entry.attach.pre_hook.clone();
        let handler = entry.handler;
        debug!(
            token = entry.token,
            module = entry.attach.module.as_deref().unwrap_or(""),
            "scheduling handler"
        );
        tokio::spawn(async move {
            if let Some(hook) = pre_hook {
                hook(Arc::clone(&cx.event)).await;
            }
            handler(cx).await;
        });
    }

    /// The event view a handler receives: deep-copied when the expression
    /// used dynamic operators or the registration asked for isolation, so
    /// concurrently running handlers for the same raw event cannot observe
    /// each other's mutations; raw message text restored when the
    /// registration opted out of the global prefix.
    fn event_view(&self, session: &Session, entry: &PoolEntry) -> Arc<Event> {
        let needs_copy = entry.attach.needs_isolation || entry.key.uses_dynamic_ops();
        let restore_raw = !entry.attach.uses_global_prefix
            && matches!(session.event().payload, Payload::Message(_));
        if !needs_copy && !restore_raw {
            return Arc::clone(session.event());
        }
        let mut event = (**session.event()).clone();
        if restore_raw && let Payload::Message(payload) = &mut event.payload {
            payload.text = payload.raw_text.clone();
            payload.tokens = shell_split(&payload.text);
        }
        Arc::new(event)
    }

    // =========================================================================
    // Ad hoc checks and pool management
    // =========================================================================

    /// Evaluates an expression outside any pool.
    pub async fn evaluate(&self, session: &Session, expr: &Expr) -> EvaluationResult {
        self.evaluator.evaluate(session, expr, false).await
    }

    /// Pool-aware ad hoc check of one registered entry.
    ///
    /// An expired entry is removed without invoking any extractor; a
    /// matching one-shot entry is removed, exactly as in dispatch.
    pub async fn check(&self, session: &Session, token: Token) -> Verdict {
        let entry = {
            let table = self.table.lock();
            let Some(slot) = table.index.get(&token) else {
                return Verdict::NotMatched;
            };
            match table.pools.get(slot).and_then(|pool| pool.get(token)) {
                Some(entry) => entry.clone(),
                None => return Verdict::NotMatched,
            }
        };
        if entry.key.is_expired(self.now()) {
            self.remove(token);
            return Verdict::Expired;
        }
        let result = self
            .evaluator
            .evaluate(session, &entry.key, entry.attach.debug)
            .await;
        if !result.matched {
            return Verdict::NotMatched;
        }
        if entry.key.expires_at.is_some() {
            self.remove(token);
        }
        Verdict::Matched(result)
    }

    /// Removes one entry by token. Returns whether it existed.
    pub fn remove(&self, token: Token) -> bool {
        let mut table = self.table.lock();
        let Some(slot) = table.index.remove(&token) else {
            return false;
        };
        table.pools.get_mut(&slot).and_then(|pool| pool.remove(token)).is_some()
    }

    /// Removes every entry registered under `key` (by identity), across
    /// buckets. Returns how many were removed.
    pub fn remove_by_key(&self, key: &Arc<Expr>) -> usize {
        let mut table = self.table.lock();
        let PoolTable { pools, index } = &mut *table;
        let mut removed = 0;
        for pool in pools.values_mut() {
            for entry in pool.remove_by_key(key) {
                index.remove(&entry.token);
                removed += 1;
            }
        }
        removed
    }

    /// Reload-time mass clear: drops every entry not marked pinned.
    /// Returns how many were dropped.
    pub fn clear_unpinned(&self) -> usize {
        let mut table = self.table.lock();
        let PoolTable { pools, index } = &mut *table;
        let mut cleared = 0;
        for pool in pools.values_mut() {
            cleared += pool.clear_unpinned();
        }
        index.retain(|token, slot| pools.get(slot).is_some_and(|pool| pool.contains(*token)));
        cleared
    }

    /// Number of live entries for a category, across buckets.
    pub fn pool_len(&self, category: EventCategory) -> usize {
        let table = self.table.lock();
        table
            .pools
            .iter()
            .filter(|((c, _), _)| *c == category)
            .map(|(_, pool)| pool.len())
            .sum()
    }

    /// The help index, in registration order.
    pub fn help_entries(&self) -> Vec<HelpEntry> {
        self.help.lock().clone()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.lock();
        f.debug_struct("Engine")
            .field("fields", &self.registry.len())
            .field("entries", &table.index.len())
            .field("buckets", &table.pools.len())
            .finish()
    }
}

/// Builder for one handler registration.
///
/// Terminal [`handler`](Self::handler) compiles the conditions (injecting
/// default clauses) and inserts the entry into the bucket matching the
/// handler's declared context needs.
#[must_use = "a registration does nothing until .handler(...) is called"]
pub struct Registration<'e> {
    engine: &'e Engine,
    category: EventCategory,
    conds: Vec<Cond>,
    expiry: Option<u64>,
    attach: Attach,
}

impl<'e> Registration<'e> {
    fn new(engine: &'e Engine, category: EventCategory) -> Self {
        Self {
            engine,
            category,
            conds: Vec::new(),
            expiry: None,
            attach: Attach {
                uses_global_prefix: true,
                ..Attach::default()
            },
        }
    }

    /// Adds one condition; all conditions are ANDed.
    pub fn cond(mut self, cond: impl Into<Cond>) -> Self {
        self.conds.push(cond.into());
        self
    }

    /// Adds several conditions.
    pub fn conds<I>(mut self, conds: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Cond>,
    {
        self.conds.extend(conds.into_iter().map(Into::into));
        self
    }

    /// Makes the registration one-shot: seconds below the absolute-epoch
    /// threshold are relative to now, larger values are absolute unix
    /// timestamps. The entry is removed after its first match or once the
    /// deadline passes.
    pub fn expiry(mut self, expiry: u64) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Enables per-clause evaluation tracing for this entry.
    pub fn debug(mut self, on: bool) -> Self {
        self.attach.debug = on;
        self
    }

    /// Records the registering module, for logs and the help index.
    pub fn module(mut self, name: impl Into<String>) -> Self {
        self.attach.module = Some(name.into());
        self
    }

    /// Runs `hook` in the handler's task, before the handler.
    pub fn pre_hook<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.attach.pre_hook = Some(Arc::new(move |event| Box::pin(hook(event))));
        self
    }

    /// Keeps the entry across reload-time mass clearing.
    pub fn pinned(mut self, on: bool) -> Self {
        self.attach.pinned = on;
        self
    }

    /// Forces an event deep copy for this handler.
    pub fn isolate(mut self, on: bool) -> Self {
        self.attach.needs_isolation = on;
        self
    }

    /// Delivers raw (non-prefix-stripped) message text to the handler.
    pub fn raw_text(mut self, on: bool) -> Self {
        self.attach.uses_global_prefix = !on;
        self
    }

    /// Records a usage line in the help index.
    pub fn help(mut self, usage: impl Into<String>) -> Self {
        self.attach.help = Some(usage.into());
        self
    }

    /// Registers the handler, returning its removal token.
    pub fn handler<F, T>(self, f: F) -> Result<Token, BuildError>
    where
        F: Handler<T>,
        T: 'static,
    {
        self.engine.register_entry(
            self.category,
            self.conds,
            self.expiry,
            self.attach,
            <F as Handler<T>>::NEEDS,
            into_handler(f),
        )
    }
}
