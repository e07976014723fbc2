//! Expression evaluation against one session.
//!
//! Evaluation is asynchronous (field extractors may await bot API calls)
//! but cooperative: one expression tree is walked sequentially, and the
//! side channel it accumulates is scoped to that single call, so nothing is
//! shared between concurrently evaluating events.
//!
//! The top-level [`Evaluator::evaluate`] is a fault barrier: any
//! [`EvalError`] raised below it is logged and reported as a non-match, so
//! a faulty extractor can never take down sibling handlers or the
//! dispatch loop.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use tracing::{debug, trace, warn};

use weld_core::{Session, Value};

use crate::cache::{CacheKey, CachedVerdict, EvalCache, MemoryCache};
use crate::error::EvalError;
use crate::expr::{BinaryExpr, Expr, ExprKind, Operand};
use crate::ops::{self, Rhs};

/// A successful regex application: the full match and its capture groups.
#[derive(Debug, Clone, PartialEq)]
pub struct RegexMatch {
    /// Text of the whole match.
    pub full: String,
    /// Capture groups 1.., `None` for groups that did not participate.
    pub groups: Vec<Option<String>>,
}

impl RegexMatch {
    pub(crate) fn from_captures(caps: &regex::Captures<'_>) -> Self {
        Self {
            full: caps.get(0).map_or_else(String::new, |m| m.as_str().to_string()),
            groups: (1..caps.len())
                .map(|i| caps.get(i).map(|m| m.as_str().to_string()))
                .collect(),
        }
    }

    /// Group by index; 0 is the full match.
    pub fn group(&self, index: usize) -> Option<&str> {
        if index == 0 {
            Some(&self.full)
        } else {
            self.groups.get(index - 1)?.as_deref()
        }
    }
}

/// Side-channel context accumulated during one evaluation call.
///
/// Scoped strictly to the call: created fresh by [`Evaluator::evaluate`],
/// handed to the handler-invocation step, never stored globally.
#[derive(Debug, Clone, Default)]
pub struct SideState {
    pub captures: Option<RegexMatch>,
    pub parsed_args: Vec<Value>,
    pub resolved_lang: Option<String>,
}

impl SideState {
    pub(crate) fn merge(&mut self, other: SideState) {
        if other.captures.is_some() {
            self.captures = other.captures;
        }
        self.parsed_args.extend(other.parsed_args);
        if other.resolved_lang.is_some() {
            self.resolved_lang = other.resolved_lang;
        }
    }
}

/// The outcome of evaluating one expression against one session.
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    /// Whether the expression matched.
    pub matched: bool,
    /// Regex captures, when a pattern operator matched.
    pub captures: Option<RegexMatch>,
    /// Parsed command arguments (schema-validated values and leftover
    /// tokens).
    pub parsed_args: Vec<Value>,
    /// The language a localized comparison resolved to.
    pub resolved_lang: Option<String>,
}

impl EvaluationResult {
    /// A plain non-match with empty context.
    pub fn non_match() -> Self {
        Self {
            matched: false,
            captures: None,
            parsed_args: Vec::new(),
            resolved_lang: None,
        }
    }

    fn from_side(matched: bool, side: SideState) -> Self {
        Self {
            matched,
            captures: side.captures,
            parsed_args: side.parsed_args,
            resolved_lang: side.resolved_lang,
        }
    }
}

/// Outcome of a pool-aware ad hoc check.
#[derive(Debug)]
pub enum Verdict {
    Matched(EvaluationResult),
    NotMatched,
    /// The entry's expiry had passed; it was removed without evaluation.
    Expired,
}

/// Time source for expiry decisions, in unix seconds. Injectable so expiry
/// behavior is testable without sleeping.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// The wall clock.
pub fn system_clock() -> Clock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    })
}

/// Evaluates expression trees against sessions.
pub struct Evaluator {
    cache: Arc<dyn EvalCache>,
    clock: Clock,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    /// An evaluator with an in-process cache and the wall clock.
    pub fn new() -> Self {
        Self {
            cache: Arc::new(MemoryCache::new()),
            clock: system_clock(),
        }
    }

    /// Replaces the cache storage.
    pub fn with_cache(mut self, cache: Arc<dyn EvalCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Current time in unix seconds, per the injected clock.
    pub fn now(&self) -> u64 {
        (self.clock)()
    }

    /// Evaluates `expr` against `session`.
    ///
    /// This is the fault barrier: extraction and operator errors are
    /// logged and reported as a non-match with empty context.
    pub async fn evaluate(&self, session: &Session, expr: &Expr, debug: bool) -> EvaluationResult {
        let mut side = SideState::default();
        match self.eval_expr(session, expr, &mut side, debug).await {
            Ok(value) => EvaluationResult::from_side(value.is_truthy(), side),
            Err(error) => {
                warn!(%error, "expression evaluation failed, treating as non-match");
                EvaluationResult::non_match()
            }
        }
    }

    fn eval_expr<'a>(
        &'a self,
        session: &'a Session,
        expr: &'a Expr,
        side: &'a mut SideState,
        debug: bool,
    ) -> BoxFuture<'a, Result<Value, EvalError>> {
        Box::pin(async move {
            let value = match &expr.kind {
                ExprKind::Always => Value::Bool(true),
                ExprKind::Field(clause) => {
                    trace!(field = clause.name(), "extracting field");
                    clause.field().extractor().extract(session).await?
                }
                ExprKind::Binary(binary) => self.eval_binary(session, binary, side, debug).await?,
                ExprKind::All(children) => {
                    let mut outcome = true;
                    for child in children {
                        let v = self.eval_expr(session, child, &mut *side, debug).await?;
                        if !v.is_truthy() {
                            outcome = false;
                            break;
                        }
                    }
                    Value::Bool(outcome)
                }
                ExprKind::Any(children) => {
                    let mut outcome = false;
                    for child in children {
                        let v = self.eval_expr(session, child, &mut *side, debug).await?;
                        if v.is_truthy() {
                            outcome = true;
                            break;
                        }
                    }
                    Value::Bool(outcome)
                }
                ExprKind::Not(child) => {
                    let v = self.eval_expr(session, child, &mut *side, debug).await?;
                    Value::Bool(!v.is_truthy())
                }
            };
            if debug {
                debug!(value = %value, node = ?expr.kind, "clause evaluated");
            }
            Ok(value)
        })
    }

    async fn eval_binary(
        &self,
        session: &Session,
        binary: &BinaryExpr,
        side: &mut SideState,
        debug: bool,
    ) -> Result<Value, EvalError> {
        let left_clause = match &binary.left {
            Operand::Expr(e) => match &e.kind {
                ExprKind::Field(clause) => Some(clause),
                _ => None,
            },
            _ => None,
        };

        // Override shortcut: constant answer, no extraction.
        if let (Some(clause), Operand::Value(rv)) = (left_clause, &binary.right)
            && let Some(answer) = clause.field().override_for(rv)
        {
            trace!(field = clause.name(), answer, "override shortcut");
            return Ok(Value::Bool(answer ^ binary.negate));
        }

        // Cache shortcut: restore the stored outcome and side channel.
        let cache_key = left_clause.and_then(|clause| {
            let policy = clause.field().cache_policy()?;
            if policy.skip_for(binary.op) {
                return None;
            }
            let scope = policy.key(session)?;
            Some(CacheKey {
                field: clause.name().to_string(),
                op: binary.op,
                rhs: binary.right.fingerprint(),
                scope,
            })
        });
        if let Some(key) = &cache_key
            && let Some(hit) = self.cache.get(key)
        {
            trace!(field = %key.field, op = %key.op, "cache hit");
            let value = hit.value.clone();
            side.merge(hit.side);
            return Ok(negated(value, binary.negate));
        }

        // An always-true operand short-circuits the node.
        if operand_always(&binary.left) || operand_always(&binary.right) {
            return Ok(Value::Bool(true ^ binary.negate));
        }

        let mut local = SideState::default();

        let left_value = match &binary.left {
            Operand::Expr(e) => self.eval_expr(session, e, &mut local, debug).await?,
            Operand::Value(v) => v.clone(),
            _ => {
                return Err(EvalError::BadOperand {
                    operator: binary.op.name(),
                    reason: "left operand must be a field reference or literal".to_string(),
                });
            }
        };

        let resolved_right;
        let rhs = match &binary.right {
            Operand::Expr(e) => {
                resolved_right = self.eval_expr(session, e, &mut local, debug).await?;
                Rhs::Value(&resolved_right)
            }
            Operand::Value(v) => Rhs::Value(v),
            Operand::Pattern(p) => Rhs::Pattern(p),
            Operand::PatternMap(map) => Rhs::PatternMap(map.as_slice()),
            Operand::Target(items) => Rhs::Target(items.as_slice()),
            Operand::Schema(s) => Rhs::Schema(s.as_ref()),
            Operand::Func(f) => Rhs::Func(f),
            Operand::Invoke { func, args } => Rhs::Invoke {
                func,
                args: args.as_slice(),
            },
            Operand::Always => unreachable!("handled by the short-circuit above"),
        };

        let raw = ops::apply(binary.op, &left_value, rhs, &mut local)?;

        if let Some(key) = cache_key {
            self.cache.put(
                key,
                CachedVerdict {
                    value: raw.clone(),
                    side: local.clone(),
                },
            );
        }
        side.merge(local);
        Ok(negated(raw, binary.negate))
    }
}

fn negated(value: Value, negate: bool) -> Value {
    if negate {
        Value::Bool(!value.is_truthy())
    } else {
        value
    }
}

fn operand_always(operand: &Operand) -> bool {
    match operand {
        Operand::Always => true,
        Operand::Expr(e) => matches!(e.kind, ExprKind::Always),
        _ => false,
    }
}
