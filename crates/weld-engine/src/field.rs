//! Field descriptors: named extraction points over events.
//!
//! A [`Field`] bundles everything the engine needs to know about one
//! extraction point: how to pull its value out of a session (possibly
//! asynchronously, possibly via a bot API call), how expensive that is
//! (priority), whether results may be cached, which right-hand literals
//! have constant answers (overrides), how naive `Equal` literals should be
//! rewritten (remap/converter), and what to check when a handler never
//! mentions the field at all (default clause).
//!
//! Fields are registered once at startup (see
//! [`FieldRegistry`](crate::registry::FieldRegistry)); the returned
//! [`FieldClause`] handle is the singleton leaf node referencing the field
//! from expression trees.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use weld_core::{EventCategory, Session, Value};

use crate::error::EvalError;
use crate::expr::{Expr, Operand, Operator};

/// Produces the clause ANDed into conditions that never reference the field.
pub type DefaultFactory = Arc<dyn Fn(&FieldClause) -> Expr + Send + Sync>;

/// Normalizes a raw right-hand literal before operator remapping.
pub type RhsConverter = Arc<dyn Fn(Value) -> Operand + Send + Sync>;

/// Extracts a field's value from a session.
///
/// Extractors may await bot API calls; any error is contained by the
/// evaluator's top-level fault barrier.
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    async fn extract(&self, session: &Session) -> Result<Value, EvalError>;
}

struct FnExtractor<F>(F);

#[async_trait]
impl<F> FieldExtractor for FnExtractor<F>
where
    F: Fn(&Session) -> Result<Value, EvalError> + Send + Sync,
{
    async fn extract(&self, session: &Session) -> Result<Value, EvalError> {
        (self.0)(session)
    }
}

/// Per-field caching contract.
///
/// The policy decides the event-derived part of the cache key (returning
/// `None` disables caching for that session) and which operators bypass
/// the cache entirely.
pub trait CachePolicy: Send + Sync {
    /// The event-derived cache key component, e.g. the sender id.
    fn key(&self, session: &Session) -> Option<Value>;

    /// Whether results for this operator must not be cached.
    fn skip_for(&self, _op: Operator) -> bool {
        false
    }
}

/// Rewrites a naive `Equal` comparison into the operator the field's value
/// shape actually calls for (schema validation, singleton match, ...).
pub trait OperandRemap: Send + Sync {
    fn remap(&self, op: Operator, rhs: Operand) -> (Operator, Operand);
}

/// A named extraction point over events.
pub struct Field {
    name: String,
    extractor: Arc<dyn FieldExtractor>,
    priority: i32,
    default_factory: Option<DefaultFactory>,
    cache: Option<Arc<dyn CachePolicy>>,
    overrides: HashMap<Value, bool>,
    rhs_converter: Option<RhsConverter>,
    remap: Option<Arc<dyn OperandRemap>>,
    unique: bool,
    categories: Vec<EventCategory>,
}

impl Field {
    /// Creates a field with the given extractor. Defaults: priority 0, no
    /// default clause, no cache, applicable to every category.
    pub fn new(name: impl Into<String>, extractor: impl FieldExtractor + 'static) -> Self {
        Self {
            name: name.into(),
            extractor: Arc::new(extractor),
            priority: 0,
            default_factory: None,
            cache: None,
            overrides: HashMap::new(),
            rhs_converter: None,
            remap: None,
            unique: false,
            categories: Vec::new(),
        }
    }

    /// Creates a field from a synchronous extraction closure.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Session) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        Self::new(name, FnExtractor(f))
    }

    /// Sets the evaluation priority (higher runs earlier inside `all`).
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the field unique within one AND level: a later duplicate
    /// explicit clause is silently dropped by the condition builder.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Restricts applicability (default-clause injection and literal
    /// binding) to the given categories. Unset means all categories.
    pub fn categories(mut self, categories: impl IntoIterator<Item = EventCategory>) -> Self {
        self.categories = categories.into_iter().collect();
        self
    }

    /// Declares a constant answer for comparisons against `value`,
    /// short-circuiting extraction entirely.
    pub fn override_value(mut self, value: impl Into<Value>, result: bool) -> Self {
        self.overrides.insert(value.into(), result);
        self
    }

    /// Attaches a cache policy.
    pub fn cache(mut self, policy: impl CachePolicy + 'static) -> Self {
        self.cache = Some(Arc::new(policy));
        self
    }

    /// Attaches a right-hand literal converter.
    pub fn rhs_converter<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Operand + Send + Sync + 'static,
    {
        self.rhs_converter = Some(Arc::new(f));
        self
    }

    /// Attaches an operator remap policy.
    pub fn remap(mut self, policy: impl OperandRemap + 'static) -> Self {
        self.remap = Some(Arc::new(policy));
        self
    }

    /// Attaches the default-clause factory.
    pub fn default_clause<F>(mut self, f: F) -> Self
    where
        F: Fn(&FieldClause) -> Expr + Send + Sync + 'static,
    {
        self.default_factory = Some(Arc::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_priority(&self) -> i32 {
        self.priority
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Whether the field applies to events of `category`.
    pub fn applies_to(&self, category: EventCategory) -> bool {
        self.categories.is_empty() || self.categories.contains(&category)
    }

    pub(crate) fn extractor(&self) -> &Arc<dyn FieldExtractor> {
        &self.extractor
    }

    pub(crate) fn override_for(&self, rhs: &Value) -> Option<bool> {
        self.overrides.get(rhs).copied()
    }

    pub(crate) fn cache_policy(&self) -> Option<&Arc<dyn CachePolicy>> {
        self.cache.as_ref()
    }

    pub(crate) fn rhs_converter_ref(&self) -> Option<&RhsConverter> {
        self.rhs_converter.as_ref()
    }

    pub(crate) fn remap_ref(&self) -> Option<&Arc<dyn OperandRemap>> {
        self.remap.as_ref()
    }

    pub(crate) fn default_factory(&self) -> Option<&DefaultFactory> {
        self.default_factory.as_ref()
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("unique", &self.unique)
            .finish()
    }
}

/// The singleton leaf handle for one registered field.
///
/// Cheap to clone; two clauses are the same field iff they share the
/// underlying descriptor (aliases resolve to the same clause).
#[derive(Clone)]
pub struct FieldClause {
    field: Arc<Field>,
}

impl FieldClause {
    pub(crate) fn new(field: Arc<Field>) -> Self {
        Self { field }
    }

    pub fn name(&self) -> &str {
        self.field.name()
    }

    pub fn priority(&self) -> i32 {
        self.field.get_priority()
    }

    /// Identity comparison: same underlying field descriptor.
    pub fn same_field(&self, other: &FieldClause) -> bool {
        Arc::ptr_eq(&self.field, &other.field)
    }

    /// Stable identity key for referenced-field bookkeeping.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.field) as usize
    }

    pub(crate) fn field(&self) -> &Field {
        &self.field
    }
}

impl fmt::Debug for FieldClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldClause({})", self.field.name())
    }
}
