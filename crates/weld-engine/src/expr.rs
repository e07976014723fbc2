//! Expression AST: the condition language evaluated against events.
//!
//! Conditions are trees of [`Expr`] nodes: field-clause leaves, binary
//! relational nodes and boolean combinators. Trees are built once, at
//! handler-registration time, by the condition builder and are immutable
//! afterwards; evaluation-scoped state lives in the evaluator's side
//! channel, never in the tree.
//!
//! Every node carries an evaluation `priority` and an optional absolute
//! expiry. Priorities order the children of [`all`]/[`any`] so cheap or
//! critical gates run before expensive ones without callers hand-ordering
//! their conditions.
//!
//! # Example
//!
//! ```rust,ignore
//! use weld_engine::{all, TargetItem};
//! use weld_engine::schema::IntSchema;
//!
//! let expr = all([
//!     fields.prefix.eq(true),
//!     fields.command.prefix_of(vec![
//!         TargetItem::text("ban"),
//!         TargetItem::schema(IntSchema),
//!     ]),
//! ]);
//! ```

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use weld_core::Value;

use crate::error::BuildError;
use crate::field::FieldClause;
use crate::schema::ArgSchema;

/// Relational operators of binary nodes.
///
/// Negated spellings (`NotEqual`, `NotIn`, ...) are the `negate` flag on
/// [`BinaryExpr`], not separate operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    In,
    Contains,
    PrefixOf,
    SuffixOf,
    SingletonOf,
    Match,
    FullMatch,
    Search,
    ValidateBy,
    ApplyTo,
    GetAttr,
    Call,
}

impl Operator {
    /// Stable name, used in cache keys and logs.
    pub fn name(self) -> &'static str {
        match self {
            Operator::Equal => "equal",
            Operator::In => "in",
            Operator::Contains => "contains",
            Operator::PrefixOf => "prefix_of",
            Operator::SuffixOf => "suffix_of",
            Operator::SingletonOf => "singleton_of",
            Operator::Match => "match",
            Operator::FullMatch => "full_match",
            Operator::Search => "search",
            Operator::ValidateBy => "validate_by",
            Operator::ApplyTo => "apply_to",
            Operator::GetAttr => "get_attr",
            Operator::Call => "call",
        }
    }

    /// Whether this operator performs dynamic member access or invocation.
    /// The dispatcher isolates the event (deep copy) for such expressions.
    pub fn is_dynamic(self) -> bool {
        matches!(self, Operator::GetAttr | Operator::Call)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A regex compiled once at condition-build time.
#[derive(Clone)]
pub struct Pattern {
    raw: Arc<str>,
    regex: Arc<Regex>,
}

impl Pattern {
    fn compile(source: &str, wrapped: String) -> Result<Self, BuildError> {
        let regex = Regex::new(&wrapped).map_err(|e| BuildError::BadPattern {
            pattern: source.to_string(),
            source: e,
        })?;
        Ok(Self {
            raw: Arc::from(source),
            regex: Arc::new(regex),
        })
    }

    /// Compiles for `Match`: anchored at the start of the haystack.
    pub fn anchored_start(source: &str) -> Result<Self, BuildError> {
        Self::compile(source, format!(r"\A(?:{source})"))
    }

    /// Compiles for `FullMatch`: must consume the whole haystack.
    pub fn anchored_full(source: &str) -> Result<Self, BuildError> {
        Self::compile(source, format!(r"\A(?:{source})\z"))
    }

    /// Compiles for `Search`: matches anywhere.
    pub fn unanchored(source: &str) -> Result<Self, BuildError> {
        Self::compile(source, source.to_string())
    }

    /// The pattern as written by the author.
    pub fn source(&self) -> &str {
        &self.raw
    }

    pub(crate) fn regex(&self) -> &Regex {
        &self.regex
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({})", self.raw)
    }
}

/// A function operand: applied to the extracted value (and bound
/// arguments, for `Call`).
pub type ValueFn = Arc<dyn Fn(&Value, &[Value]) -> Value + Send + Sync>;

/// One element of a command target sequence.
#[derive(Clone)]
pub enum TargetItem {
    /// Token must equal this text.
    Text(String),
    /// Token must validate against this schema; the validated value is
    /// published as a parsed argument.
    Schema(Arc<dyn ArgSchema>),
}

impl TargetItem {
    pub fn text(s: impl Into<String>) -> Self {
        TargetItem::Text(s.into())
    }

    pub fn schema(s: impl ArgSchema + 'static) -> Self {
        TargetItem::Schema(Arc::new(s))
    }
}

impl From<&str> for TargetItem {
    fn from(s: &str) -> Self {
        TargetItem::Text(s.to_string())
    }
}

impl fmt::Debug for TargetItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetItem::Text(s) => write!(f, "{s:?}"),
            TargetItem::Schema(s) => write!(f, "<{}>", s.name()),
        }
    }
}

/// An operand of a binary node.
#[derive(Clone)]
pub enum Operand {
    /// A nested expression; field clauses appear as `Expr` leaves. After
    /// condition building, the left operand is always one of these.
    Expr(Box<Expr>),
    /// A literal value.
    Value(Value),
    /// A compiled regex.
    Pattern(Pattern),
    /// Language-keyed patterns; the first matching language wins.
    PatternMap(Arc<Vec<(String, Pattern)>>),
    /// A command target sequence.
    Target(Arc<Vec<TargetItem>>),
    /// A schema validator.
    Schema(Arc<dyn ArgSchema>),
    /// A function, for `ApplyTo`.
    Func(ValueFn),
    /// A function with bound arguments, for `Call`.
    Invoke {
        func: ValueFn,
        args: Arc<Vec<Value>>,
    },
    /// The always-true marker; resolving it short-circuits the node.
    Always,
}

impl Operand {
    /// Stable textual fingerprint for cache keys. Function operands are
    /// deliberately opaque (and skipped by cache policies in practice).
    pub(crate) fn fingerprint(&self) -> String {
        match self {
            Operand::Expr(e) => format!("expr:{e:?}"),
            Operand::Value(v) => format!("value:{v}"),
            Operand::Pattern(p) => format!("pattern:{}", p.source()),
            Operand::PatternMap(map) => {
                let parts: Vec<String> =
                    map.iter().map(|(lang, p)| format!("{lang}={}", p.source())).collect();
                format!("patterns:{}", parts.join(","))
            }
            Operand::Target(items) => format!("target:{items:?}"),
            Operand::Schema(s) => format!("schema:{}", s.name()),
            Operand::Func(_) => "func".to_string(),
            Operand::Invoke { args, .. } => format!("invoke:{args:?}"),
            Operand::Always => "*".to_string(),
        }
    }
}

impl fmt::Debug for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Expr(e) => write!(f, "{e:?}"),
            Operand::Value(v) => write!(f, "{v}"),
            Operand::Pattern(p) => write!(f, "{p:?}"),
            Operand::PatternMap(map) => write!(f, "PatternMap({} langs)", map.len()),
            Operand::Target(items) => write!(f, "{items:?}"),
            Operand::Schema(s) => write!(f, "<{}>", s.name()),
            Operand::Func(_) => write!(f, "<fn>"),
            Operand::Invoke { args, .. } => write!(f, "<fn>({args:?})"),
            Operand::Always => write!(f, "<always>"),
        }
    }
}

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Value(v)
    }
}

impl From<bool> for Operand {
    fn from(v: bool) -> Self {
        Operand::Value(Value::Bool(v))
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Value(Value::Int(v))
    }
}

impl From<i32> for Operand {
    fn from(v: i32) -> Self {
        Operand::Value(Value::Int(i64::from(v)))
    }
}

impl From<&str> for Operand {
    fn from(v: &str) -> Self {
        Operand::Value(Value::Str(v.to_string()))
    }
}

impl From<String> for Operand {
    fn from(v: String) -> Self {
        Operand::Value(Value::Str(v))
    }
}

impl From<Vec<TargetItem>> for Operand {
    fn from(items: Vec<TargetItem>) -> Self {
        Operand::Target(Arc::new(items))
    }
}

impl From<Arc<dyn ArgSchema>> for Operand {
    fn from(s: Arc<dyn ArgSchema>) -> Self {
        Operand::Schema(s)
    }
}

/// A two-operand relational node.
#[derive(Debug, Clone)]
pub struct BinaryExpr {
    pub op: Operator,
    pub left: Operand,
    pub right: Operand,
    /// XORed with the operator outcome.
    pub negate: bool,
}

/// Node variants of the expression tree.
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Matches everything.
    Always,
    /// A bare field reference; matches when the extracted value is truthy.
    Field(FieldClause),
    Binary(BinaryExpr),
    /// Conjunction; children are evaluated in stored order, stopping at
    /// the first false.
    All(Vec<Expr>),
    /// Disjunction; stops at the first true.
    Any(Vec<Expr>),
    Not(Box<Expr>),
}

/// An expression tree node with its ordering priority and optional
/// one-shot expiry (absolute unix seconds).
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub priority: i32,
    pub expires_at: Option<u64>,
}

impl Expr {
    pub(crate) fn new(kind: ExprKind, priority: i32) -> Self {
        Self {
            kind,
            priority,
            expires_at: None,
        }
    }

    /// Whether the expiry, if any, has passed at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether any node uses a dynamic (member-access/invocation) operator.
    pub fn uses_dynamic_ops(&self) -> bool {
        match &self.kind {
            ExprKind::Always | ExprKind::Field(_) => false,
            ExprKind::Binary(b) => {
                b.op.is_dynamic()
                    || operand_uses_dynamic(&b.left)
                    || operand_uses_dynamic(&b.right)
            }
            ExprKind::All(children) | ExprKind::Any(children) => {
                children.iter().any(Expr::uses_dynamic_ops)
            }
            ExprKind::Not(child) => child.uses_dynamic_ops(),
        }
    }

    /// Visits every field clause referenced anywhere in the tree.
    pub fn for_each_field(&self, visit: &mut impl FnMut(&FieldClause)) {
        match &self.kind {
            ExprKind::Always => {}
            ExprKind::Field(clause) => visit(clause),
            ExprKind::Binary(b) => {
                operand_for_each_field(&b.left, visit);
                operand_for_each_field(&b.right, visit);
            }
            ExprKind::All(children) | ExprKind::Any(children) => {
                for child in children {
                    child.for_each_field(visit);
                }
            }
            ExprKind::Not(child) => child.for_each_field(visit),
        }
    }
}

fn operand_uses_dynamic(operand: &Operand) -> bool {
    match operand {
        Operand::Expr(e) => e.uses_dynamic_ops(),
        _ => false,
    }
}

fn operand_for_each_field(operand: &Operand, visit: &mut impl FnMut(&FieldClause)) {
    if let Operand::Expr(e) = operand {
        e.for_each_field(visit);
    }
}

/// The always-true expression.
pub fn always() -> Expr {
    Expr::new(ExprKind::Always, 0)
}

/// Conjunction of clauses, flattened and priority-ordered.
pub fn all(children: impl IntoIterator<Item = Expr>) -> Expr {
    combine(children, /* conjunction */ true)
}

/// Disjunction of clauses, flattened and priority-ordered.
pub fn any(children: impl IntoIterator<Item = Expr>) -> Expr {
    combine(children, false)
}

/// Negation; inherits the child's priority so it orders correctly when
/// nested in a combinator.
pub fn not(child: Expr) -> Expr {
    let priority = child.priority;
    Expr::new(ExprKind::Not(Box::new(child)), priority)
}

fn combine(children: impl IntoIterator<Item = Expr>, conjunction: bool) -> Expr {
    let mut flat = Vec::new();
    for child in children {
        match child.kind {
            ExprKind::All(inner) if conjunction => flat.extend(inner),
            ExprKind::Any(inner) if !conjunction => flat.extend(inner),
            kind => flat.push(Expr {
                kind,
                priority: child.priority,
                expires_at: child.expires_at,
            }),
        }
    }
    let mut flat = order_clauses(flat);
    if flat.len() == 1 {
        return flat.pop().expect("len checked");
    }
    let kind = if conjunction {
        ExprKind::All(flat)
    } else {
        ExprKind::Any(flat)
    };
    Expr::new(kind, 0)
}

/// Orders combinator children: priority > 0 first (descending), priority
/// == 0 in original relative order, priority < 0 last (descending).
pub(crate) fn order_clauses(mut clauses: Vec<Expr>) -> Vec<Expr> {
    clauses.sort_by_key(|clause| match clause.priority {
        p if p > 0 => (0u8, -i64::from(p)),
        0 => (1, 0),
        p => (2, -i64::from(p)),
    });
    clauses
}

// =============================================================================
// Authoring DSL
// =============================================================================

impl FieldClause {
    fn binary(&self, op: Operator, right: Operand, negate: bool) -> Expr {
        let leaf = Expr::new(ExprKind::Field(self.clone()), self.priority());
        Expr::new(
            ExprKind::Binary(BinaryExpr {
                op,
                left: Operand::Expr(Box::new(leaf)),
                right,
                negate,
            }),
            self.priority(),
        )
    }

    /// The bare field as an expression: matches when its value is truthy.
    pub fn truthy(&self) -> Expr {
        Expr::new(ExprKind::Field(self.clone()), self.priority())
    }

    pub fn eq(&self, rhs: impl Into<Operand>) -> Expr {
        self.binary(Operator::Equal, rhs.into(), false)
    }

    pub fn ne(&self, rhs: impl Into<Operand>) -> Expr {
        self.binary(Operator::Equal, rhs.into(), true)
    }

    /// Membership: the extracted value is one of `items`.
    pub fn is_in<I>(&self, items: I) -> Expr
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let list = Value::List(items.into_iter().map(Into::into).collect());
        self.binary(Operator::In, Operand::Value(list), false)
    }

    pub fn not_in<I>(&self, items: I) -> Expr
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let list = Value::List(items.into_iter().map(Into::into).collect());
        self.binary(Operator::In, Operand::Value(list), true)
    }

    /// Membership, the other direction: the extracted sequence (or string)
    /// contains `rhs`.
    pub fn contains(&self, rhs: impl Into<Operand>) -> Expr {
        self.binary(Operator::Contains, rhs.into(), false)
    }

    pub fn not_contains(&self, rhs: impl Into<Operand>) -> Expr {
        self.binary(Operator::Contains, rhs.into(), true)
    }

    /// `rhs` is a prefix of the extracted value. For command tokens against
    /// a target sequence, leftover tokens are published as parsed
    /// arguments.
    pub fn prefix_of(&self, rhs: impl Into<Operand>) -> Expr {
        self.binary(Operator::PrefixOf, rhs.into(), false)
    }

    pub fn not_prefix_of(&self, rhs: impl Into<Operand>) -> Expr {
        self.binary(Operator::PrefixOf, rhs.into(), true)
    }

    /// `rhs` is a suffix of the extracted value.
    pub fn suffix_of(&self, rhs: impl Into<Operand>) -> Expr {
        self.binary(Operator::SuffixOf, rhs.into(), false)
    }

    pub fn not_suffix_of(&self, rhs: impl Into<Operand>) -> Expr {
        self.binary(Operator::SuffixOf, rhs.into(), true)
    }

    /// The extracted sequence has exactly one element matching `rhs`.
    pub fn singleton_of(&self, rhs: impl Into<Operand>) -> Expr {
        self.binary(Operator::SingletonOf, rhs.into(), false)
    }

    pub fn not_singleton_of(&self, rhs: impl Into<Operand>) -> Expr {
        self.binary(Operator::SingletonOf, rhs.into(), true)
    }

    /// Regex match anchored at the start of the extracted string.
    pub fn matches(&self, pattern: &str) -> Result<Expr, BuildError> {
        let p = Pattern::anchored_start(pattern)?;
        Ok(self.binary(Operator::Match, Operand::Pattern(p), false))
    }

    /// Regex match consuming the whole extracted string.
    pub fn full_match(&self, pattern: &str) -> Result<Expr, BuildError> {
        let p = Pattern::anchored_full(pattern)?;
        Ok(self.binary(Operator::FullMatch, Operand::Pattern(p), false))
    }

    /// Regex match anywhere in the extracted string.
    pub fn search(&self, pattern: &str) -> Result<Expr, BuildError> {
        let p = Pattern::unanchored(pattern)?;
        Ok(self.binary(Operator::Search, Operand::Pattern(p), false))
    }

    /// Language-keyed patterns (anchored at the start, like
    /// [`matches`](Self::matches)); the first matching language wins and is
    /// published as the resolved language.
    pub fn matches_map<I, L>(&self, patterns: I) -> Result<Expr, BuildError>
    where
        I: IntoIterator<Item = (L, &'static str)>,
        L: Into<String>,
    {
        let mut compiled = Vec::new();
        for (lang, source) in patterns {
            compiled.push((lang.into(), Pattern::anchored_start(source)?));
        }
        Ok(self.binary(Operator::Match, Operand::PatternMap(Arc::new(compiled)), false))
    }

    /// Schema validation of the extracted value; the validated value is
    /// published as the parsed argument.
    pub fn validate_by(&self, s: impl ArgSchema + 'static) -> Expr {
        self.binary(Operator::ValidateBy, Operand::Schema(Arc::new(s)), false)
    }

    /// Applies `f` to the extracted value; the node's value is the result.
    pub fn apply<F>(&self, f: F) -> Expr
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        let func: ValueFn = Arc::new(move |value, _args| f(value));
        self.binary(Operator::ApplyTo, Operand::Func(func), false)
    }

    /// Dynamic member access on the extracted value (JSON object key or
    /// list index).
    pub fn attr(&self, name: impl Into<Value>) -> Expr {
        self.binary(Operator::GetAttr, Operand::Value(name.into()), false)
    }

    /// Invokes `f` with the extracted value and `args`.
    pub fn call<F>(&self, f: F, args: Vec<Value>) -> Expr
    where
        F: Fn(&Value, &[Value]) -> Value + Send + Sync + 'static,
    {
        self.binary(
            Operator::Call,
            Operand::Invoke {
                func: Arc::new(f),
                args: Arc::new(args),
            },
            false,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;

    fn clause(name: &str, priority: i32) -> FieldClause {
        FieldClause::new(Arc::new(
            Field::from_fn(name, |_| Ok(Value::Null)).priority(priority),
        ))
    }

    fn priorities(expr: &Expr) -> Vec<i32> {
        match &expr.kind {
            ExprKind::All(children) | ExprKind::Any(children) => {
                children.iter().map(|c| c.priority).collect()
            }
            _ => panic!("expected combinator"),
        }
    }

    #[test]
    fn all_orders_by_priority_class() {
        let expr = all([
            clause("rate", -999).eq(true),
            clause("a", 0).eq(1),
            clause("perm", 5).eq(true),
            clause("b", 0).eq(2),
            clause("block", 100).eq(false),
            clause("late", -1).eq(true),
        ]);
        assert_eq!(priorities(&expr), vec![100, 5, 0, 0, -1, -999]);
    }

    #[test]
    fn zero_priority_keeps_original_order() {
        let a = clause("a", 0);
        let b = clause("b", 0);
        let expr = all([a.eq(1), b.eq(2)]);
        match &expr.kind {
            ExprKind::All(children) => {
                let names: Vec<String> = children
                    .iter()
                    .map(|c| {
                        let mut name = String::new();
                        c.for_each_field(&mut |f| name = f.name().to_string());
                        name
                    })
                    .collect();
                assert_eq!(names, vec!["a", "b"]);
            }
            _ => panic!("expected All"),
        }
    }

    #[test]
    fn nested_same_kind_groups_flatten() {
        let expr = all([clause("a", 0).eq(1), all([clause("b", 0).eq(2), clause("c", 0).eq(3)])]);
        match &expr.kind {
            ExprKind::All(children) => assert_eq!(children.len(), 3),
            _ => panic!("expected All"),
        }
    }

    #[test]
    fn singleton_group_collapses() {
        let expr = all([clause("a", 3).eq(1)]);
        assert!(matches!(expr.kind, ExprKind::Binary(_)));
        assert_eq!(expr.priority, 3);
    }

    #[test]
    fn not_inherits_child_priority() {
        let negated = not(clause("gate", 7).eq(true));
        assert_eq!(negated.priority, 7);
        let expr = all([clause("a", 0).eq(1), negated]);
        assert_eq!(priorities(&expr), vec![7, 0]);
    }

    #[test]
    fn dynamic_ops_detection() {
        let plain = clause("a", 0).eq(1);
        assert!(!plain.uses_dynamic_ops());
        let dynamic = clause("a", 0).attr("name");
        assert!(dynamic.uses_dynamic_ops());
        assert!(all([plain, dynamic]).uses_dynamic_ops());
    }

    #[test]
    fn bad_pattern_is_a_build_error() {
        let err = clause("text", 0).matches("(unclosed").unwrap_err();
        assert!(matches!(err, BuildError::BadPattern { .. }));
    }

    #[test]
    fn expiry_check() {
        let mut expr = always();
        assert!(!expr.is_expired(10));
        expr.expires_at = Some(10);
        assert!(expr.is_expired(10));
        assert!(!expr.is_expired(9));
    }
}
