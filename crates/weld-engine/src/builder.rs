//! Condition builder: lowers developer input into a resolved expression.
//!
//! Handler authors hand the registration surface a list of [`Cond`]s:
//! bare strings, pre-built expressions, nested combinators. The builder
//! turns that into one fully resolved [`Expr`]:
//!
//! 1. bare literals are lowered onto the category's canonical fields,
//! 2. operand order is normalized so the field side is always left,
//! 3. per-field converter/remap policies rewrite naive `Equal` nodes into
//!    the operator the field's value shape calls for,
//! 4. duplicate explicit clauses for unique fields within one AND level
//!    are silently dropped (later duplicate loses; long-standing
//!    behavior, kept as is),
//! 5. every registered default clause whose field goes unreferenced is
//!    ANDed in, and
//! 6. the expiry input is resolved to an absolute timestamp.

use std::collections::HashSet;

use tracing::debug;

use weld_core::{EventCategory, Value};

use crate::error::BuildError;
use crate::expr::{self, Expr, ExprKind, Operand, Operator};
use crate::field::FieldClause;
use crate::registry::FieldRegistry;

/// Expiry inputs at or above this are absolute unix timestamps; smaller
/// values are offsets from build-time now.
pub const ABSOLUTE_EPOCH_THRESHOLD: u64 = 1_000_000_000;

/// Canonical field bare message literals bind to.
pub const CANON_TEXT: &str = "text";
/// Canonical field the first bare literal binds to outside chat.
pub const CANON_EVENT_TYPE: &str = "event_type";
/// Canonical field the second bare literal binds to outside chat.
pub const CANON_SUB_TYPE: &str = "sub_type";

/// Developer-facing condition input.
#[derive(Debug, Clone)]
pub enum Cond {
    /// A bare literal, bound to the category's canonical field(s).
    Text(String),
    /// A pre-built expression.
    Expr(Expr),
    All(Vec<Cond>),
    Any(Vec<Cond>),
    Not(Box<Cond>),
}

impl From<&str> for Cond {
    fn from(s: &str) -> Self {
        Cond::Text(s.to_string())
    }
}

impl From<String> for Cond {
    fn from(s: String) -> Self {
        Cond::Text(s)
    }
}

impl From<Expr> for Cond {
    fn from(e: Expr) -> Self {
        Cond::Expr(e)
    }
}

/// Compiles condition input for one event category.
pub struct ConditionBuilder<'a> {
    registry: &'a FieldRegistry,
    category: EventCategory,
}

impl<'a> ConditionBuilder<'a> {
    pub fn new(registry: &'a FieldRegistry, category: EventCategory) -> Self {
        Self { registry, category }
    }

    /// Builds the resolved expression. `now` is the build-time clock
    /// reading used to resolve relative expiry inputs.
    pub fn build(
        &self,
        conds: Vec<Cond>,
        expiry: Option<u64>,
        now: u64,
    ) -> Result<Expr, BuildError> {
        let mut literal_slot = 0usize;

        // Lower and normalize, splicing top-level conjunctions so the
        // whole input forms a single AND level.
        let mut flat: Vec<Expr> = Vec::new();
        for cond in conds {
            let lowered = self.lower(cond, &mut literal_slot)?;
            let normalized = self.normalize(lowered);
            let Expr {
                kind,
                priority,
                expires_at,
            } = normalized;
            match kind {
                ExprKind::All(children) => flat.extend(children),
                kind => flat.push(Expr {
                    kind,
                    priority,
                    expires_at,
                }),
            }
        }
        let flat = dedupe_unique(flat);

        let mut referenced: HashSet<usize> = HashSet::new();
        for clause_expr in &flat {
            clause_expr.for_each_field(&mut |c| {
                referenced.insert(c.identity());
            });
        }

        let mut clauses = flat;
        for clause in self.registry.defaulted_fields(self.category) {
            if referenced.contains(&clause.identity()) {
                continue;
            }
            let factory = clause.field().default_factory().expect("filtered by registry");
            clauses.push(factory(&clause));
        }

        let mut root = expr::all(clauses);
        if let Some(input) = expiry {
            root.expires_at = Some(resolve_expiry(input, now));
        }
        Ok(root)
    }

    fn lower(&self, cond: Cond, literal_slot: &mut usize) -> Result<Expr, BuildError> {
        match cond {
            Cond::Expr(e) => Ok(e),
            Cond::Text(literal) => self.lower_literal(literal, literal_slot),
            Cond::All(children) => {
                let mut lowered = Vec::with_capacity(children.len());
                for child in children {
                    lowered.push(self.lower(child, literal_slot)?);
                }
                Ok(expr::all(lowered))
            }
            Cond::Any(children) => {
                let mut lowered = Vec::with_capacity(children.len());
                for child in children {
                    lowered.push(self.lower(child, literal_slot)?);
                }
                Ok(expr::any(lowered))
            }
            Cond::Not(inner) => Ok(expr::not(self.lower(*inner, literal_slot)?)),
        }
    }

    /// Binds a bare literal: message conditions compare the canonical
    /// text field; elsewhere the first literal binds to the primary type
    /// and the second to the sub-type.
    fn lower_literal(&self, literal: String, literal_slot: &mut usize) -> Result<Expr, BuildError> {
        let name = match self.category {
            EventCategory::Message => CANON_TEXT,
            _ => {
                let name = match *literal_slot {
                    0 => CANON_EVENT_TYPE,
                    1 => CANON_SUB_TYPE,
                    _ => {
                        return Err(BuildError::NoCanonicalField {
                            literal,
                            category: self.category,
                        });
                    }
                };
                *literal_slot += 1;
                name
            }
        };
        let clause = self.registry.resolve(name).map_err(|_| BuildError::NoCanonicalField {
            literal: literal.clone(),
            category: self.category,
        })?;
        Ok(clause.eq(Value::Str(literal)))
    }

    fn normalize(&self, expr: Expr) -> Expr {
        let Expr {
            kind,
            mut priority,
            expires_at,
        } = expr;
        let kind = match kind {
            ExprKind::Binary(mut binary) => {
                // Canonical orientation: the field side is always left.
                if binary.op == Operator::Equal
                    && operand_field(&binary.left).is_none()
                    && operand_field(&binary.right).is_some()
                {
                    std::mem::swap(&mut binary.left, &mut binary.right);
                }

                if let Some(clause) = operand_field(&binary.left).cloned() {
                    if binary.op == Operator::Equal
                        && matches!(&binary.right, Operand::Value(_) | Operand::Schema(_))
                    {
                        let rhs = std::mem::replace(&mut binary.right, Operand::Always);
                        let rhs = match (rhs, clause.field().rhs_converter_ref()) {
                            (Operand::Value(v), Some(convert)) => convert(v),
                            (other, _) => other,
                        };
                        let (op, rhs) = match clause.field().remap_ref() {
                            Some(remap) => remap.remap(binary.op, rhs),
                            None => (binary.op, rhs),
                        };
                        binary.op = op;
                        binary.right = rhs;
                    }
                    priority = clause.priority();
                }

                binary.left = self.normalize_operand(binary.left);
                binary.right = self.normalize_operand(binary.right);
                ExprKind::Binary(binary)
            }
            ExprKind::All(children) => {
                let normalized: Vec<Expr> =
                    children.into_iter().map(|c| self.normalize(c)).collect();
                ExprKind::All(dedupe_unique(normalized))
            }
            ExprKind::Any(children) => {
                ExprKind::Any(children.into_iter().map(|c| self.normalize(c)).collect())
            }
            ExprKind::Not(child) => ExprKind::Not(Box::new(self.normalize(*child))),
            other => other,
        };
        Expr {
            kind,
            priority,
            expires_at,
        }
    }

    fn normalize_operand(&self, operand: Operand) -> Operand {
        match operand {
            Operand::Expr(inner) => Operand::Expr(Box::new(self.normalize(*inner))),
            other => other,
        }
    }
}

fn resolve_expiry(input: u64, now: u64) -> u64 {
    if input >= ABSOLUTE_EPOCH_THRESHOLD {
        input
    } else {
        now + input
    }
}

/// Drops later duplicate clauses for unique fields within one AND level.
fn dedupe_unique(children: Vec<Expr>) -> Vec<Expr> {
    let mut seen: HashSet<usize> = HashSet::new();
    let mut kept = Vec::with_capacity(children.len());
    for child in children {
        if let Some(clause) = subject_field(&child)
            && clause.field().is_unique()
            && !seen.insert(clause.identity())
        {
            debug!(field = clause.name(), "dropping duplicate clause for unique field");
            continue;
        }
        kept.push(child);
    }
    kept
}

/// The field a clause is "about": the left field of a binary node, the
/// field of a bare leaf, through negation.
fn subject_field(expr: &Expr) -> Option<&FieldClause> {
    match &expr.kind {
        ExprKind::Field(clause) => Some(clause),
        ExprKind::Binary(binary) => operand_field(&binary.left),
        ExprKind::Not(child) => subject_field(child),
        _ => None,
    }
}

fn operand_field(operand: &Operand) -> Option<&FieldClause> {
    match operand {
        Operand::Expr(e) => match &e.kind {
            ExprKind::Field(clause) => Some(clause),
            _ => None,
        },
        _ => None,
    }
}
