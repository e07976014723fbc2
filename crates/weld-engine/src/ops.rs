//! Operator application: the relational logic of binary nodes.
//!
//! Shape rules: a left value the operator cannot work with is a non-match
//! (events vary); a right operand the operator cannot work with is an
//! authoring error and surfaces as [`EvalError::BadOperand`] (contained by
//! the evaluator's fault barrier).

use weld_core::Value;

use crate::error::EvalError;
use crate::eval::{RegexMatch, SideState};
use crate::expr::{Operator, Pattern, TargetItem, ValueFn};
use crate::schema::ArgSchema;

/// A right-hand operand after nested expressions have been resolved.
pub(crate) enum Rhs<'a> {
    Value(&'a Value),
    Pattern(&'a Pattern),
    PatternMap(&'a [(String, Pattern)]),
    Target(&'a [TargetItem]),
    Schema(&'a dyn ArgSchema),
    Func(&'a ValueFn),
    Invoke {
        func: &'a ValueFn,
        args: &'a [Value],
    },
}

fn bad(op: Operator, reason: &str) -> EvalError {
    EvalError::BadOperand {
        operator: op.name(),
        reason: reason.to_string(),
    }
}

/// Applies `op` to the resolved operands, writing side-channel context on
/// success. Predicates return `Value::Bool`; value operators (`ApplyTo`,
/// `GetAttr`, `Call`) pass their result through.
pub(crate) fn apply(
    op: Operator,
    left: &Value,
    rhs: Rhs<'_>,
    side: &mut SideState,
) -> Result<Value, EvalError> {
    match op {
        Operator::Equal => equal(left, rhs, side),
        Operator::In => is_in(op, left, rhs),
        Operator::Contains => contains(op, left, rhs),
        Operator::PrefixOf => affix(op, left, rhs, side, Edge::Prefix),
        Operator::SuffixOf => affix(op, left, rhs, side, Edge::Suffix),
        Operator::SingletonOf => singleton_of(op, left, rhs, side),
        Operator::Match | Operator::FullMatch | Operator::Search => regex_op(op, left, rhs, side),
        Operator::ValidateBy => validate_by(op, left, rhs, side),
        Operator::ApplyTo => match rhs {
            Rhs::Func(f) => Ok(f(left, &[])),
            _ => Err(bad(op, "right operand must be a function")),
        },
        Operator::GetAttr => get_attr(op, left, rhs),
        Operator::Call => match rhs {
            Rhs::Invoke { func, args } => Ok(func(left, args)),
            _ => Err(bad(op, "right operand must be an invocation")),
        },
    }
}

fn equal(left: &Value, rhs: Rhs<'_>, side: &mut SideState) -> Result<Value, EvalError> {
    match (left, rhs) {
        (Value::Tokens(tokens), Rhs::Target(target)) => {
            Ok(Value::Bool(match_target(tokens, target, side, Edge::Exact)))
        }
        (Value::Localized(map), Rhs::Value(Value::Str(expected))) => {
            for (lang, translation) in map {
                if translation == expected {
                    side.resolved_lang = Some(lang.clone());
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        (_, Rhs::Value(v)) => Ok(Value::Bool(left == v)),
        _ => Err(bad(Operator::Equal, "right operand must be a literal or target sequence")),
    }
}

fn is_in(op: Operator, left: &Value, rhs: Rhs<'_>) -> Result<Value, EvalError> {
    match rhs {
        Rhs::Value(Value::List(items)) => Ok(Value::Bool(items.contains(left))),
        Rhs::Value(Value::Tokens(tokens)) => Ok(Value::Bool(
            left.as_str().is_some_and(|s| tokens.iter().any(|t| t == s)),
        )),
        Rhs::Value(Value::Str(haystack)) => Ok(Value::Bool(
            left.as_str().is_some_and(|needle| haystack.contains(needle)),
        )),
        _ => Err(bad(op, "right operand must be a collection")),
    }
}

fn contains(op: Operator, left: &Value, rhs: Rhs<'_>) -> Result<Value, EvalError> {
    let Rhs::Value(needle) = rhs else {
        return Err(bad(op, "right operand must be a literal"));
    };
    Ok(Value::Bool(match left {
        Value::List(items) => items.contains(needle),
        Value::Tokens(tokens) => needle.as_str().is_some_and(|s| tokens.iter().any(|t| t == s)),
        Value::Str(haystack) => needle.as_str().is_some_and(|s| haystack.contains(s)),
        _ => false,
    }))
}

#[derive(Clone, Copy, PartialEq)]
enum Edge {
    Exact,
    Prefix,
    Suffix,
}

fn affix(
    op: Operator,
    left: &Value,
    rhs: Rhs<'_>,
    side: &mut SideState,
    edge: Edge,
) -> Result<Value, EvalError> {
    match (left, rhs) {
        (Value::Tokens(tokens), Rhs::Target(target)) => {
            Ok(Value::Bool(match_target(tokens, target, side, edge)))
        }
        (Value::Str(s), Rhs::Value(Value::Str(part))) => Ok(Value::Bool(match edge {
            Edge::Prefix => s.starts_with(part),
            Edge::Suffix => s.ends_with(part),
            Edge::Exact => s == part,
        })),
        (Value::Tokens(tokens), Rhs::Value(Value::Tokens(part))) => {
            Ok(Value::Bool(slice_affix(tokens, part, edge)))
        }
        (Value::List(items), Rhs::Value(Value::List(part))) => {
            Ok(Value::Bool(slice_affix(items, part, edge)))
        }
        (_, Rhs::Value(_) | Rhs::Target(_)) => Ok(Value::Bool(false)),
        _ => Err(bad(op, "right operand must be a literal or target sequence")),
    }
}

fn slice_affix<T: PartialEq>(full: &[T], part: &[T], edge: Edge) -> bool {
    match edge {
        Edge::Prefix => full.starts_with(part),
        Edge::Suffix => full.ends_with(part),
        Edge::Exact => full == part,
    }
}

/// Matches command tokens against a target sequence.
///
/// Target text elements must equal their token; schema elements must
/// validate theirs, and the validated values become parsed arguments. For
/// `Edge::Prefix`, tokens beyond the target are also published as parsed
/// arguments; for `Edge::Exact`, lengths must agree. Side-channel writes
/// are all-or-nothing: a failed match publishes nothing.
fn match_target(tokens: &[String], target: &[TargetItem], side: &mut SideState, edge: Edge) -> bool {
    if target.len() > tokens.len() {
        return false;
    }
    if edge == Edge::Exact && target.len() != tokens.len() {
        return false;
    }
    let offset = if edge == Edge::Suffix {
        tokens.len() - target.len()
    } else {
        0
    };

    let mut args = Vec::new();
    for (item, token) in target.iter().zip(&tokens[offset..]) {
        match item {
            TargetItem::Text(expected) => {
                if token != expected {
                    return false;
                }
            }
            TargetItem::Schema(s) => match s.validate(&Value::Str(token.clone())) {
                Ok(validated) => args.push(validated),
                Err(_) => return false,
            },
        }
    }
    if edge == Edge::Prefix {
        args.extend(tokens[target.len()..].iter().cloned().map(Value::Str));
    }
    side.parsed_args.extend(args);
    true
}

fn singleton_of(
    op: Operator,
    left: &Value,
    rhs: Rhs<'_>,
    side: &mut SideState,
) -> Result<Value, EvalError> {
    let single: Value = match left {
        Value::Tokens(tokens) if tokens.len() == 1 => Value::Str(tokens[0].clone()),
        Value::List(items) if items.len() == 1 => items[0].clone(),
        _ => return Ok(Value::Bool(false)),
    };
    match rhs {
        Rhs::Value(expected) => Ok(Value::Bool(&single == expected)),
        Rhs::Schema(s) => match s.validate(&single) {
            Ok(validated) => {
                side.parsed_args.push(validated);
                Ok(Value::Bool(true))
            }
            Err(_) => Ok(Value::Bool(false)),
        },
        _ => Err(bad(op, "right operand must be a literal or schema")),
    }
}

fn regex_op(
    op: Operator,
    left: &Value,
    rhs: Rhs<'_>,
    side: &mut SideState,
) -> Result<Value, EvalError> {
    match rhs {
        Rhs::Pattern(pattern) => {
            let matched = match left {
                Value::Str(text) => run_pattern(pattern, text, side),
                // Any translation may match; the winning language is
                // published.
                Value::Localized(map) => map.iter().any(|(lang, text)| {
                    if run_pattern(pattern, text, side) {
                        side.resolved_lang = Some(lang.clone());
                        true
                    } else {
                        false
                    }
                }),
                _ => false,
            };
            Ok(Value::Bool(matched))
        }
        Rhs::PatternMap(patterns) => {
            for (lang, pattern) in patterns {
                let text = match left {
                    Value::Str(s) => Some(s.as_str()),
                    Value::Localized(map) => map.get(lang).map(String::as_str),
                    _ => None,
                };
                if let Some(text) = text
                    && run_pattern(pattern, text, side)
                {
                    side.resolved_lang = Some(lang.clone());
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        _ => Err(bad(op, "right operand must be a pattern")),
    }
}

fn run_pattern(pattern: &Pattern, text: &str, side: &mut SideState) -> bool {
    match pattern.regex().captures(text) {
        Some(caps) => {
            side.captures = Some(RegexMatch::from_captures(&caps));
            true
        }
        None => false,
    }
}

fn validate_by(
    op: Operator,
    left: &Value,
    rhs: Rhs<'_>,
    side: &mut SideState,
) -> Result<Value, EvalError> {
    let Rhs::Schema(s) = rhs else {
        return Err(bad(op, "right operand must be a schema"));
    };
    match s.validate(left) {
        Ok(validated) => {
            side.parsed_args.push(validated);
            Ok(Value::Bool(true))
        }
        // Rejection is the failure sentinel, not a fault.
        Err(_) => Ok(Value::Bool(false)),
    }
}

fn get_attr(op: Operator, left: &Value, rhs: Rhs<'_>) -> Result<Value, EvalError> {
    let Rhs::Value(key) = rhs else {
        return Err(bad(op, "right operand must be a key or index"));
    };
    let found = match (left, key) {
        (Value::Json(json), Value::Str(name)) => json.get(name).cloned().map(Value::Json),
        (Value::Json(json), Value::Int(index)) => {
            usize::try_from(*index).ok().and_then(|i| json.get(i)).cloned().map(Value::Json)
        }
        (Value::List(items), Value::Int(index)) => {
            usize::try_from(*index).ok().and_then(|i| items.get(i)).cloned()
        }
        (Value::Tokens(tokens), Value::Int(index)) => usize::try_from(*index)
            .ok()
            .and_then(|i| tokens.get(i))
            .map(|t| Value::Str(t.clone())),
        (Value::Localized(map), Value::Str(lang)) => {
            map.get(lang).map(|t| Value::Str(t.clone()))
        }
        _ => None,
    };
    Ok(found.unwrap_or(Value::Null))
}
