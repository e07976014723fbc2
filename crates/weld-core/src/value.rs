//! Dynamic value model for field extraction and condition literals.
//!
//! Field extractors produce a [`Value`]; condition literals are lowered into
//! one. The variants cover the shapes the operator catalog works over:
//! scalars, lists, command tokens, localized text and raw JSON for
//! platform-specific structures.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::Value as Json;

/// Translations of one piece of text, keyed by language tag.
pub type LocalizedText = BTreeMap<String, String>;

/// A dynamically typed value flowing through expression evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    /// Shell-split command tokens of a message.
    Tokens(Vec<String>),
    /// Multi-language text; equality against any translation matches.
    Localized(LocalizedText),
    /// Raw JSON for structured platform data.
    Json(Json),
}

// Json holds floats, so Eq cannot be derived; comparisons the engine
// performs never involve NaN.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Str(s) => s.hash(state),
            Value::List(items) => items.hash(state),
            Value::Tokens(tokens) => tokens.hash(state),
            Value::Localized(map) => map.hash(state),
            // serde_json's default map is ordered, so equal values serialize
            // identically.
            Value::Json(j) => j.to_string().hash(state),
        }
    }
}

impl Value {
    /// Truthiness used when an expression node's value decides a match:
    /// `Null`, `false`, `0`, and empty strings/sequences are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Tokens(tokens) => !tokens.is_empty(),
            Value::Localized(map) => !map.is_empty(),
            Value::Json(j) => match j {
                Json::Null => false,
                Json::Bool(b) => *b,
                Json::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                Json::String(s) => !s.is_empty(),
                Json::Array(a) => !a.is_empty(),
                Json::Object(o) => !o.is_empty(),
            },
        }
    }

    /// Returns the string content, if this value is string-shaped.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::Json(Json::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Converts into plain JSON, for schema validation and logging.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Str(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Tokens(tokens) => {
                Json::Array(tokens.iter().cloned().map(Json::String).collect())
            }
            Value::Localized(map) => {
                Json::Object(map.iter().map(|(k, v)| (k.clone(), Json::String(v.clone()))).collect())
            }
            Value::Json(j) => j.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                let rendered: Vec<String> = items.iter().map(Value::to_string).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
            Value::Tokens(tokens) => write!(f, "[{}]", tokens.join(", ")),
            Value::Localized(map) => write!(f, "<i18n:{} langs>", map.len()),
            Value::Json(j) => write!(f, "{j}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<String>> for Value {
    fn from(tokens: Vec<String>) -> Self {
        Value::Tokens(tokens)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<LocalizedText> for Value {
    fn from(map: LocalizedText) -> Self {
        Value::Localized(map)
    }
}

impl From<Json> for Value {
    fn from(j: Json) -> Self {
        Value::Json(j)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(!Value::Tokens(vec![]).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(Value::Str("x".into()).is_truthy());
    }

    #[test]
    fn usable_as_map_key() {
        let mut map: HashMap<Value, bool> = HashMap::new();
        map.insert(Value::Str("*".into()), true);
        map.insert(Value::Int(42), false);
        assert_eq!(map.get(&Value::Str("*".into())), Some(&true));
        assert_eq!(map.get(&Value::Int(42)), Some(&false));
        assert_eq!(map.get(&Value::Int(7)), None);
    }

    #[test]
    fn typed_equality() {
        assert_ne!(Value::Int(1), Value::Str("1".into()));
        assert_eq!(Value::Tokens(vec!["a".into()]), Value::Tokens(vec!["a".into()]));
    }

    #[test]
    fn option_lowers_to_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(3i64)), Value::Int(3));
    }
}
