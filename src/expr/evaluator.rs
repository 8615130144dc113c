use super::sources::LiteralDataSource;
use super::ExprDataSource;
use crate::{error::StreamError, Result};
use serde_json::Value;

const TOKEN_START: &str = "${";
const TOKEN_END: char = '}';
const DEFAULT_SEPARATOR: char = '|';

/// Substitutes every `${...}` token in `template`.
///
/// An unterminated `${` is kept as literal text.
pub fn evaluate_text(template: &str, sources: &[&dyn ExprDataSource]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(TOKEN_START) {
        let after = &rest[start + TOKEN_START.len()..];
        let Some(end) = after.find(TOKEN_END) else {
            break;
        };
        out.push_str(&rest[..start]);
        if let Some(value) = resolve_token(&after[..end], sources) {
            out.push_str(&render_value(&value));
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

/// Resolves a single symbol to its raw value. Accepts `key`, `key|default`
/// or the same wrapped in `${...}`.
pub fn evaluate_symbol(key: &str, sources: &[&dyn ExprDataSource]) -> Option<Value> {
    let token = key
        .strip_prefix(TOKEN_START)
        .and_then(|k| k.strip_suffix(TOKEN_END))
        .unwrap_or(key);
    resolve_token(token, sources)
}

/// Recursively evaluates every string leaf of `value`. Non-string leaves are
/// copied unchanged.
pub fn evaluate_json(value: &Value, sources: &[&dyn ExprDataSource]) -> Value {
    match value {
        Value::String(s) => Value::String(evaluate_text(s, sources)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| evaluate_json(item, sources))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), evaluate_json(v, sources)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Text form of a resolved value. `null` renders as the empty string.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn to_long(value: &Value, sources: &[&dyn ExprDataSource], default: i64) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or(default),
        Value::String(s) => evaluate_text(s, sources).trim().parse().unwrap_or(default),
        _ => default,
    }
}

pub fn to_int(value: &Value, sources: &[&dyn ExprDataSource], default: i32) -> i32 {
    i32::try_from(to_long(value, sources, i64::from(default))).unwrap_or(default)
}

pub fn to_boolean(value: &Value, sources: &[&dyn ExprDataSource], default: bool) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => bool::from_text(&evaluate_text(s, sources)).unwrap_or(default),
        _ => default,
    }
}

/// Target types for [`evaluate_as`].
pub trait FromExpression: Sized {
    const TARGET: &'static str;

    fn from_text(text: &str) -> Option<Self>;
}

impl FromExpression for String {
    const TARGET: &'static str = "string";

    fn from_text(text: &str) -> Option<Self> {
        Some(text.to_string())
    }
}

impl FromExpression for bool {
    const TARGET: &'static str = "bool";

    fn from_text(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }
}

macro_rules! parsed_target {
    ($ty:ty, $name:expr) => {
        impl FromExpression for $ty {
            const TARGET: &'static str = $name;

            fn from_text(text: &str) -> Option<Self> {
                text.trim().parse().ok()
            }
        }
    };
}

parsed_target!(i32, "i32");
parsed_target!(i64, "i64");
parsed_target!(u64, "u64");
parsed_target!(f64, "f64");

/// Evaluates `template` and converts the result, failing with
/// [`StreamError::Coercion`] when the text does not parse.
pub fn evaluate_as<T: FromExpression>(template: &str, sources: &[&dyn ExprDataSource]) -> Result<T> {
    let text = evaluate_text(template, sources);
    T::from_text(&text).ok_or(StreamError::Coercion {
        text,
        target: T::TARGET,
    })
}

fn resolve_token(token: &str, sources: &[&dyn ExprDataSource]) -> Option<Value> {
    let (key, default) = match token.split_once(DEFAULT_SEPARATOR) {
        Some((key, default)) => (key.trim(), Some(default)),
        None => (token.trim(), None),
    };
    let fallback = default.map(|d| LiteralDataSource::new(Value::String(d.to_string())));

    sources
        .iter()
        .copied()
        .chain(fallback.as_ref().map(|f| f as &dyn ExprDataSource))
        .find_map(|source| source.lookup(key))
}
