//! `${key}` / `${key|default}` template evaluation.
//!
//! Templates are resolved against an ordered chain of [`ExprDataSource`]s.
//! The first source that returns a value for a key wins. A default literal
//! after `|` acts as one more source at the end of the chain, and a token
//! nothing resolves becomes the empty string.

pub mod evaluator;
pub mod sources;

pub use evaluator::{
    evaluate_as, evaluate_json, evaluate_symbol, evaluate_text, render_value, to_boolean, to_int,
    to_long, FromExpression,
};
pub use sources::{EnvDataSource, FnDataSource, JsonDataSource, MapDataSource, SharedDataSource};

use serde_json::Value;

/// Named lookup function used to resolve expression symbols.
pub trait ExprDataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `None` when the label is absent. Never fails.
    fn lookup(&self, label: &str) -> Option<Value>;
}
