//! Built-in filters.

use crate::context::MessageProcessingContext;
use crate::pipeline::Filter;
use crate::{error::StreamError, Result};
use regex::Regex;
use serde_json::Value;

/// Passes when the value at `field` equals `value`.
pub struct FieldEquals {
    field: String,
    value: Value,
}

impl FieldEquals {
    pub fn new(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }
}

impl Filter for FieldEquals {
    fn passes(&self, ctx: &MessageProcessingContext<'_>) -> Result<bool> {
        Ok(ctx.message().get(&self.field) == Some(&self.value))
    }
}

pub struct FieldExists {
    field: String,
}

impl FieldExists {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Filter for FieldExists {
    fn passes(&self, ctx: &MessageProcessingContext<'_>) -> Result<bool> {
        Ok(ctx.message().has(&self.field))
    }
}

/// Passes when the string at `field` matches the pattern. Non-string values
/// never match.
pub struct FieldMatches {
    field: String,
    pattern: Regex,
}

impl FieldMatches {
    pub fn new(field: impl Into<String>, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            StreamError::InvalidConfig(format!("invalid pattern '{}': {}", pattern, e))
        })?;
        Ok(Self {
            field: field.into(),
            pattern,
        })
    }
}

impl Filter for FieldMatches {
    fn passes(&self, ctx: &MessageProcessingContext<'_>) -> Result<bool> {
        Ok(ctx
            .message()
            .get_str(&self.field)
            .is_some_and(|text| self.pattern.is_match(text)))
    }
}

/// Evaluates a template against the message and stream chain and compares
/// the rendered text.
pub struct ExpressionEquals {
    expression: String,
    expected: String,
}

impl ExpressionEquals {
    pub fn new(expression: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            expected: expected.into(),
        }
    }
}

impl Filter for ExpressionEquals {
    fn passes(&self, ctx: &MessageProcessingContext<'_>) -> Result<bool> {
        Ok(ctx.eval_expression(&self.expression) == self.expected)
    }
}

pub struct FlagSet {
    flag: String,
}

impl FlagSet {
    pub fn new(flag: impl Into<String>) -> Self {
        Self { flag: flag.into() }
    }
}

impl Filter for FlagSet {
    fn passes(&self, ctx: &MessageProcessingContext<'_>) -> Result<bool> {
        Ok(ctx.stream().is_flag_set(&self.flag))
    }
}

pub struct Not {
    inner: Box<dyn Filter>,
}

impl Not {
    pub fn new(inner: Box<dyn Filter>) -> Self {
        Self { inner }
    }
}

impl Filter for Not {
    fn passes(&self, ctx: &MessageProcessingContext<'_>) -> Result<bool> {
        Ok(!self.inner.passes(ctx)?)
    }
}

/// Short-circuits on the first failing filter. Empty passes.
pub struct AllOf {
    filters: Vec<Box<dyn Filter>>,
}

impl AllOf {
    pub fn new(filters: Vec<Box<dyn Filter>>) -> Self {
        Self { filters }
    }
}

impl Filter for AllOf {
    fn passes(&self, ctx: &MessageProcessingContext<'_>) -> Result<bool> {
        for filter in &self.filters {
            if !filter.passes(ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Short-circuits on the first passing filter. Empty fails.
pub struct AnyOf {
    filters: Vec<Box<dyn Filter>>,
}

impl AnyOf {
    pub fn new(filters: Vec<Box<dyn Filter>>) -> Self {
        Self { filters }
    }
}

impl Filter for AnyOf {
    fn passes(&self, ctx: &MessageProcessingContext<'_>) -> Result<bool> {
        for filter in &self.filters {
            if filter.passes(ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;
    use crate::context::StreamProcessingContext;
    use crate::message::Message;
    use crate::metrics::MetricsCatalog;
    use serde_json::json;

    fn stream() -> StreamProcessingContext {
        let catalog = MetricsCatalog::new(&MetricsConfig::default()).unwrap();
        StreamProcessingContext::new("test", catalog.scope())
    }

    fn check(filter: &dyn Filter, stream: &mut StreamProcessingContext, body: Value) -> bool {
        let ctx = MessageProcessingContext::new(stream, Message::adopt_json(body).unwrap());
        filter.passes(&ctx).unwrap()
    }

    #[test]
    fn test_field_filters() {
        let mut stream = stream();
        let equals = FieldEquals::new("meta.status", json!("error"));
        assert!(check(&equals, &mut stream, json!({"meta": {"status": "error"}})));
        assert!(!check(&equals, &mut stream, json!({"meta": {"status": "ok"}})));
        assert!(!check(&equals, &mut stream, json!({})));

        let numeric = FieldEquals::new("code", json!(500));
        assert!(check(&numeric, &mut stream, json!({"code": 500})));
        assert!(!check(&numeric, &mut stream, json!({"code": "500"})));

        let exists = FieldExists::new("a.b");
        assert!(check(&exists, &mut stream, json!({"a": {"b": null}})));
        assert!(!check(&exists, &mut stream, json!({"a": 1})));

        let matches = FieldMatches::new("host", r"^web-\d+$").unwrap();
        assert!(check(&matches, &mut stream, json!({"host": "web-12"})));
        assert!(!check(&matches, &mut stream, json!({"host": "db-1"})));
        assert!(!check(&matches, &mut stream, json!({"host": 12})));
        assert!(FieldMatches::new("host", "(").is_err());
    }

    #[test]
    fn test_expression_and_flag_filters() {
        let mut stream = stream();
        let expr = ExpressionEquals::new("${kind|none}", "none");
        assert!(check(&expr, &mut stream, json!({})));
        assert!(!check(&expr, &mut stream, json!({"kind": "order"})));

        let flag = FlagSet::new("paused");
        assert!(!check(&flag, &mut stream, json!({})));
        stream.set_flag("paused", true);
        assert!(check(&flag, &mut stream, json!({})));
    }

    #[test]
    fn test_combinators() {
        let mut stream = stream();
        let both = AllOf::new(vec![
            Box::new(FieldExists::new("a")),
            Box::new(FieldExists::new("b")),
        ]);
        let either = AnyOf::new(vec![
            Box::new(FieldExists::new("a")),
            Box::new(FieldExists::new("b")),
        ]);
        let neither = Not::new(Box::new(AnyOf::new(vec![
            Box::new(FieldExists::new("a")),
            Box::new(FieldExists::new("b")),
        ])));

        assert!(check(&both, &mut stream, json!({"a": 1, "b": 2})));
        assert!(!check(&both, &mut stream, json!({"a": 1})));
        assert!(check(&either, &mut stream, json!({"b": 2})));
        assert!(!check(&either, &mut stream, json!({})));
        assert!(check(&neither, &mut stream, json!({"c": 3})));

        assert!(check(&AllOf::new(Vec::new()), &mut stream, json!({})));
        assert!(!check(&AnyOf::new(Vec::new()), &mut stream, json!({})));
    }

    #[test]
    fn test_type_names() {
        assert_eq!(FieldEquals::new("a", json!(1)).type_name(), "FieldEquals");
        assert_eq!(AllOf::new(Vec::new()).type_name(), "AllOf");
    }
}
