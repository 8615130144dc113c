use super::ExprDataSource;
use crate::message::FieldSpec;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Flat key/value source.
#[derive(Debug, Clone, Default)]
pub struct MapDataSource {
    name: String,
    values: HashMap<String, Value>,
}

impl MapDataSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: HashMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }
}

impl ExprDataSource for MapDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, label: &str) -> Option<Value> {
        self.values.get(label).filter(|v| !v.is_null()).cloned()
    }
}

/// Dot-path lookup into a JSON object, e.g. configuration variables.
#[derive(Debug, Clone)]
pub struct JsonDataSource {
    name: String,
    root: Map<String, Value>,
}

impl JsonDataSource {
    pub fn new(name: impl Into<String>, root: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            root,
        }
    }
}

impl ExprDataSource for JsonDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, label: &str) -> Option<Value> {
        FieldSpec::parse(label)
            .lookup(&self.root)
            .filter(|v| !v.is_null())
            .cloned()
    }
}

/// Process environment, addressed as `<prefix><VAR>` (`env.HOME` by default).
#[derive(Debug, Clone)]
pub struct EnvDataSource {
    prefix: String,
}

impl EnvDataSource {
    pub const DEFAULT_PREFIX: &'static str = "env.";

    pub fn new() -> Self {
        Self::with_prefix(Self::DEFAULT_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for EnvDataSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ExprDataSource for EnvDataSource {
    fn name(&self) -> &str {
        "env"
    }

    fn lookup(&self, label: &str) -> Option<Value> {
        let var = label.strip_prefix(self.prefix.as_str())?;
        std::env::var(var).ok().map(Value::String)
    }
}

/// Concurrent key/value bag shared between workers.
#[derive(Debug, Clone)]
pub struct SharedDataSource {
    name: String,
    values: Arc<DashMap<String, Value>>,
}

impl SharedDataSource {
    pub fn new(name: impl Into<String>, values: Arc<DashMap<String, Value>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

impl ExprDataSource for SharedDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, label: &str) -> Option<Value> {
        self.values
            .get(label)
            .map(|entry| entry.value().clone())
            .filter(|v| !v.is_null())
    }
}

/// Adapts a closure into a data source.
pub struct FnDataSource<F> {
    name: String,
    lookup: F,
}

impl<F> FnDataSource<F>
where
    F: Fn(&str) -> Option<Value> + Send + Sync,
{
    pub fn new(name: impl Into<String>, lookup: F) -> Self {
        Self {
            name: name.into(),
            lookup,
        }
    }
}

impl<F> ExprDataSource for FnDataSource<F>
where
    F: Fn(&str) -> Option<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, label: &str) -> Option<Value> {
        (self.lookup)(label)
    }
}

/// Resolves every key to the same value; backs `${key|default}`.
pub(crate) struct LiteralDataSource {
    value: Value,
}

impl LiteralDataSource {
    pub(crate) fn new(value: Value) -> Self {
        Self { value }
    }
}

impl ExprDataSource for LiteralDataSource {
    fn name(&self) -> &str {
        "default"
    }

    fn lookup(&self, _label: &str) -> Option<Value> {
        Some(self.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::evaluate_text;
    use serde_json::json;

    #[test]
    fn test_json_source_paths() {
        let root = json!({"db": {"host": "h1", "port": 5432, "unset": null}});
        let source = JsonDataSource::new("vars", root.as_object().cloned().unwrap());

        assert_eq!(source.lookup("db.host"), Some(json!("h1")));
        assert_eq!(source.lookup("db.port"), Some(json!(5432)));
        assert_eq!(source.lookup("db.unset"), None);
        assert_eq!(source.lookup("db.missing"), None);
    }

    #[test]
    fn test_env_source_prefix() {
        std::env::set_var("RUSTREAM_EXPR_TEST", "from-env");
        let source = EnvDataSource::new();

        assert_eq!(
            source.lookup("env.RUSTREAM_EXPR_TEST"),
            Some(json!("from-env"))
        );
        assert_eq!(source.lookup("RUSTREAM_EXPR_TEST"), None);
        assert_eq!(source.lookup("env.RUSTREAM_EXPR_TEST_MISSING"), None);
    }

    #[test]
    fn test_shared_source_sees_updates() {
        let bag = Arc::new(DashMap::new());
        let source = SharedDataSource::new("user", bag.clone());
        assert_eq!(evaluate_text("${counter|0}", &[&source]), "0");

        bag.insert("counter".to_string(), json!(3));
        assert_eq!(evaluate_text("${counter|0}", &[&source]), "3");
    }

    #[test]
    fn test_null_values_fall_through_to_default() {
        let map = MapDataSource::new("defaults").with("region", Value::Null);
        assert_eq!(map.lookup("region"), None);
        assert_eq!(evaluate_text("${region|eu}", &[&map]), "eu");

        let bag = Arc::new(DashMap::new());
        bag.insert("owner".to_string(), Value::Null);
        let shared = SharedDataSource::new("user", bag);
        assert_eq!(shared.lookup("owner"), None);
        assert_eq!(evaluate_text("${owner|nobody}", &[&shared]), "nobody");

        let fallback = MapDataSource::new("fallback").with("owner", json!("ops"));
        let chain: [&dyn ExprDataSource; 2] = [&shared, &fallback];
        assert_eq!(evaluate_text("${owner}", &chain), "ops");
    }

    #[test]
    fn test_fn_source() {
        let source = FnDataSource::new("upper", |label: &str| {
            label
                .strip_prefix("upper:")
                .map(|rest| Value::String(rest.to_uppercase()))
        });
        assert_eq!(source.name(), "upper");
        assert_eq!(evaluate_text("${upper:abc}", &[&source]), "ABC");
        assert_eq!(evaluate_text("${lower:abc}", &[&source]), "");
    }
}
