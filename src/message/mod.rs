//! In-flight message record.
//!
//! A [`Message`] owns a JSON object tree and is addressed with dot-path
//! [`FieldSpec`]s. Reads never create containers; writes create every missing
//! intermediate container.

pub mod field;

pub use field::FieldSpec;

use crate::expr::{self, ExprDataSource};
use crate::{error::StreamError, Result};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    body: Map<String, Value>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a message from a copy of `value`; the caller keeps the original.
    pub fn copy_json(value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self { body: map.clone() }),
            _ => Err(StreamError::NotAnObject),
        }
    }

    /// Takes ownership of `value` without copying it.
    pub fn adopt_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(body) => Ok(Self { body }),
            _ => Err(StreamError::NotAnObject),
        }
    }

    pub fn adopt_object(body: Map<String, Value>) -> Self {
        Self { body }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Self::adopt_json(serde_json::from_str(text)?)
    }

    pub fn as_json(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn into_json(self) -> Value {
        Value::Object(self.body)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.body.clone())
    }

    pub fn has(&self, field: &str) -> bool {
        FieldSpec::parse(field).lookup(&self.body).is_some()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        FieldSpec::parse(field).lookup(&self.body)
    }

    pub fn get_mut(&mut self, field: &str) -> Option<&mut Value> {
        let spec = FieldSpec::parse(field);
        spec.container_mut(&mut self.body)?.get_mut(spec.field())
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Strings are returned as-is, numbers and booleans are rendered; anything
    /// else yields `default`.
    pub fn get_string(&self, field: &str, default: &str) -> String {
        match self.get(field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => default.to_string(),
        }
    }

    pub fn get_i64(&self, field: &str, default: i64) -> i64 {
        match self.get(field) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_i32(&self, field: &str, default: i32) -> i32 {
        i32::try_from(self.get_i64(field, i64::from(default))).unwrap_or(default)
    }

    pub fn get_f64(&self, field: &str, default: f64) -> f64 {
        match self.get(field) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_bool(&self, field: &str, default: bool) -> bool {
        match self.get(field) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                _ => default,
            },
            _ => default,
        }
    }

    pub fn get_object(&self, field: &str) -> Option<&Map<String, Value>> {
        self.get(field).and_then(Value::as_object)
    }

    pub fn get_array(&self, field: &str) -> Option<&Vec<Value>> {
        self.get(field).and_then(Value::as_array)
    }

    /// Serializes `value` and stores it at `field`.
    pub fn put<T: Serialize>(&mut self, field: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.put_raw(field, value);
        Ok(())
    }

    pub fn put_raw(&mut self, field: &str, value: Value) {
        let spec = FieldSpec::parse(field);
        spec.container_or_create(&mut self.body)
            .insert(spec.field().to_string(), value);
    }

    /// Appends to the array at `field`. A missing field becomes a new array and
    /// a non-array value is replaced by a fresh array.
    pub fn append_raw(&mut self, field: &str, value: Value) {
        let spec = FieldSpec::parse(field);
        let slot = spec
            .container_or_create(&mut self.body)
            .entry(spec.field().to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match slot {
            Value::Array(items) => items.push(value),
            other => *other = Value::Array(vec![value]),
        }
    }

    /// Removes `field`, returning the previous value.
    pub fn clear(&mut self, field: &str) -> Option<Value> {
        let spec = FieldSpec::parse(field);
        spec.container_mut(&mut self.body)?.remove(spec.field())
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> String {
        // a string-keyed map always serializes
        serde_json::to_string_pretty(&self.body).unwrap_or_default()
    }

    /// Single-line JSON.
    pub fn to_line(&self) -> String {
        serde_json::to_string(&self.body).unwrap_or_default()
    }

    /// Evaluates `${...}` tokens using this message as the only data source.
    pub fn eval_expression(&self, template: &str) -> String {
        expr::evaluate_text(template, &[self])
    }
}

impl ExprDataSource for Message {
    fn name(&self) -> &str {
        "message"
    }

    fn lookup(&self, label: &str) -> Option<Value> {
        match self.get(label) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.clone()),
        }
    }
}

impl From<Map<String, Value>> for Message {
    fn from(body: Map<String, Value>) -> Self {
        Self::adopt_object(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_copy_is_independent() {
        let original = json!({"a": {"b": 1}});
        let mut message = Message::copy_json(&original).unwrap();
        message.put_raw("a.b", json!(2));

        assert_eq!(original, json!({"a": {"b": 1}}));
        assert_eq!(message.into_json(), json!({"a": {"b": 2}}));
    }

    #[test]
    fn test_adopt_keeps_tree() {
        let mut body = Map::new();
        body.insert("k".to_string(), json!("v"));
        let mut message = Message::adopt_object(body);
        message.put_raw("other", json!(1));
        assert_eq!(message.into_json(), json!({"k": "v", "other": 1}));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(matches!(
            Message::copy_json(&json!([1, 2])),
            Err(StreamError::NotAnObject)
        ));
        assert!(Message::adopt_json(json!("text")).is_err());
    }

    #[test]
    fn test_nested_write_and_read() {
        let mut message = Message::new();
        assert_eq!(message.get_i64("x.y.z", 7), 7);
        assert!(message.as_json().is_empty());

        message.put("x.y.z", 42).unwrap();
        assert_eq!(message.into_json(), json!({"x": {"y": {"z": 42}}}));
    }

    #[test]
    fn test_typed_getters_use_defaults() {
        let message = Message::copy_json(&json!({
            "n": 12,
            "s": "34",
            "bad": "x1",
            "f": 2.5,
            "flag": "TRUE",
            "obj": {"inner": true}
        }))
        .unwrap();

        assert_eq!(message.get_i64("n", 0), 12);
        assert_eq!(message.get_i64("s", 0), 34);
        assert_eq!(message.get_i64("bad", -1), -1);
        assert_eq!(message.get_i64("f", -1), -1);
        assert_eq!(message.get_i32("n", 0), 12);
        assert_eq!(message.get_f64("f", 0.0), 2.5);
        assert!(message.get_bool("flag", false));
        assert!(message.get_bool("obj.inner", false));
        assert!(!message.get_bool("missing", false));
        assert_eq!(message.get_string("n", ""), "12");
        assert_eq!(message.get_string("obj", "dflt"), "dflt");
    }

    #[test]
    fn test_append_raw() {
        let mut message = Message::copy_json(&json!({"tags": "solo"})).unwrap();
        message.append_raw("list.items", json!(1));
        message.append_raw("list.items", json!(2));
        message.append_raw("tags", json!("fresh"));

        assert_eq!(
            message.into_json(),
            json!({"tags": ["fresh"], "list": {"items": [1, 2]}})
        );
    }

    #[test]
    fn test_clear_and_has() {
        let mut message = Message::copy_json(&json!({"a": {"b": 1, "c": 2}})).unwrap();
        assert!(message.has("a.b"));
        assert_eq!(message.clear("a.b"), Some(json!(1)));
        assert!(!message.has("a.b"));
        assert_eq!(message.clear("nope.b"), None);
        assert!(!message.has("nope"));
    }

    #[test]
    fn test_serialization_forms() {
        let message = Message::copy_json(&json!({"a": 1})).unwrap();
        assert_eq!(message.to_line(), r#"{"a":1}"#);
        assert_eq!(message.to_json(), "{\n  \"a\": 1\n}");
    }

    #[test]
    fn test_message_as_data_source() {
        let message = Message::copy_json(&json!({"a": {"b": "x"}, "n": null})).unwrap();
        assert_eq!(message.eval_expression("v=${a.b}"), "v=x");
        assert_eq!(message.eval_expression("${n|none}"), "none");
    }
}
