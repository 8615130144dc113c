use serde_json::{Map, Value};
use std::fmt;

/// Parsed dot-path into a message tree.
///
/// `"a.b.c"` splits into the container segments `["a", "b"]` and the terminal
/// field `"c"`. A path without dots has no containers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldSpec {
    containers: Vec<String>,
    field: String,
}

impl FieldSpec {
    pub fn parse(path: &str) -> Self {
        let mut segments: Vec<String> = path.split('.').map(str::to_string).collect();
        // split always yields at least one segment
        let field = segments.pop().unwrap_or_default();
        Self {
            containers: segments,
            field,
        }
    }

    pub fn containers(&self) -> &[String] {
        &self.containers
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Walks the container segments without creating anything. Returns `None`
    /// as soon as a segment is missing or is not an object.
    pub fn container<'a>(&self, root: &'a Map<String, Value>) -> Option<&'a Map<String, Value>> {
        let mut current = root;
        for segment in &self.containers {
            current = current.get(segment)?.as_object()?;
        }
        Some(current)
    }

    /// Mutable variant of [`FieldSpec::container`]; never creates containers.
    pub fn container_mut<'a>(
        &self,
        root: &'a mut Map<String, Value>,
    ) -> Option<&'a mut Map<String, Value>> {
        let mut current = root;
        for segment in &self.containers {
            current = current.get_mut(segment)?.as_object_mut()?;
        }
        Some(current)
    }

    /// Walks the container segments, creating missing containers and
    /// replacing non-object intermediates with empty objects.
    pub fn container_or_create<'a>(
        &self,
        root: &'a mut Map<String, Value>,
    ) -> &'a mut Map<String, Value> {
        let mut current = root;
        for segment in &self.containers {
            let slot = current
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            current = ensure_object(slot);
        }
        current
    }

    pub fn lookup<'a>(&self, root: &'a Map<String, Value>) -> Option<&'a Value> {
        self.container(root)?.get(&self.field)
    }
}

fn ensure_object(slot: &mut Value) -> &mut Map<String, Value> {
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(map) => map,
        _ => unreachable!("slot was replaced with an object above"),
    }
}

impl From<&str> for FieldSpec {
    fn from(path: &str) -> Self {
        FieldSpec::parse(path)
    }
}

impl fmt::Display for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.containers {
            write!(f, "{}.", segment)?;
        }
        write!(f, "{}", self.field)
    }
}
