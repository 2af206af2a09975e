//! Tool input schema translation
//!
//! [`SchemaTranslator::translate`] converts a tool's JSON Schema into a
//! [`ValidatorSchema`]: the parameter representation handed to the LLM
//! framework and used to check arguments before a call.
//!
//! Translation rules:
//!
//! - `object` schemas become [`SchemaKind::Object`]. A property is mandatory
//!   only if it is listed in `required`; with no `required` list every
//!   property is optional.
//! - `array` schemas recurse into `items` (missing `items` means `Any`).
//! - `["string", "null"]` style unions become a nullable single type; any
//!   other union degrades to `Any`.
//! - Unknown or missing `type` degrades to [`SchemaKind::Any`].
//!
//! Results are cached by the SHA-256 of the schema's canonical (key-sorted)
//! JSON text in a bounded map evicting the oldest entry first.

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

/// Default number of translated schemas kept in memory.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Shape of a translated schema node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchemaKind {
    /// Object with named fields.
    Object {
        /// Fields in name order.
        fields: Vec<FieldSchema>,
    },
    /// Homogeneous array.
    Array {
        /// Element schema.
        items: Box<ValidatorSchema>,
    },
    /// String value.
    String,
    /// Any JSON number.
    Number,
    /// Whole number.
    Integer,
    /// `true` or `false`.
    Boolean,
    /// `null` only.
    Null,
    /// Unconstrained.
    Any,
}

/// One property of an object schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSchema {
    /// Property name.
    pub name: String,
    /// Property schema.
    pub schema: ValidatorSchema,
    /// Whether the property must be present.
    pub required: bool,
}

/// Translated schema node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatorSchema {
    /// Node shape.
    #[serde(flatten)]
    pub kind: SchemaKind,
    /// Description carried over from the source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether `null` is accepted in addition to `kind`.
    pub nullable: bool,
    /// Allowed values, when the source has `enum`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ValidatorSchema {
    fn of(kind: SchemaKind) -> Self {
        Self {
            kind,
            description: None,
            nullable: false,
            enum_values: None,
        }
    }

    /// The unconstrained schema.
    pub fn any() -> Self {
        Self::of(SchemaKind::Any)
    }

    /// Fields of an object schema; empty for every other kind.
    pub fn fields(&self) -> &[FieldSchema] {
        match &self.kind {
            SchemaKind::Object { fields } => fields,
            _ => &[],
        }
    }

    /// Look up an object field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields().iter().find(|f| f.name == name)
    }

    /// Check `value` against this schema.
    ///
    /// Returns one message per violation, each prefixed with the JSON path
    /// of the offending value (`$` is the root). An empty list means valid.
    pub fn validate(&self, value: &Value) -> Vec<String> {
        let mut errors = Vec::new();
        self.validate_at("$", value, &mut errors);
        errors
    }

    fn validate_at(&self, path: &str, value: &Value, errors: &mut Vec<String>) {
        if value.is_null() && self.nullable {
            return;
        }

        if let Some(allowed) = &self.enum_values {
            if !allowed.contains(value) {
                errors.push(format!("{path}: value {value} is not one of the allowed values"));
                return;
            }
        }

        let type_ok = match &self.kind {
            SchemaKind::Any => true,
            SchemaKind::String => value.is_string(),
            SchemaKind::Number => value.is_number(),
            SchemaKind::Integer => value.is_i64() || value.is_u64(),
            SchemaKind::Boolean => value.is_boolean(),
            SchemaKind::Null => value.is_null(),
            SchemaKind::Array { items } => match value.as_array() {
                Some(elements) => {
                    for (i, element) in elements.iter().enumerate() {
                        items.validate_at(&format!("{path}[{i}]"), element, errors);
                    }
                    true
                }
                None => false,
            },
            SchemaKind::Object { fields } => match value.as_object() {
                Some(map) => {
                    for field in fields {
                        let child = format!("{path}.{}", field.name);
                        match map.get(&field.name) {
                            Some(v) => field.schema.validate_at(&child, v, errors),
                            None if field.required => {
                                errors.push(format!("{child}: required field is missing"))
                            }
                            None => {}
                        }
                    }
                    true
                }
                None => false,
            },
        };

        if !type_ok {
            errors.push(format!("{path}: expected {}, got {}", self.type_name(), json_type(value)));
        }
    }

    fn type_name(&self) -> &'static str {
        match self.kind {
            SchemaKind::Object { .. } => "object",
            SchemaKind::Array { .. } => "array",
            SchemaKind::String => "string",
            SchemaKind::Number => "number",
            SchemaKind::Integer => "integer",
            SchemaKind::Boolean => "boolean",
            SchemaKind::Null => "null",
            SchemaKind::Any => "any",
        }
    }

    /// Render back to a JSON Schema parameter object for LLM tool
    /// definitions. `required` lists exactly the mandatory fields.
    pub fn to_json_schema(&self) -> Value {
        let mut out = Map::new();

        match &self.kind {
            SchemaKind::Any => {}
            SchemaKind::Object { fields } => {
                let properties: Map<String, Value> = fields
                    .iter()
                    .map(|f| (f.name.clone(), f.schema.to_json_schema()))
                    .collect();
                let required: Vec<Value> = fields
                    .iter()
                    .filter(|f| f.required)
                    .map(|f| Value::String(f.name.clone()))
                    .collect();
                out.insert("type".into(), self.json_type_value());
                out.insert("properties".into(), Value::Object(properties));
                if !required.is_empty() {
                    out.insert("required".into(), Value::Array(required));
                }
            }
            SchemaKind::Array { items } => {
                out.insert("type".into(), self.json_type_value());
                out.insert("items".into(), items.to_json_schema());
            }
            _ => {
                out.insert("type".into(), self.json_type_value());
            }
        }

        if let Some(description) = &self.description {
            out.insert("description".into(), json!(description));
        }
        if let Some(values) = &self.enum_values {
            out.insert("enum".into(), Value::Array(values.clone()));
        }
        Value::Object(out)
    }

    fn json_type_value(&self) -> Value {
        if self.nullable {
            json!([self.type_name(), "null"])
        } else {
            json!(self.type_name())
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Translate `schema` without consulting any cache.
pub fn translate_uncached(schema: &Value) -> ValidatorSchema {
    let Some(obj) = schema.as_object() else {
        return ValidatorSchema::any();
    };

    let (type_name, nullable) = match obj.get("type") {
        Some(Value::String(t)) => (Some(t.as_str()), false),
        Some(Value::Array(types)) => {
            let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
            let non_null: Vec<&str> = names.iter().copied().filter(|t| *t != "null").collect();
            let nullable = non_null.len() < names.len();
            match non_null.as_slice() {
                [single] => (Some(*single), nullable),
                [] if nullable => (Some("null"), false),
                _ => (None, nullable),
            }
        }
        _ => (None, false),
    };

    let kind = match type_name {
        Some("object") => SchemaKind::Object {
            fields: translate_properties(obj),
        },
        Some("array") => SchemaKind::Array {
            items: Box::new(obj.get("items").map_or_else(ValidatorSchema::any, translate_uncached)),
        },
        Some("string") => SchemaKind::String,
        Some("number") => SchemaKind::Number,
        Some("integer") => SchemaKind::Integer,
        Some("boolean") => SchemaKind::Boolean,
        Some("null") => SchemaKind::Null,
        _ => SchemaKind::Any,
    };

    ValidatorSchema {
        kind,
        description: obj
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        nullable,
        enum_values: obj.get("enum").and_then(Value::as_array).cloned(),
    }
}

fn translate_properties(obj: &Map<String, Value>) -> Vec<FieldSchema> {
    let required: Vec<&str> = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let Some(properties) = obj.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut fields: Vec<FieldSchema> = properties
        .iter()
        .map(|(name, schema)| FieldSchema {
            name: name.clone(),
            schema: translate_uncached(schema),
            required: required.contains(&name.as_str()),
        })
        .collect();
    fields.sort_by(|a, b| a.name.cmp(&b.name));
    fields
}

/// Stable cache key: SHA-256 of the key-sorted JSON text.
pub fn schema_key(schema: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(schema, &mut canonical);
    let digest = Sha256::digest(canonical.as_bytes());
    let mut key = String::with_capacity(64);
    for byte in digest {
        let _ = write!(key, "{byte:02x}");
    }
    key
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries currently cached.
    pub entries: usize,
    /// Maximum entries.
    pub capacity: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that required a conversion.
    pub misses: u64,
}

#[derive(Debug, Default)]
struct SchemaCache {
    entries: HashMap<String, Arc<ValidatorSchema>>,
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

/// Caching schema translator.
#[derive(Debug)]
pub struct SchemaTranslator {
    cache: Mutex<SchemaCache>,
    capacity: usize,
    conversions: AtomicU64,
}

impl Default for SchemaTranslator {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl SchemaTranslator {
    /// Create a translator caching at most `capacity` schemas (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(SchemaCache::default()),
            capacity: capacity.max(1),
            conversions: AtomicU64::new(0),
        }
    }

    /// Translate `schema`, reusing a cached result when one exists.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcphub::mcp::schema::SchemaTranslator;
    ///
    /// let translator = SchemaTranslator::default();
    /// let schema = serde_json::json!({
    ///     "type": "object",
    ///     "properties": { "a": { "type": "string" }, "b": { "type": "integer" } },
    ///     "required": ["a"]
    /// });
    /// let translated = translator.translate(&schema);
    /// assert!(translated.field("a").unwrap().required);
    /// assert!(!translated.field("b").unwrap().required);
    /// ```
    pub fn translate(&self, schema: &Value) -> Arc<ValidatorSchema> {
        let key = schema_key(schema);

        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.entries.get(&key).cloned() {
                cache.hits += 1;
                return hit;
            }
            cache.misses += 1;
        }

        self.conversions.fetch_add(1, Ordering::Relaxed);
        let translated = Arc::new(translate_uncached(schema));

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = cache.entries.get(&key) {
            return Arc::clone(existing);
        }
        while cache.entries.len() >= self.capacity {
            match cache.order.pop_front() {
                Some(oldest) => {
                    cache.entries.remove(&oldest);
                }
                None => break,
            }
        }
        cache.order.push_back(key.clone());
        cache.entries.insert(key, Arc::clone(&translated));
        translated
    }

    /// Number of uncached conversions performed so far.
    pub fn conversions(&self) -> u64 {
        self.conversions.load(Ordering::Relaxed)
    }

    /// Current cache counters.
    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        CacheStats {
            entries: cache.entries.len(),
            capacity: self.capacity,
            hits: cache.hits,
            misses: cache.misses,
        }
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.entries.clear();
        cache.order.clear();
    }
}
