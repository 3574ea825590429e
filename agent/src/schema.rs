//! Structural schemas for tool and step payloads
//!
//! A [`Schema`] is a flat list of named fields with primitive types. It is used
//! for three things:
//! - validating a payload before a tool or step runs (and after it returns)
//! - describing a tool to the backend as a JSON Schema `parameters` object
//! - checking, at build time, that adjacent workflow steps fit together
//!
//! Schemas can be written by hand or derived from a `schemars::JsonSchema` type.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};

/// Payload exchanged between tools and steps: a JSON object
pub type Fields = serde_json::Map<String, Value>;

/// Primitive field types understood by the validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
}

impl FieldKind {
    /// JSON Schema `type` keyword for this kind
    pub fn json_type(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
        }
    }

    fn from_json_type(name: &str) -> Option<Self> {
        match name {
            "string" => Some(FieldKind::String),
            "integer" => Some(FieldKind::Integer),
            "number" => Some(FieldKind::Number),
            "boolean" => Some(FieldKind::Boolean),
            _ => None,
        }
    }

    /// Whether a JSON value has this kind
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
        }
    }

    /// Whether a value of `other` is acceptable where `self` is expected
    fn accepts(&self, other: FieldKind) -> bool {
        *self == other || (*self == FieldKind::Number && other == FieldKind::Integer)
    }
}

fn describe(value: &Value) -> &'static str {
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

/// A single named field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// Structural description of an object payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// An empty schema (accepts any object)
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Add a required field
    pub fn field(
        mut self,
        name: impl Into<String>,
        kind: FieldKind,
        description: impl Into<String>,
    ) -> Self {
        self.push(name.into(), kind, Some(description.into()), true);
        self
    }

    /// Add an optional field
    pub fn optional(
        mut self,
        name: impl Into<String>,
        kind: FieldKind,
        description: impl Into<String>,
    ) -> Self {
        self.push(name.into(), kind, Some(description.into()), false);
        self
    }

    /// Add a required string field
    pub fn string(self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.field(name, FieldKind::String, description)
    }

    fn push(&mut self, name: String, kind: FieldKind, description: Option<String>, required: bool) {
        let description = description.filter(|d| !d.is_empty());
        // Re-declaring a field replaces it
        self.fields.retain(|f| f.name != name);
        self.fields.push(Field {
            name,
            kind,
            description,
            required,
        });
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.required)
    }

    /// Derive a schema from a type implementing `JsonSchema`
    ///
    /// Only flat structs whose fields are strings, numbers or booleans are
    /// supported; `Option<T>` fields become optional.
    pub fn of<T: JsonSchema>() -> Result<Self> {
        let root = schemars::schema_for!(T);
        let value = serde_json::to_value(&root)
            .map_err(|e| AgentError::Config(format!("cannot serialise schema: {}", e)))?;
        Self::from_json_schema(&value)
    }

    /// Build a schema from a JSON Schema object with flat `properties`
    pub fn from_json_schema(value: &Value) -> Result<Self> {
        let properties = match value.get("properties") {
            Some(Value::Object(props)) => props,
            Some(_) => {
                return Err(AgentError::Config("schema 'properties' must be an object".into()))
            }
            None => return Ok(Self::new()),
        };

        let required: Vec<&str> = value
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut schema = Self::new();
        for (name, prop) in properties {
            let (kind, nullable) = property_kind(prop).ok_or_else(|| {
                AgentError::Config(format!("field '{}' has an unsupported type", name))
            })?;
            let description = prop
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string);
            let is_required = required.contains(&name.as_str()) && !nullable;
            schema.push(name.clone(), kind, description, is_required);
        }

        Ok(schema)
    }

    /// Check `payload` against this schema
    ///
    /// Unknown fields are allowed. `target` names the payload in the error
    /// (e.g. "copywriter-agent input").
    pub fn validate(&self, target: &str, payload: &Fields) -> Result<()> {
        for field in &self.fields {
            match payload.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(AgentError::validation(
                        target,
                        format!("missing required field '{}'", field.name),
                    ));
                }
                None | Some(Value::Null) => {}
                Some(value) if !field.kind.matches(value) => {
                    return Err(AgentError::validation(
                        target,
                        format!(
                            "field '{}' expected {}, got {}",
                            field.name,
                            field.kind.json_type(),
                            describe(value)
                        ),
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Check an arbitrary JSON value, which must be an object
    pub fn validate_value(&self, target: &str, value: &Value) -> Result<Fields> {
        match value {
            Value::Object(fields) => {
                self.validate(target, fields)?;
                Ok(fields.clone())
            }
            other => Err(AgentError::validation(
                target,
                format!("expected an object, got {}", describe(other)),
            )),
        }
    }

    /// Required fields of `next` that this schema does not produce with a compatible type
    pub fn missing_for(&self, next: &Schema) -> Vec<String> {
        next.required_fields()
            .filter(|wanted| {
                !self
                    .get(&wanted.name)
                    .is_some_and(|have| have.required && wanted.kind.accepts(have.kind))
            })
            .map(|f| f.name.clone())
            .collect()
    }

    /// Render as a JSON Schema object suitable for backend tool definitions
    pub fn to_json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        for field in &self.fields {
            let mut prop = serde_json::Map::new();
            prop.insert("type".into(), Value::String(field.kind.json_type().into()));
            if let Some(ref description) = field.description {
                prop.insert("description".into(), Value::String(description.clone()));
            }
            properties.insert(field.name.clone(), Value::Object(prop));
        }

        let required: Vec<Value> = self
            .required_fields()
            .map(|f| Value::String(f.name.clone()))
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Resolve a JSON Schema property to a field kind and whether it admits null
fn property_kind(prop: &Value) -> Option<(FieldKind, bool)> {
    match prop.get("type") {
        Some(Value::String(name)) => FieldKind::from_json_type(name).map(|k| (k, false)),
        Some(Value::Array(names)) => {
            let names: Vec<&str> = names.iter().filter_map(Value::as_str).collect();
            let nullable = names.contains(&"null");
            let mut kinds = names.iter().filter(|n| **n != "null");
            let kind = FieldKind::from_json_type(kinds.next()?)?;
            if kinds.next().is_some() {
                return None;
            }
            Some((kind, nullable))
        }
        _ => {
            // schemars expresses Option<T> of a referenced type as anyOf [T, null]
            let variants = prop.get("anyOf").and_then(Value::as_array)?;
            let mut nullable = false;
            let mut kind = None;
            for variant in variants {
                match variant.get("type").and_then(Value::as_str) {
                    Some("null") => nullable = true,
                    Some(name) if kind.is_none() => kind = FieldKind::from_json_type(name),
                    _ => return None,
                }
            }
            kind.map(|k| (k, nullable))
        }
    }
}
