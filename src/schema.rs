//! Tool input schemas as a closed set of tagged variants.
//!
//! Schemas serialize to the JSON-Schema-shaped objects clients expect from
//! `tools/list`, and arguments are checked by a recursive validator instead
//! of duck-typed inspection. Unknown argument keys are permitted; required
//! and typed keys are enforced.

use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Schema {
    kind: SchemaKind,
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub enum SchemaKind {
    String,
    Integer,
    Number,
    Boolean,
    Object(ObjectSchema),
    Array(Box<Schema>),
}

#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    pub properties: Vec<(String, Schema)>,
    pub required: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("missing required field '{0}'")]
    MissingField(String),
    #[error("'{path}' must be {expected}")]
    WrongType { path: String, expected: &'static str },
}

impl Schema {
    pub fn string(description: &str) -> Self {
        Self::leaf(SchemaKind::String, description)
    }

    pub fn integer(description: &str) -> Self {
        Self::leaf(SchemaKind::Integer, description)
    }

    pub fn number(description: &str) -> Self {
        Self::leaf(SchemaKind::Number, description)
    }

    pub fn boolean(description: &str) -> Self {
        Self::leaf(SchemaKind::Boolean, description)
    }

    pub fn array(description: &str, items: Schema) -> Self {
        Self::leaf(SchemaKind::Array(Box::new(items)), description)
    }

    pub fn object<'a>(
        properties: impl IntoIterator<Item = (&'a str, Schema)>,
        required: &[&str],
    ) -> Self {
        Self {
            kind: SchemaKind::Object(ObjectSchema {
                properties: properties
                    .into_iter()
                    .map(|(name, schema)| (name.to_string(), schema))
                    .collect(),
                required: required.iter().map(|name| name.to_string()).collect(),
            }),
            description: None,
        }
    }

    /// Schema for tools that take no arguments.
    pub fn empty_object() -> Self {
        Self::object([], &[])
    }

    fn leaf(kind: SchemaKind, description: &str) -> Self {
        Self {
            kind,
            description: if description.is_empty() {
                None
            } else {
                Some(description.to_string())
            },
        }
    }

    /// Structural soundness, checked once at registration: every required
    /// name must be a declared property, recursively.
    pub fn check_structure(&self) -> Result<(), String> {
        match &self.kind {
            SchemaKind::Object(object) => {
                for name in &object.required {
                    if !object.properties.iter().any(|(prop, _)| prop == name) {
                        return Err(format!("required field '{name}' is not a declared property"));
                    }
                }
                for (_, schema) in &object.properties {
                    schema.check_structure()?;
                }
                Ok(())
            }
            SchemaKind::Array(items) => items.check_structure(),
            _ => Ok(()),
        }
    }

    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        self.validate_at(value, "arguments")
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<(), SchemaError> {
        match &self.kind {
            SchemaKind::String => expect(value.is_string(), path, "a string"),
            SchemaKind::Integer => expect(
                value.as_i64().is_some() || value.as_u64().is_some(),
                path,
                "an integer",
            ),
            SchemaKind::Number => expect(value.is_number(), path, "a number"),
            SchemaKind::Boolean => expect(value.is_boolean(), path, "a boolean"),
            SchemaKind::Array(items) => {
                let Some(elements) = value.as_array() else {
                    return Err(wrong_type(path, "an array"));
                };
                for (index, element) in elements.iter().enumerate() {
                    items.validate_at(element, &format!("{path}[{index}]"))?;
                }
                Ok(())
            }
            SchemaKind::Object(object) => {
                let Some(map) = value.as_object() else {
                    return Err(wrong_type(path, "an object"));
                };
                for name in &object.required {
                    if !map.contains_key(name) {
                        return Err(SchemaError::MissingField(format!("{path}.{name}")));
                    }
                }
                for (name, schema) in &object.properties {
                    if let Some(field) = map.get(name) {
                        schema.validate_at(field, &format!("{path}.{name}"))?;
                    }
                }
                Ok(())
            }
        }
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("type".to_string(), json!(self.type_name()));
        if let Some(description) = &self.description {
            map.insert("description".to_string(), json!(description));
        }

        match &self.kind {
            SchemaKind::Object(object) => {
                let mut properties = Map::new();
                for (name, schema) in &object.properties {
                    properties.insert(name.clone(), schema.to_json());
                }
                map.insert("properties".to_string(), Value::Object(properties));
                map.insert("required".to_string(), json!(object.required));
            }
            SchemaKind::Array(items) => {
                map.insert("items".to_string(), items.to_json());
            }
            _ => {}
        }

        Value::Object(map)
    }

    fn type_name(&self) -> &'static str {
        match &self.kind {
            SchemaKind::String => "string",
            SchemaKind::Integer => "integer",
            SchemaKind::Number => "number",
            SchemaKind::Boolean => "boolean",
            SchemaKind::Object(_) => "object",
            SchemaKind::Array(_) => "array",
        }
    }
}

fn expect(ok: bool, path: &str, expected: &'static str) -> Result<(), SchemaError> {
    if ok {
        Ok(())
    } else {
        Err(wrong_type(path, expected))
    }
}

fn wrong_type(path: &str, expected: &'static str) -> SchemaError {
    SchemaError::WrongType {
        path: path.to_string(),
        expected,
    }
}
