//! Self-describing record model.
//!
//! Values served by the compute path are structured records with named,
//! typed, optionally nullable fields. A [`RecordSchema`] describes the
//! layout; a [`Record`] holds one value per field, positionally. Result
//! schemas arrive from routers as JSON strings and are parsed into the same
//! model.

use crate::core::error::{StrataError, StrataResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Field value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Long,
    Double,
    Str,
    Bytes,
    FloatVector,
    StringMap,
}

/// One field of a record schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name, unique within the schema.
    pub name: String,
    /// Field value type.
    #[serde(rename = "type")]
    pub ty: FieldType,
    /// Whether the field may hold null.
    #[serde(default)]
    pub nullable: bool,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
        }
    }

    pub fn nullable(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
        }
    }
}

/// A record schema: an ordered list of named fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordSchema {
    /// Schema name.
    pub name: String,
    /// Ordered fields.
    pub fields: Vec<FieldSchema>,
}

impl RecordSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Parse a schema from its JSON string form.
    pub fn parse(input: &str) -> StrataResult<Self> {
        serde_json::from_str(input).map_err(|e| StrataError::ComputeSchema {
            reason: format!("unparseable schema: {e}"),
        })
    }

    /// Render the schema to its JSON string form.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("schema serialization is infallible")
    }

    /// Position of a field by name.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Field schema by name.
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Long(i64),
    Double(f64),
    Str(String),
    Bytes(Vec<u8>),
    FloatVector(Vec<f32>),
    StringMap(BTreeMap<String, String>),
}

impl Value {
    /// Whether this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value conforms to the given field type.
    pub fn conforms_to(&self, ty: FieldType) -> bool {
        matches!(
            (self, ty),
            (Value::Null, _)
                | (Value::Long(_), FieldType::Long)
                | (Value::Double(_), FieldType::Double)
                | (Value::Str(_), FieldType::Str)
                | (Value::Bytes(_), FieldType::Bytes)
                | (Value::FloatVector(_), FieldType::FloatVector)
                | (Value::StringMap(_), FieldType::StringMap)
        )
    }
}

/// A record: one value per schema field, positionally aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: Arc<RecordSchema>,
    values: Vec<Value>,
}

impl Record {
    /// Create a record with all fields null.
    pub fn new(schema: Arc<RecordSchema>) -> Self {
        let values = vec![Value::Null; schema.fields.len()];
        Self { schema, values }
    }

    /// The record's schema.
    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    /// Get a field value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema.position(name).map(|pos| &self.values[pos])
    }

    /// Get a field value by position.
    pub fn get_at(&self, pos: usize) -> &Value {
        &self.values[pos]
    }

    /// Set a field value by name. Returns an error for unknown fields or
    /// values that do not conform to the field's type.
    pub fn set(&mut self, name: &str, value: Value) -> StrataResult<()> {
        let pos = self
            .schema
            .position(name)
            .ok_or_else(|| StrataError::ComputeSchema {
                reason: format!("unknown field: {name}"),
            })?;
        self.set_at(pos, value)
    }

    /// Set a field value by position.
    pub fn set_at(&mut self, pos: usize, value: Value) -> StrataResult<()> {
        let field = &self.schema.fields[pos];
        if !value.conforms_to(field.ty) {
            return Err(StrataError::ComputeSchema {
                reason: format!("value does not conform to field {}", field.name),
            });
        }
        self.values[pos] = value;
        Ok(())
    }

    /// Reset all fields to null. Called before a record instance is reused.
    pub fn clear(&mut self) {
        for value in &mut self.values {
            *value = Value::Null;
        }
    }

    /// Positionally aligned field values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Replace the full value vector. Lengths must match the schema.
    pub(crate) fn replace_values(&mut self, values: Vec<Value>) -> StrataResult<()> {
        if values.len() != self.schema.fields.len() {
            return Err(StrataError::internal(format!(
                "value count {} does not match schema {} ({} fields)",
                values.len(),
                self.schema.name,
                self.schema.fields.len()
            )));
        }
        self.values = values;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_schema() -> Arc<RecordSchema> {
        Arc::new(RecordSchema::new(
            "profile",
            vec![
                FieldSchema::new("id", FieldType::Long),
                FieldSchema::new("embedding", FieldType::FloatVector),
                FieldSchema::nullable("nickname", FieldType::Str),
            ],
        ))
    }

    #[test]
    fn test_schema_json_round_trip() {
        let schema = profile_schema();
        let json = schema.to_json();
        let parsed = RecordSchema::parse(&json).unwrap();
        assert_eq!(*schema, parsed);
    }

    #[test]
    fn test_record_set_get_clear() {
        let mut record = Record::new(profile_schema());
        record.set("id", Value::Long(7)).unwrap();
        record
            .set("embedding", Value::FloatVector(vec![1.0, 2.0]))
            .unwrap();
        assert_eq!(record.get("id"), Some(&Value::Long(7)));
        assert!(record.get("nickname").unwrap().is_null());
        assert!(record.get("missing").is_none());

        record.clear();
        assert!(record.get("id").unwrap().is_null());
    }

    #[test]
    fn test_type_conformance() {
        let mut record = Record::new(profile_schema());
        assert!(record.set("id", Value::Str("oops".into())).is_err());
        assert!(record.set("nickname", Value::Null).is_ok());
        assert!(record.set("unknown", Value::Long(1)).is_err());
    }
}
