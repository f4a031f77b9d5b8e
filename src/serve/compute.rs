//! Server-side compute evaluation.
//!
//! A compute request names a value schema, a declared result schema, and an
//! ordered list of operations over value fields. The result schema is an
//! extension of the value schema: fields written by operations, fields
//! projected verbatim from the value, and a reserved error-map field that
//! collects per-field evaluation failures without failing the request.
//!
//! Result schemas are validated against the value schema and the requested
//! operations on first sight, then cached by their exact schema string.

use crate::core::error::{StrataError, StrataResult};
use crate::ops::metrics::{names, MetricsRegistry};
use crate::schema::record::{FieldType, Record, RecordSchema, Value};
use crate::serve::request::ComputeOperation;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Reserved result field that carries the per-field computation error map.
pub const COMPUTATION_ERROR_MAP_FIELD: &str = "__computationError__";

/// Validated result schemas, keyed by the interned result-schema string.
#[derive(Default)]
pub struct ResultSchemaCache {
    cache: Mutex<HashMap<String, Arc<RecordSchema>>>,
}

impl ResultSchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a result schema, or return the cached instance
    /// validated earlier for the same schema string.
    pub fn resolve(
        &self,
        result_schema_str: &str,
        value_schema: &RecordSchema,
        operations: &[ComputeOperation],
    ) -> StrataResult<Arc<RecordSchema>> {
        if let Some(cached) = self.cache.lock().get(result_schema_str) {
            return Ok(cached.clone());
        }
        let schema = Arc::new(RecordSchema::parse(result_schema_str)?);
        validate_result_schema(&schema, value_schema, operations)?;
        self.cache
            .lock()
            .insert(result_schema_str.to_string(), schema.clone());
        Ok(schema)
    }
}

/// Check a declared result schema against the value schema and operations.
pub fn validate_result_schema(
    result_schema: &RecordSchema,
    value_schema: &RecordSchema,
    operations: &[ComputeOperation],
) -> StrataResult<()> {
    for operation in operations {
        let input = value_schema.field(operation.field()).ok_or_else(|| {
            StrataError::ComputeSchema {
                reason: format!(
                    "operation input field {} does not exist in value schema {}",
                    operation.field(),
                    value_schema.name
                ),
            }
        })?;
        let expected_input = match operation {
            ComputeOperation::DotProduct { .. }
            | ComputeOperation::CosineSimilarity { .. }
            | ComputeOperation::HadamardProduct { .. } => vec![FieldType::FloatVector],
            ComputeOperation::Count { .. } => vec![FieldType::FloatVector, FieldType::StringMap],
        };
        if !expected_input.contains(&input.ty) {
            return Err(StrataError::ComputeSchema {
                reason: format!(
                    "operation input field {} has incompatible type {:?}",
                    operation.field(),
                    input.ty
                ),
            });
        }

        let result = result_schema
            .field(operation.result_field())
            .ok_or_else(|| StrataError::ComputeSchema {
                reason: format!(
                    "operation result field {} does not exist in result schema",
                    operation.result_field()
                ),
            })?;
        let expected_result = match operation {
            ComputeOperation::DotProduct { .. } | ComputeOperation::CosineSimilarity { .. } => {
                FieldType::Double
            }
            ComputeOperation::HadamardProduct { .. } => FieldType::FloatVector,
            ComputeOperation::Count { .. } => FieldType::Long,
        };
        if result.ty != expected_result {
            return Err(StrataError::ComputeSchema {
                reason: format!(
                    "operation result field {} must be {:?}, found {:?}",
                    operation.result_field(),
                    expected_result,
                    result.ty
                ),
            });
        }
    }

    // Every remaining result field is either the error map or a projection
    // of the same-named value field.
    for field in &result_schema.fields {
        if operations.iter().any(|op| op.result_field() == field.name) {
            continue;
        }
        if field.name == COMPUTATION_ERROR_MAP_FIELD {
            if field.ty != FieldType::StringMap {
                return Err(StrataError::ComputeSchema {
                    reason: format!("{COMPUTATION_ERROR_MAP_FIELD} must be a string map"),
                });
            }
            continue;
        }
        let source = value_schema.field(&field.name).ok_or_else(|| {
            StrataError::ComputeSchema {
                reason: format!(
                    "result field {} is neither computed nor present in value schema {}",
                    field.name, value_schema.name
                ),
            }
        })?;
        if source.ty != field.ty {
            return Err(StrataError::ComputeSchema {
                reason: format!(
                    "projected field {} type mismatch: value {:?}, result {:?}",
                    field.name, source.ty, field.ty
                ),
            });
        }
    }
    Ok(())
}

/// Evaluate all operations for one key into a pre-cleared result record,
/// then fill remaining result fields by projection and install the error
/// map. Per-operation counters are recorded on success.
pub fn compute_record(
    operations: &[ComputeOperation],
    value_record: &Record,
    result_record: &mut Record,
    metrics: &MetricsRegistry,
) -> StrataResult<()> {
    let mut error_map: BTreeMap<String, String> = BTreeMap::new();

    for operation in operations {
        let input = value_record.get(operation.field());
        if input.map_or(true, Value::is_null) {
            error_map.insert(
                operation.result_field().to_string(),
                format!("field {} is null", operation.field()),
            );
            result_record.set(operation.result_field(), default_result(operation))?;
            continue;
        }
        match evaluate_operation(operation, value_record) {
            Ok(result) => {
                result_record.set(operation.result_field(), result)?;
                metrics.counter_inc(operation_metric(operation));
            }
            Err(message) => {
                error_map.insert(operation.result_field().to_string(), message);
                result_record.set(operation.result_field(), default_result(operation))?;
            }
        }
    }

    let result_schema = result_record.schema().clone();
    for (position, field) in result_schema.fields.iter().enumerate() {
        if !result_record.get_at(position).is_null() {
            continue;
        }
        if field.name == COMPUTATION_ERROR_MAP_FIELD {
            let map = error_map
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            result_record.set_at(position, Value::StringMap(map))?;
        } else if let Some(value) = value_record.get(&field.name) {
            result_record.set_at(position, value.clone())?;
        }
    }
    Ok(())
}

/// Evaluate a single operation. Errors are reported into the error map.
fn evaluate_operation(operation: &ComputeOperation, value_record: &Record) -> Result<Value, String> {
    match operation {
        ComputeOperation::DotProduct { field, param, .. } => {
            let vector = float_vector(value_record, field)?;
            check_dimensions(field, vector, param)?;
            let dot: f64 = vector
                .iter()
                .zip(param.iter())
                .map(|(a, b)| f64::from(*a) * f64::from(*b))
                .sum();
            Ok(Value::Double(dot))
        }
        ComputeOperation::CosineSimilarity { field, param, .. } => {
            let vector = float_vector(value_record, field)?;
            check_dimensions(field, vector, param)?;
            let dot: f64 = vector
                .iter()
                .zip(param.iter())
                .map(|(a, b)| f64::from(*a) * f64::from(*b))
                .sum();
            let norm_a: f64 = vector.iter().map(|a| f64::from(*a).powi(2)).sum::<f64>().sqrt();
            let norm_b: f64 = param.iter().map(|b| f64::from(*b).powi(2)).sum::<f64>().sqrt();
            if norm_a == 0.0 || norm_b == 0.0 {
                return Err(format!("cosine similarity over zero vector in field {field}"));
            }
            Ok(Value::Double(dot / (norm_a * norm_b)))
        }
        ComputeOperation::HadamardProduct { field, param, .. } => {
            let vector = float_vector(value_record, field)?;
            check_dimensions(field, vector, param)?;
            let product = vector
                .iter()
                .zip(param.iter())
                .map(|(a, b)| a * b)
                .collect();
            Ok(Value::FloatVector(product))
        }
        ComputeOperation::Count { field, .. } => match value_record.get(field) {
            Some(Value::FloatVector(v)) => Ok(Value::Long(v.len() as i64)),
            Some(Value::StringMap(m)) => Ok(Value::Long(m.len() as i64)),
            _ => Err(format!("field {field} is not countable")),
        },
    }
}

fn float_vector<'a>(record: &'a Record, field: &str) -> Result<&'a [f32], String> {
    match record.get(field) {
        Some(Value::FloatVector(v)) => Ok(v),
        _ => Err(format!("field {field} is not a float vector")),
    }
}

fn check_dimensions(field: &str, vector: &[f32], param: &[f32]) -> Result<(), String> {
    if vector.len() != param.len() {
        return Err(format!(
            "field {field} has {} elements, operation parameter has {}",
            vector.len(),
            param.len()
        ));
    }
    Ok(())
}

/// Default installed for a result field whose operation could not run.
fn default_result(operation: &ComputeOperation) -> Value {
    match operation {
        ComputeOperation::DotProduct { .. } | ComputeOperation::CosineSimilarity { .. } => {
            Value::Double(0.0)
        }
        ComputeOperation::HadamardProduct { .. } => Value::FloatVector(Vec::new()),
        ComputeOperation::Count { .. } => Value::Long(0),
    }
}

fn operation_metric(operation: &ComputeOperation) -> &'static str {
    match operation {
        ComputeOperation::DotProduct { .. } => names::SERVE_OP_DOT_PRODUCT_TOTAL,
        ComputeOperation::CosineSimilarity { .. } => names::SERVE_OP_COSINE_SIMILARITY_TOTAL,
        ComputeOperation::HadamardProduct { .. } => names::SERVE_OP_HADAMARD_PRODUCT_TOTAL,
        ComputeOperation::Count { .. } => names::SERVE_OP_COUNT_TOTAL,
    }
}
