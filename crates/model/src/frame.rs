//! Single-row feature frame: the validated observation reshaped into the
//! exact column order and types the fitted pipeline expects.

use crate::errors::{ModelError, Result};
use crate::schema::{ColumnSchema, ColumnType};
use cardio_types::ObservationId;
use serde_json::{Map, Value};

/// One observation, typed and ordered for inference.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    index: ObservationId,
    columns: Vec<String>,
    values: Vec<f64>,
}

impl FeatureFrame {
    /// Coerce `data` into the schema's column order. Fails if any value is
    /// non-numeric, non-finite, or fractional where an integer column is
    /// declared.
    pub fn build(
        schema: &ColumnSchema,
        index: ObservationId,
        data: &Map<String, Value>,
    ) -> Result<Self> {
        let mut values = Vec::with_capacity(schema.columns.len());
        for column in &schema.columns {
            let value = data.get(column).unwrap_or(&Value::Null);
            let dtype = schema.dtype(column).ok_or_else(|| {
                ModelError::Artifact(format!("no declared dtype for column {column}"))
            })?;
            values.push(coerce(column, value, dtype)?);
        }
        Ok(Self {
            index,
            columns: schema.columns.clone(),
            values,
        })
    }

    pub fn index(&self) -> &ObservationId {
        &self.index
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

fn coerce(column: &str, value: &Value, dtype: ColumnType) -> Result<f64> {
    let number = value.as_f64().filter(|v| v.is_finite());
    match (dtype, number) {
        (ColumnType::Float64, Some(v)) => Ok(v),
        (ColumnType::Int64, Some(v)) if v.fract() == 0.0 => Ok(v),
        _ => Err(ModelError::Coercion {
            column: column.to_string(),
            value: value.clone(),
            expected: dtype_name(dtype),
        }),
    }
}

fn dtype_name(dtype: ColumnType) -> &'static str {
    match dtype {
        ColumnType::Int64 => "int64",
        ColumnType::Float64 => "float64",
    }
}
