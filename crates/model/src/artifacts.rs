//! Loading of the fitted artifacts: column order, column types, and the
//! pipeline parameters. All three are read once at startup and immutable for
//! the process lifetime.

use crate::errors::{ModelError, Result};
use crate::pipeline::Pipeline;
use crate::schema::{ColumnSchema, ColumnType};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;

pub const COLUMNS_FILE: &str = "columns.json";
pub const DTYPES_FILE: &str = "dtypes.json";
pub const MODEL_FILE: &str = "model.json";

/// Everything the inference path needs, loaded and validated.
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    pub schema: ColumnSchema,
    pub pipeline: Pipeline,
}

impl ModelArtifacts {
    /// Read `columns.json`, `dtypes.json`, and `model.json` from `dir` and
    /// cross-check them against each other.
    pub fn load(dir: &Path) -> Result<Self> {
        let columns: Vec<String> = read_json(&dir.join(COLUMNS_FILE))?;
        let dtypes: HashMap<String, ColumnType> = read_json(&dir.join(DTYPES_FILE))?;
        let pipeline: Pipeline = read_json(&dir.join(MODEL_FILE))?;

        let schema = ColumnSchema { columns, dtypes };
        schema.validate()?;
        pipeline.validate(schema.columns.len())?;

        info!(
            columns = schema.columns.len(),
            threshold = pipeline.decision_threshold,
            "loaded model artifacts from {}",
            dir.display()
        );

        Ok(Self { schema, pipeline })
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|err| {
        ModelError::Artifact(format!("failed to read {}: {err}", path.display()))
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|err| ModelError::Artifact(format!("failed to parse {}: {err}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::REQUIRED_COLUMNS;
    use serde_json::json;
    use std::fs;

    fn write_artifacts(dir: &Path, model: serde_json::Value) {
        let columns: Vec<&str> = REQUIRED_COLUMNS.to_vec();
        let dtypes: serde_json::Value = columns
            .iter()
            .map(|c| {
                let dtype = if *c == "oldpeak" { "float64" } else { "int64" };
                (c.to_string(), json!(dtype))
            })
            .collect();
        fs::write(
            dir.join(COLUMNS_FILE),
            serde_json::to_vec(&columns).unwrap(),
        )
        .unwrap();
        fs::write(dir.join(DTYPES_FILE), serde_json::to_vec(&dtypes).unwrap()).unwrap();
        fs::write(dir.join(MODEL_FILE), serde_json::to_vec(&model).unwrap()).unwrap();
    }

    fn valid_model() -> serde_json::Value {
        json!({
            "scaler": {"mean": vec![0.0; 9], "scale": vec![1.0; 9]},
            "coefficients": vec![0.1; 9],
            "intercept": -0.2,
            "decision_threshold": 0.5
        })
    }

    #[test]
    fn loads_consistent_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(dir.path(), valid_model());
        let artifacts = ModelArtifacts::load(dir.path()).unwrap();
        assert_eq!(artifacts.schema.columns.len(), 9);
        assert_eq!(artifacts.pipeline.decision_threshold, 0.5);
    }

    #[test]
    fn rejects_missing_model_file() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(dir.path(), valid_model());
        fs::remove_file(dir.path().join(MODEL_FILE)).unwrap();
        let err = ModelArtifacts::load(dir.path()).unwrap_err();
        assert!(matches!(err, ModelError::Artifact(_)));
    }

    #[test]
    fn rejects_coefficient_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = valid_model();
        model["coefficients"] = json!([0.1, 0.2]);
        write_artifacts(dir.path(), model);
        assert!(ModelArtifacts::load(dir.path()).is_err());
    }
}
