//! Request schema: the fixed whitelist of input columns and the per-field
//! value checks run before anything touches the pipeline.

use crate::errors::{ModelError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// The nine input fields the fitted pipeline was trained on.
pub const REQUIRED_COLUMNS: [&str; 9] = [
    "age", "sex", "cp", "trestbps", "fbs", "restecg", "oldpeak", "ca", "thal",
];

const VALID_SEX: [i64; 2] = [0, 1];
const VALID_CA: [i64; 4] = [0, 1, 2, 3];

/// A single failed schema check. Display renders the exact message returned
/// to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaViolation {
    MissingColumns(Vec<String>),
    ExtraColumns(Vec<String>),
    InvalidCategory {
        column: &'static str,
        value: Value,
        allowed: &'static [i64],
    },
    OutOfRange {
        column: &'static str,
        value: Value,
        constraint: &'static str,
    },
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaViolation::MissingColumns(columns) => {
                write!(f, "Missing columns: {{{}}}", columns.join(", "))
            }
            SchemaViolation::ExtraColumns(columns) => {
                write!(f, "Unrecognized columns provided: {{{}}}", columns.join(", "))
            }
            SchemaViolation::InvalidCategory {
                column,
                value,
                allowed,
            } => {
                let allowed: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
                write!(
                    f,
                    "Invalid value provided for {column}: {value}. Allowed values are: [{}]",
                    allowed.join(", ")
                )
            }
            SchemaViolation::OutOfRange {
                column,
                value,
                constraint,
            } => {
                write!(f, "Invalid value provided for {column}: {value}. {constraint}")
            }
        }
    }
}

impl std::error::Error for SchemaViolation {}

/// Run the ordered check chain over the `data` mapping of a predict request.
/// The first failing check wins; later checks never run.
pub fn validate_observation(data: &Map<String, Value>) -> std::result::Result<(), SchemaViolation> {
    let required: BTreeSet<&str> = REQUIRED_COLUMNS.iter().copied().collect();
    let actual: BTreeSet<&str> = data.keys().map(String::as_str).collect();

    let missing: Vec<String> = required
        .difference(&actual)
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(SchemaViolation::MissingColumns(missing));
    }

    let extra: Vec<String> = actual
        .difference(&required)
        .map(|c| c.to_string())
        .collect();
    if !extra.is_empty() {
        return Err(SchemaViolation::ExtraColumns(extra));
    }

    check_category(data, "sex", &VALID_SEX)?;
    check_category(data, "ca", &VALID_CA)?;
    check_range(data, "age", 0.0, 150.0, "Needs to be in [0, 150).")?;
    check_range(data, "trestbps", 50.0, 300.0, "Needs to be in [50, 300)")?;
    check_upper_bound(data, "oldpeak", 10.0, "Needs to be smaller than 10")?;

    Ok(())
}

fn check_category(
    data: &Map<String, Value>,
    column: &'static str,
    allowed: &'static [i64],
) -> std::result::Result<(), SchemaViolation> {
    let value = data.get(column).unwrap_or(&Value::Null);
    // Numeric equality on purpose: 1.0 counts as 1, anything non-numeric fails.
    let ok = value
        .as_f64()
        .map(|v| allowed.iter().any(|a| (*a as f64) == v))
        .unwrap_or(false);
    if ok {
        Ok(())
    } else {
        Err(SchemaViolation::InvalidCategory {
            column,
            value: value.clone(),
            allowed,
        })
    }
}

fn check_range(
    data: &Map<String, Value>,
    column: &'static str,
    lower: f64,
    upper: f64,
    constraint: &'static str,
) -> std::result::Result<(), SchemaViolation> {
    let value = data.get(column).unwrap_or(&Value::Null);
    let ok = value
        .as_f64()
        .map(|v| lower <= v && v < upper)
        .unwrap_or(false);
    if ok {
        Ok(())
    } else {
        Err(SchemaViolation::OutOfRange {
            column,
            value: value.clone(),
            constraint,
        })
    }
}

fn check_upper_bound(
    data: &Map<String, Value>,
    column: &'static str,
    upper: f64,
    constraint: &'static str,
) -> std::result::Result<(), SchemaViolation> {
    let value = data.get(column).unwrap_or(&Value::Null);
    let ok = value.as_f64().map(|v| v < upper).unwrap_or(false);
    if ok {
        Ok(())
    } else {
        Err(SchemaViolation::OutOfRange {
            column,
            value: value.clone(),
            constraint,
        })
    }
}

/// Declared type of one input column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    #[serde(rename = "int64")]
    Int64,
    #[serde(rename = "float64")]
    Float64,
}

/// Column order and per-column types as loaded from the columns/dtypes
/// artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub columns: Vec<String>,
    pub dtypes: HashMap<String, ColumnType>,
}

impl ColumnSchema {
    /// Check the loaded schema against the fixed whitelist.
    pub fn validate(&self) -> Result<()> {
        let declared: BTreeSet<&str> = self.columns.iter().map(String::as_str).collect();
        let required: BTreeSet<&str> = REQUIRED_COLUMNS.iter().copied().collect();
        if declared != required {
            return Err(ModelError::Artifact(format!(
                "columns artifact does not match the expected column set: {:?}",
                self.columns
            )));
        }
        if self.columns.len() != REQUIRED_COLUMNS.len() {
            return Err(ModelError::Artifact(
                "columns artifact contains duplicates".to_string(),
            ));
        }
        for column in &self.columns {
            if !self.dtypes.contains_key(column) {
                return Err(ModelError::Artifact(format!(
                    "dtypes artifact is missing column {column}"
                )));
            }
        }
        Ok(())
    }

    pub fn dtype(&self, column: &str) -> Option<ColumnType> {
        self.dtypes.get(column).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_data() -> Map<String, Value> {
        json!({
            "age": 63, "sex": 1, "cp": 3, "trestbps": 145, "fbs": 1,
            "restecg": 0, "oldpeak": 2.3, "ca": 0, "thal": 1
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn accepts_valid_observation() {
        assert!(validate_observation(&valid_data()).is_ok());
    }

    #[test]
    fn reports_missing_columns_sorted() {
        let mut data = valid_data();
        data.remove("age");
        data.remove("thal");
        let err = validate_observation(&data).unwrap_err();
        assert_eq!(err.to_string(), "Missing columns: {age, thal}");
    }

    #[test]
    fn reports_extra_columns() {
        let mut data = valid_data();
        data.insert("chol".to_string(), json!(233));
        let err = validate_observation(&data).unwrap_err();
        assert_eq!(err.to_string(), "Unrecognized columns provided: {chol}");
    }

    #[test]
    fn missing_columns_win_over_extras() {
        let mut data = valid_data();
        data.remove("sex");
        data.insert("chol".to_string(), json!(233));
        let err = validate_observation(&data).unwrap_err();
        assert!(matches!(err, SchemaViolation::MissingColumns(_)));
    }

    #[test]
    fn rejects_sex_outside_binary_set() {
        let mut data = valid_data();
        data.insert("sex".to_string(), json!(5));
        let err = validate_observation(&data).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value provided for sex: 5. Allowed values are: [0, 1]"
        );
    }

    #[test]
    fn accepts_float_encoded_category() {
        let mut data = valid_data();
        data.insert("sex".to_string(), json!(1.0));
        assert!(validate_observation(&data).is_ok());
    }

    #[test]
    fn rejects_non_numeric_category() {
        let mut data = valid_data();
        data.insert("ca".to_string(), json!("two"));
        let err = validate_observation(&data).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value provided for ca: \"two\". Allowed values are: [0, 1, 2, 3]"
        );
    }

    #[test]
    fn rejects_age_out_of_range() {
        let mut data = valid_data();
        data.insert("age".to_string(), json!(150));
        let err = validate_observation(&data).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value provided for age: 150. Needs to be in [0, 150)."
        );
    }

    #[test]
    fn rejects_trestbps_below_lower_bound() {
        let mut data = valid_data();
        data.insert("trestbps".to_string(), json!(20));
        let err = validate_observation(&data).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value provided for trestbps: 20. Needs to be in [50, 300)"
        );
    }

    #[test]
    fn rejects_oldpeak_at_ten_or_above() {
        let mut data = valid_data();
        data.insert("oldpeak".to_string(), json!(10));
        let err = validate_observation(&data).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value provided for oldpeak: 10. Needs to be smaller than 10"
        );
    }

    #[test]
    fn category_checks_run_before_range_checks() {
        let mut data = valid_data();
        data.insert("sex".to_string(), json!(9));
        data.insert("age".to_string(), json!(500));
        let err = validate_observation(&data).unwrap_err();
        assert!(matches!(err, SchemaViolation::InvalidCategory { column: "sex", .. }));
    }

    #[test]
    fn column_schema_rejects_unknown_columns() {
        let schema = ColumnSchema {
            columns: vec!["age".to_string(), "chol".to_string()],
            dtypes: HashMap::new(),
        };
        assert!(schema.validate().is_err());
    }
}
