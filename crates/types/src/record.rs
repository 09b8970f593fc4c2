use crate::observation::ObservationId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One persisted prediction. `true_class` starts out null and is filled in
/// later through the update endpoint; everything else is immutable once the
/// record is written.
///
/// The serde derive is the serialization contract: responses and storage both
/// use this flat mapping (observation_id, observation, proba, true_class).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub observation_id: ObservationId,
    pub observation: Map<String, Value>,
    pub proba: f64,
    pub true_class: Option<i64>,
}

impl PredictionRecord {
    pub fn new(observation_id: ObservationId, observation: Map<String, Value>, proba: f64) -> Self {
        Self {
            observation_id,
            observation,
            proba,
            true_class: None,
        }
    }
}
