use cardio_types::{ObservationId, PredictionRecord};
use parking_lot::RwLock;
use sled::{Db, Tree};
use std::collections::BTreeMap;
use std::path::Path;

/// Storage errors
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Insert hit an existing observation_id. Display matches the wire error
    /// text minus the "ERROR: " prefix the predict response carries.
    #[error("Observation ID: '{0}' already exists")]
    DuplicateObservation(ObservationId),
    /// Update referenced an unknown observation_id.
    #[error("Observation ID: \"{0}\" does not exist")]
    ObservationNotFound(ObservationId),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Abstract prediction store: one record per observation_id, insert-once,
/// true_class updatable afterwards.
pub trait PredictionStore: Send + Sync {
    /// Persist a new record. Fails with `DuplicateObservation` if a record
    /// with the same observation_id already exists; the existing record is
    /// left untouched.
    fn insert(&self, record: PredictionRecord) -> Result<()>;

    /// Set true_class on an existing record and return the updated record.
    /// Fails with `ObservationNotFound` if the id is unknown; nothing is
    /// created in that case.
    fn update_true_class(&self, id: &ObservationId, true_class: i64) -> Result<PredictionRecord>;

    fn get(&self, id: &ObservationId) -> Result<Option<PredictionRecord>>;

    /// Every stored record, in storage-key order.
    fn list(&self) -> Result<Vec<PredictionRecord>>;

    fn count(&self) -> Result<u64>;

    fn flush(&self) -> Result<()>;
}

/// Sled-backed implementation
pub struct SledPredictionStore {
    db: Db,
    predictions: Tree,
}

impl SledPredictionStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(&path)?;
        let predictions = db.open_tree("predictions")?;
        tracing::info!(
            records = predictions.len(),
            "opened prediction store at {}",
            path.as_ref().display()
        );
        Ok(Self { db, predictions })
    }
}

impl PredictionStore for SledPredictionStore {
    fn insert(&self, record: PredictionRecord) -> Result<()> {
        let key = record.observation_id.storage_key();
        let data = serde_json::to_vec(&record)?;
        self.predictions
            .compare_and_swap(&key, None as Option<&[u8]>, Some(data))?
            .map_err(|_| StorageError::DuplicateObservation(record.observation_id.clone()))?;
        Ok(())
    }

    fn update_true_class(&self, id: &ObservationId, true_class: i64) -> Result<PredictionRecord> {
        let key = id.storage_key();
        let existing = self
            .predictions
            .get(&key)?
            .ok_or_else(|| StorageError::ObservationNotFound(id.clone()))?;
        let mut record: PredictionRecord = serde_json::from_slice(&existing)?;
        record.true_class = Some(true_class);
        self.predictions.insert(&key, serde_json::to_vec(&record)?)?;
        Ok(record)
    }

    fn get(&self, id: &ObservationId) -> Result<Option<PredictionRecord>> {
        self.predictions
            .get(id.storage_key())?
            .map(|v| serde_json::from_slice(&v))
            .transpose()
            .map_err(Into::into)
    }

    fn list(&self) -> Result<Vec<PredictionRecord>> {
        let mut records = Vec::new();
        for item in self.predictions.iter() {
            let (_, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }

    fn count(&self) -> Result<u64> {
        Ok(self.predictions.len() as u64)
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// In-memory testing backend
#[derive(Default)]
pub struct MemoryPredictionStore {
    records: RwLock<BTreeMap<Vec<u8>, PredictionRecord>>,
}

impl MemoryPredictionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PredictionStore for MemoryPredictionStore {
    fn insert(&self, record: PredictionRecord) -> Result<()> {
        let key = record.observation_id.storage_key();
        let mut records = self.records.write();
        if records.contains_key(&key) {
            return Err(StorageError::DuplicateObservation(
                record.observation_id.clone(),
            ));
        }
        records.insert(key, record);
        Ok(())
    }

    fn update_true_class(&self, id: &ObservationId, true_class: i64) -> Result<PredictionRecord> {
        let key = id.storage_key();
        let mut records = self.records.write();
        let record = records
            .get_mut(&key)
            .ok_or_else(|| StorageError::ObservationNotFound(id.clone()))?;
        record.true_class = Some(true_class);
        Ok(record.clone())
    }

    fn get(&self, id: &ObservationId) -> Result<Option<PredictionRecord>> {
        Ok(self.records.read().get(&id.storage_key()).cloned())
    }

    fn list(&self) -> Result<Vec<PredictionRecord>> {
        Ok(self.records.read().values().cloned().collect())
    }

    fn count(&self) -> Result<u64> {
        Ok(self.records.read().len() as u64)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record(id: ObservationId, proba: f64) -> PredictionRecord {
        let observation = json!({"age": 63, "sex": 1, "oldpeak": 2.3})
            .as_object()
            .unwrap()
            .clone();
        PredictionRecord::new(id, observation, proba)
    }

    fn run_store_suite(store: &dyn PredictionStore) {
        // insert + get round trip
        store.insert(sample_record(1.into(), 0.7)).unwrap();
        let fetched = store.get(&1.into()).unwrap().unwrap();
        assert_eq!(fetched.proba, 0.7);
        assert_eq!(fetched.true_class, None);

        // duplicate insert rejected, original untouched
        let err = store.insert(sample_record(1.into(), 0.9)).unwrap_err();
        assert_eq!(err.to_string(), "Observation ID: '1' already exists");
        assert_eq!(store.get(&1.into()).unwrap().unwrap().proba, 0.7);
        assert_eq!(store.count().unwrap(), 1);

        // integer and string ids are distinct keys
        store.insert(sample_record("1".into(), 0.2)).unwrap();
        assert_eq!(store.count().unwrap(), 2);

        // update sets true_class and returns the full record
        let updated = store.update_true_class(&1.into(), 1).unwrap();
        assert_eq!(updated.true_class, Some(1));
        assert_eq!(updated.proba, 0.7);
        assert_eq!(store.get(&1.into()).unwrap().unwrap().true_class, Some(1));

        // update of an unknown id creates nothing
        let err = store.update_true_class(&99.into(), 0).unwrap_err();
        assert_eq!(err.to_string(), "Observation ID: \"99\" does not exist");
        assert!(store.get(&99.into()).unwrap().is_none());
        assert_eq!(store.count().unwrap(), 2);

        // list returns every record
        let all = store.list().unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn memory_store_behavior() {
        let store = MemoryPredictionStore::new();
        run_store_suite(&store);
    }

    #[test]
    fn sled_store_behavior() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledPredictionStore::new(dir.path().join("db")).unwrap();
        run_store_suite(&store);
        store.flush().unwrap();
    }

    #[test]
    fn sled_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let store = SledPredictionStore::new(&path).unwrap();
            store.insert(sample_record(5.into(), 0.42)).unwrap();
            store.flush().unwrap();
        }
        let store = SledPredictionStore::new(&path).unwrap();
        let record = store.get(&5.into()).unwrap().unwrap();
        assert_eq!(record.proba, 0.42);
    }

    #[test]
    fn repeated_update_overwrites_true_class() {
        let store = MemoryPredictionStore::new();
        store.insert(sample_record(3.into(), 0.5)).unwrap();
        store.update_true_class(&3.into(), 0).unwrap();
        let updated = store.update_true_class(&3.into(), 1).unwrap();
        assert_eq!(updated.true_class, Some(1));
    }
}
