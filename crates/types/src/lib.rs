pub mod observation;
pub mod record;

pub use observation::ObservationId;
pub use record::PredictionRecord;
