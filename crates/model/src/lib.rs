//! Schema validation, feature frame construction, and inference for the
//! heart-disease scoring pipeline. The fitted model is an external artifact
//! loaded once at startup; nothing here trains or refits anything.

pub mod artifacts;
pub mod errors;
pub mod frame;
pub mod pipeline;
pub mod schema;

pub use artifacts::ModelArtifacts;
pub use errors::ModelError;
pub use frame::FeatureFrame;
pub use pipeline::Pipeline;
pub use schema::{validate_observation, ColumnSchema, ColumnType, SchemaViolation};
