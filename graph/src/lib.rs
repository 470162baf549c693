pub mod inference;
pub mod relationships;

pub use inference::{InferenceError, InferenceReport, SimilarityInferenceEngine, SimilarityScore};
pub use relationships::{RelationshipEngine, RelationshipError};
