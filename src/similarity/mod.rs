//! Search modes layered over the event and vector subsystems.

pub mod engine;

pub use engine::{SimilarityEngine, SimilarityResult};
