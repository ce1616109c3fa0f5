//! Dense vector storage and the distance kernels used across the
//! similarity engine and query normalizer.

pub mod distance;
pub mod vector_store;

pub use distance::Kernels;
pub use vector_store::{Vector, VectorStore};
