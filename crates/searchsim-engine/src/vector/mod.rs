//! Vector search engine: HNSW graphs with brute-force fallback, per-field
//! isolation, tombstone-based deletion, and cosine/Euclidean/dot-product
//! metrics.

pub mod hnsw;
pub mod metric;
pub mod store;

pub use hnsw::{HnswGraph, Label};
pub use store::{VectorHit, VectorStore, VectorStoreOptions};
