//! Enrichment pipeline and indexer orchestration.
//!
//! - [`enriched`]: the tree-shaped scratch space skills read and write
//! - [`skills`]: the closed executor set and the skillset runner
//! - [`local_embed`]: the deterministic on-device embedding model
//! - [`mappings`]: field-mapping functions (base64, url, token extraction)
//! - [`datasource`]: pull connectors and the in-memory source
//! - [`indexer`]: the batched run loop with change detection, failure
//!   budgets, and bounded execution history

pub mod datasource;
pub mod enriched;
pub mod indexer;
pub mod local_embed;
pub mod mappings;
pub mod skills;

pub use datasource::{ConnectorRegistry, DataSourceConnector, InMemoryDataSource};
pub use enriched::EnrichedDocument;
pub use indexer::{BulkOutcome, CancelFlag, IndexSink, IndexerRuntime, RunContext};
pub use local_embed::LocalEmbeddingCache;
pub use skills::{SkillExecutionContext, run_skillset};
