//! Core types for the searchsim workspace.
//!
//! This crate holds everything the engine, pipeline, and service crates share:
//! - The error taxonomy ([`SimulatorError`]) with HTTP status and internal
//!   code mapping
//! - The index schema model ([`schema`]) and its validation rules
//! - The order-preserving document model ([`document`])
//! - Geography points and haversine distance ([`geo`])
//! - Scoring profile definitions ([`scoring`])
//! - Indexer, data source, and skillset definitions plus execution status
//!   records ([`indexer`])
//! - Environment-driven configuration ([`config`])

pub mod config;
pub mod document;
pub mod error;
pub mod geo;
pub mod indexer;
pub mod schema;
pub mod scoring;

pub use config::SimulatorConfig;
pub use document::Document;
pub use error::{SimulatorError, SimulatorResult};
pub use schema::{Field, FieldType, IndexSchema};
