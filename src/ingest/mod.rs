//! Ingestion: turning uploaded bytes into embedded, indexed chunks with an
//! observable per-document status.

pub mod chunker;
pub mod pipeline;

pub use pipeline::IngestionPipeline;
