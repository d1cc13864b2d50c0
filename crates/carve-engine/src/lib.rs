//! The carve ingest pipeline.
//!
//! Wires the ring buffer, chunker, collector, node encoder, block maker,
//! dedup set and CAR writer into one coordinated run:
//!
//! ```no_run
//! use carve_engine::{Emitters, Pipeline, PipelineConfig};
//!
//! # async fn run() -> Result<(), carve_engine::IngestError> {
//! let mut pipeline = Pipeline::new(PipelineConfig::default(), Emitters::default())?;
//! pipeline.process_reader(tokio::io::stdin(), None).await?;
//! pipeline.output_summary()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod pipeline;
mod stats;

pub use config::{Emitters, PipelineConfig};
pub use error::IngestError;
pub use pipeline::{IngestionEvent, Pipeline};
pub use stats::{
    DagStats, DedupTotals, NoopProbe, PlatformProbe, ResourceUsage, RootStats, StatSummary,
    SysStats,
};
