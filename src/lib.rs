//! # Fanline
//!
//! A sharded, batching, backpressured export pipeline for time-series
//! samples.
//!
//! Fanline sits between an ingestion path that produces reference-encoded
//! scrape samples and a remote monitoring backend that accepts batched
//! time-series writes. It solves three intertwined problems:
//!
//! - **Sharding**: points are hashed into a fixed fan-out of bounded queues,
//!   preserving per-series ordering while producers run in parallel
//! - **Batching**: a single drainer assembles bounded batches across shards,
//!   never placing two points of one series into the same write, and bounds
//!   in-flight fan-out to one batch per shard
//! - **Series resolution**: a write-through cache materializes series
//!   descriptors exactly once per reference via a producer-supplied lookup
//!
//! ## Usage
//!
//! The host installs the label lookup, runs the drain loop, and feeds
//! samples per scrape:
//!
//! ```no_run
//! use std::sync::Arc;
//! use fanline::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> fanline::Result<()> {
//! let opts = ExporterOpts {
//!     project_id: "my-project".to_string(),
//!     ..Default::default()
//! };
//! let backend = Arc::new(GrpcBackend::connect(&opts)?);
//! let exporter = Arc::new(Exporter::new(opts, backend)?);
//! exporter.set_labels_by_ref_func(|_series_ref| LabelSet::default());
//!
//! let shutdown = CancellationToken::new();
//! let runner = Arc::clone(&exporter);
//! let token = shutdown.clone();
//! tokio::spawn(async move {
//!     let _ = runner.run(token).await;
//! });
//!
//! let target = Target::new(LabelSet::from_pairs(&[("job", "node")]));
//! exporter.export(&target, &[RefSample::new(1, 1_000, 0.5)]);
//! # Ok(())
//! # }
//! ```
//!
//! Buffering is in-memory only: points do not survive a crash or shutdown,
//! and failed writes are never retried.

pub mod backend;
pub mod cache;
pub mod config;
pub mod export;
pub mod metrics;
pub mod series;

mod builder;
mod error;
mod shard;

pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::backend::{BackendHandle, GrpcBackend, MetricBackend};
    pub use crate::config::ExporterOpts;
    pub use crate::export::{global, init_global, Exporter};
    pub use crate::series::{Label, LabelSet, RefSample, Target};
    pub use crate::{Error, Result};
}
