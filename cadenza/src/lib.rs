//! # cadenza
//!
//! Line-oriented metrics ingestion and hash-indexed in-memory time series.
//!
//! cadenza turns a raw text payload into a batch of metric families and
//! folds successive batches into time series that live for the lifetime of
//! the process. Each series is identified by its metric name plus label set,
//! indexed by a content hash, and always confirmed by full comparison so
//! that hash collisions never merge distinct series.
//!
//! ## Quick Start
//!
//! ```rust
//! use cadenza::{Block, LabelSet, LineReader, Reader};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let payload = concat!(
//!     "978595200\n",
//!     "# HELP http_requests_total The total number of HTTP requests.\n",
//!     "# TYPE http_requests_total gauge\n",
//!     "http_requests_total{method=\"post\",code=\"200\"} 1027\n",
//!     "http_requests_total{method=\"post\",code=\"422\"} 1\n",
//! );
//!
//! // One block per process, shared by every ingest call.
//! let block = Block::new();
//!
//! let group = LineReader::new().read(payload.as_bytes())?;
//! let summary = block.ingest(group);
//! assert_eq!(summary.created_series, 2);
//!
//! let labels: LabelSet = [("code", "200"), ("method", "post")].into_iter().collect();
//! let series = block.lookup("http_requests_total", &labels)?;
//! assert_eq!(series.points()[0].value(), 1027.0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`LineReader`] — Parses a payload into a [`MetricFamiliesTimeGroup`]
//! - [`MetricFamiliesTimeGroup`] — One batch; rejects undeclared families and repeated identities
//! - [`Block`] — Long-lived store; appends each batch to per-identity series
//!
//! ## Modules
//!
//! - [`reader`] — Line parser and the [`Reader`] format seam
//! - [`labels`] — Label sets and the label-block parser
//! - [`fingerprint`] — Identity and name hashes
//! - [`metric`] — Definitions, points, families, time series
//! - [`group`] — Per-batch family registry
//! - [`block`] — Series store
//! - [`error`] — Error types

pub mod block;
pub mod error;
pub mod fingerprint;
pub mod group;
pub mod labels;
pub mod metric;
pub mod reader;

// Re-export primary API types at crate root for convenience.
pub use block::{Block, BlockStats, IngestSummary};
pub use error::{CadenzaError, FamilyError, LineError, LookupError, ParseError, ReadError, Result};
pub use group::MetricFamiliesTimeGroup;
pub use labels::LabelSet;
pub use metric::{MetricDefinition, MetricFamily, MetricFamilyTimeSeries, MetricPoint, MetricType};
pub use reader::{LineReader, Reader};
