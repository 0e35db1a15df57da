//! The long-lived in-memory series store.
//!
//! # Design
//!
//! A [`Block`] folds completed batches into per-identity time series. Series
//! are bucketed by the hash of their metric *name* only, which is coarser
//! than a series identity, so a bucket holds every label set of a name (and
//! of any name whose hash collides with it). Buckets are scanned linearly
//! and each candidate is confirmed by full identity comparison.
//!
//! Buckets only ever grow. There is no eviction or deletion.
//!
//! # Thread Safety
//!
//! A `Block` is shared across ingest threads behind an `Arc`. Ingests take a
//! store-wide write lock; lookups take the read lock and may run together.
//!
//! # Example
//!
//! ```rust
//! use cadenza::block::Block;
//! use cadenza::labels::LabelSet;
//! use cadenza::reader::{LineReader, Reader};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let block = Block::new();
//! let reader = LineReader::new();
//!
//! block.ingest(reader.read(b"1\n# TYPE up gauge\nup{} 1\n")?);
//! block.ingest(reader.read(b"2\n# TYPE up gauge\nup{} 0\n")?);
//!
//! let series = block.lookup("up", &LabelSet::new())?;
//! assert_eq!(series.points().len(), 2);
//! # Ok(())
//! # }
//! ```

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use fnv::FnvHashMap;
use serde::Serialize;

use crate::error::{LookupError, Result};
use crate::fingerprint::hash_name;
use crate::group::MetricFamiliesTimeGroup;
use crate::labels::LabelSet;
use crate::metric::MetricFamilyTimeSeries;

type Buckets = FnvHashMap<u64, Vec<MetricFamilyTimeSeries>>;

/// Process-lifetime store of time series keyed by metric name hash.
#[derive(Debug, Default)]
pub struct Block {
    buckets: RwLock<Buckets>,
}

/// What a single [`Block::ingest`] call changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Families in the ingested batch.
    pub families: usize,
    /// Points appended across all series.
    pub points: usize,
    /// Series that did not exist before this batch.
    pub created_series: usize,
}

/// Size of the block at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BlockStats {
    /// Number of name-hash buckets.
    pub buckets: usize,
    /// Number of distinct series.
    pub series: usize,
    /// Number of points across all series.
    pub points: usize,
}

impl Block {
    /// Creates an empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a completed batch into the block.
    ///
    /// Every point is appended to the series with its identity, creating the
    /// series if it is new. The batch's definition of a family replaces the
    /// definition stored on each series it touches; definitions are never
    /// merged across batches.
    pub fn ingest(&self, group: MetricFamiliesTimeGroup) -> IngestSummary {
        let timestamp = group.timestamp();
        let mut summary = IngestSummary::default();
        let mut buckets = self.write();

        for family in group.into_families() {
            summary.families += 1;
            let (definition, points) = family.into_parts();
            if points.is_empty() {
                continue;
            }
            let bucket = buckets.entry(hash_name(&definition.name)).or_default();

            for point in points {
                summary.points += 1;
                match bucket.iter_mut().find(|series| series.matches_point(&point)) {
                    Some(series) => series.append(&definition, point),
                    None => {
                        tracing::trace!(
                            name = %definition.name,
                            labels = %point.labels(),
                            "created series"
                        );
                        bucket.push(MetricFamilyTimeSeries::new(definition.clone(), point));
                        summary.created_series += 1;
                    }
                }
            }
        }

        tracing::debug!(
            timestamp,
            families = summary.families,
            points = summary.points,
            created_series = summary.created_series,
            "ingested batch"
        );

        summary
    }

    /// Returns a snapshot of the series with identity `(name, labels)`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::TimeSeriesNotFound`] if no point with this
    /// identity has been ingested.
    pub fn lookup(&self, name: &str, labels: &LabelSet) -> Result<MetricFamilyTimeSeries> {
        self.read()
            .get(&hash_name(name))
            .and_then(|bucket| bucket.iter().find(|series| series.has_identity(name, labels)))
            .cloned()
            .ok_or_else(|| {
                LookupError::TimeSeriesNotFound {
                    name: name.to_string(),
                    labels: labels.clone(),
                }
                .into()
            })
    }

    /// Returns snapshots of every series stored under `name`, in creation order.
    pub fn series_for(&self, name: &str) -> Vec<MetricFamilyTimeSeries> {
        self.read()
            .get(&hash_name(name))
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|series| series.name() == name)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Counts buckets, series and points.
    pub fn stats(&self) -> BlockStats {
        let buckets = self.read();
        BlockStats {
            buckets: buckets.len(),
            series: buckets.values().map(Vec::len).sum(),
            points: buckets
                .values()
                .flatten()
                .map(|series| series.points().len())
                .sum(),
        }
    }

    // A panic while holding the lock can only leave a partially appended
    // batch behind, which is already an accepted outcome, so poisoning is
    // ignored.
    fn read(&self) -> RwLockReadGuard<'_, Buckets> {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Buckets> {
        self.buckets.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CadenzaError;
    use crate::metric::{MetricDefinition, MetricPoint, MetricType};
    use crate::reader::parse_selector;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs.iter().copied().collect()
    }

    /// Builds a batch from `(selector, value)` samples, declaring each family.
    fn batch(timestamp: i64, samples: &[(&str, f64)]) -> MetricFamiliesTimeGroup {
        let mut group = MetricFamiliesTimeGroup::with_timestamp(timestamp);
        for (selector, value) in samples {
            let (name, labels) = parse_selector(selector).unwrap();
            group.upsert_family(MetricDefinition::new(name.as_str()).with_type(MetricType::Gauge));
            group
                .insert_point(MetricPoint::new(name, labels, *value, timestamp))
                .unwrap();
        }
        group
    }

    #[test]
    fn test_ingest_creates_series() {
        let block = Block::new();
        let summary = block.ingest(batch(
            1,
            &[
                (r#"http_requests_total{code="200"}"#, 10.0),
                (r#"http_requests_total{code="500"}"#, 1.0),
                ("up", 1.0),
            ],
        ));

        assert_eq!(
            summary,
            IngestSummary {
                families: 2,
                points: 3,
                created_series: 3,
            }
        );
        assert_eq!(
            block.stats(),
            BlockStats {
                buckets: 2,
                series: 3,
                points: 3,
            }
        );
    }

    #[test]
    fn test_repeated_identity_across_batches_appends() {
        let block = Block::new();
        block.ingest(batch(1, &[(r#"up{job="api"}"#, 1.0)]));
        let summary = block.ingest(batch(2, &[(r#"up{job="api"}"#, 0.0)]));
        assert_eq!(summary.created_series, 0);

        let series = block.lookup("up", &labels(&[("job", "api")])).unwrap();
        let timestamps: Vec<_> = series.points().iter().map(MetricPoint::timestamp).collect();
        let values: Vec<_> = series.points().iter().map(MetricPoint::value).collect();
        assert_eq!(timestamps, vec![1, 2]);
        assert_eq!(values, vec![1.0, 0.0]);
        assert_eq!(block.stats().series, 1);
    }

    #[test]
    fn test_lookup_not_found() {
        let block = Block::new();
        block.ingest(batch(1, &[(r#"up{job="api"}"#, 1.0)]));

        for selector in [r#"up{job="db"}"#, r#"down{job="api"}"#, "up"] {
            let (name, labels) = parse_selector(selector).unwrap();
            let err = block.lookup(&name, &labels).unwrap_err();
            assert!(matches!(
                err,
                CadenzaError::Lookup(LookupError::TimeSeriesNotFound { .. })
            ));
        }
    }

    #[test]
    fn test_definition_follows_latest_batch() {
        let block = Block::new();
        let mut first = MetricFamiliesTimeGroup::with_timestamp(1);
        first.upsert_family(MetricDefinition::new("up").with_help("old"));
        first
            .insert_point(MetricPoint::new("up", LabelSet::new(), 1.0, 1))
            .unwrap();
        block.ingest(first);

        let mut second = MetricFamiliesTimeGroup::with_timestamp(2);
        second.upsert_family(MetricDefinition::new("up").with_type(MetricType::Gauge));
        second
            .insert_point(MetricPoint::new("up", LabelSet::new(), 1.0, 2))
            .unwrap();
        block.ingest(second);

        let series = block.lookup("up", &LabelSet::new()).unwrap();
        assert_eq!(
            series.definition(),
            &MetricDefinition::new("up").with_type(MetricType::Gauge)
        );
    }

    #[test]
    fn test_bucket_shared_with_another_name() {
        let block = Block::new();
        // Plant a `down` series in the `up` bucket, as a name-hash collision would.
        let stray = MetricPoint::new("down", LabelSet::new(), 7.0, 1);
        block
            .write()
            .entry(hash_name("up"))
            .or_default()
            .push(MetricFamilyTimeSeries::new(MetricDefinition::new("down"), stray));

        let summary = block.ingest(batch(2, &[("up", 1.0)]));
        assert_eq!(summary.created_series, 1);
        assert_eq!(
            block.stats(),
            BlockStats {
                buckets: 1,
                series: 2,
                points: 2,
            }
        );

        let up = block.lookup("up", &LabelSet::new()).unwrap();
        assert_eq!(up.name(), "up");
        let values: Vec<_> = up.points().iter().map(MetricPoint::value).collect();
        assert_eq!(values, vec![1.0]);

        let under_up = block.series_for("up");
        assert_eq!(under_up.len(), 1);
        assert_eq!(under_up[0].name(), "up");

        // The stray series lives under `up`'s hash, never under its own.
        assert!(matches!(
            block.lookup("down", &LabelSet::new()),
            Err(CadenzaError::Lookup(LookupError::TimeSeriesNotFound { .. }))
        ));
        assert!(block.series_for("down").is_empty());
    }

    #[test]
    fn test_series_for_filters_by_name() {
        let block = Block::new();
        block.ingest(batch(
            1,
            &[
                (r#"up{job="api"}"#, 1.0),
                (r#"up{job="db"}"#, 1.0),
                ("load", 0.5),
            ],
        ));

        let series = block.series_for("up");
        assert_eq!(series.len(), 2);
        assert!(series.iter().all(|s| s.name() == "up"));
        assert!(block.series_for("missing").is_empty());
    }

    #[test]
    fn test_metadata_only_family_stores_nothing() {
        let block = Block::new();
        let mut group = MetricFamiliesTimeGroup::new();
        group.upsert_family(MetricDefinition::new("up").with_type(MetricType::Gauge));

        let summary = block.ingest(group);
        assert_eq!(summary.families, 1);
        assert_eq!(summary.points, 0);
        assert_eq!(block.stats(), BlockStats::default());
    }

    #[test]
    fn test_concurrent_ingest_and_lookup() {
        use std::sync::Arc;
        use std::thread;

        let block = Arc::new(Block::new());
        let writers: Vec<_> = (0..4)
            .map(|worker| {
                let block = Arc::clone(&block);
                thread::spawn(move || {
                    for ts in 0..50 {
                        let selector = format!("up{{job=\"w{worker}\"}}");
                        block.ingest(batch(ts, &[(selector.as_str(), 1.0)]));
                        let _ = block.stats();
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(
            block.stats(),
            BlockStats {
                buckets: 1,
                series: 4,
                points: 200,
            }
        );
        for worker in 0..4 {
            let job = format!("w{worker}");
            let series = block.lookup("up", &labels(&[("job", job.as_str())])).unwrap();
            assert_eq!(series.points().len(), 50);
        }
    }
}
