//! Metric data model: definitions, points, families and time series.
//!
//! # Overview
//!
//! - [`MetricDefinition`] - name, type and help text shared by a family
//! - [`MetricPoint`] - one sample with its cached identity fingerprint
//! - [`MetricFamily`] - the points of one family within a single batch
//! - [`MetricFamilyTimeSeries`] - all points of one identity across batches
//!
//! A point's identity is its (name, label set) pair. The fingerprint cached
//! on each point is a fast pre-filter for that identity, never a substitute
//! for comparing it.

use std::fmt;

use fnv::FnvHashMap;
use serde::Serialize;

use crate::fingerprint::fingerprint;
use crate::labels::LabelSet;

/// The semantic type of a metric family.
///
/// Only gauges are supported today; every `TYPE` directive records a gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum MetricType {
    /// A value that can go up and down.
    Gauge,
}

impl MetricType {
    /// Returns the wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural metadata for a metric family, independent of any sample.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricDefinition {
    /// The metric family name.
    pub name: String,
    /// The declared type, if a `TYPE` line has been seen.
    #[serde(rename = "type")]
    pub metric_type: Option<MetricType>,
    /// The help text, if a `HELP` line has been seen.
    pub help: Option<String>,
}

impl MetricDefinition {
    /// Creates a definition carrying only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metric_type: None,
            help: None,
        }
    }

    /// Sets the declared type.
    #[must_use]
    pub fn with_type(mut self, metric_type: MetricType) -> Self {
        self.metric_type = Some(metric_type);
        self
    }

    /// Sets the help text.
    #[must_use]
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Folds the non-empty fields of `other` into this definition.
    ///
    /// A declaration that omits the type keeps the existing one, and an
    /// empty help text never replaces a non-empty one.
    pub fn merge(&mut self, other: &MetricDefinition) {
        if let Some(metric_type) = other.metric_type {
            self.metric_type = Some(metric_type);
        }
        if let Some(help) = other.help.as_deref().filter(|h| !h.is_empty()) {
            self.help = Some(help.to_string());
        } else if self.help.is_none() {
            self.help.clone_from(&other.help);
        }
    }
}

/// A single sample of a time series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricPoint {
    name: String,
    value: f64,
    labels: LabelSet,
    timestamp: i64,
    fingerprint: u64,
}

impl MetricPoint {
    /// Creates a point and computes its identity fingerprint.
    pub fn new(name: impl Into<String>, labels: LabelSet, value: f64, timestamp: i64) -> Self {
        let name = name.into();
        let fingerprint = fingerprint(&name, &labels);
        Self {
            name,
            value,
            labels,
            timestamp,
            fingerprint,
        }
    }

    /// The metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The sampled value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// The label set.
    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// The batch timestamp this point was read under.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// The cached fingerprint of `(name, labels)`.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Returns true if this point has identity `(name, labels)`.
    pub fn has_identity(&self, name: &str, labels: &LabelSet) -> bool {
        self.name == name && self.labels == *labels
    }

    /// Returns true if both points belong to the same series.
    pub fn same_identity(&self, other: &MetricPoint) -> bool {
        self.fingerprint == other.fingerprint && self.has_identity(&other.name, &other.labels)
    }
}

/// The points of one metric family collected from a single batch.
///
/// Points are kept in insertion order and indexed by fingerprint. A bucket
/// may hold several points whose fingerprints collide but whose identities
/// differ.
#[derive(Debug, Clone, Serialize)]
pub struct MetricFamily {
    definition: MetricDefinition,
    points: Vec<MetricPoint>,
    #[serde(skip)]
    by_fingerprint: FnvHashMap<u64, Vec<usize>>,
}

impl MetricFamily {
    /// Creates an empty family from its definition.
    pub fn new(definition: MetricDefinition) -> Self {
        Self {
            definition,
            points: Vec::new(),
            by_fingerprint: FnvHashMap::default(),
        }
    }

    /// The family's definition.
    pub fn definition(&self) -> &MetricDefinition {
        &self.definition
    }

    pub(crate) fn definition_mut(&mut self) -> &mut MetricDefinition {
        &mut self.definition
    }

    /// The family name.
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// All points in insertion order.
    pub fn points(&self) -> &[MetricPoint] {
        &self.points
    }

    /// Number of points in the family.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if the family has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of distinct fingerprints among the points.
    pub fn bucket_count(&self) -> usize {
        self.by_fingerprint.len()
    }

    /// Iterates over the points stored under `fingerprint`.
    pub fn bucket(&self, fingerprint: u64) -> impl Iterator<Item = &MetricPoint> {
        self.by_fingerprint
            .get(&fingerprint)
            .into_iter()
            .flatten()
            .map(|&index| &self.points[index])
    }

    /// Finds the point with the same identity as `point`, if any.
    pub fn find_identity(&self, point: &MetricPoint) -> Option<&MetricPoint> {
        self.bucket(point.fingerprint())
            .find(|existing| existing.has_identity(point.name(), point.labels()))
    }

    /// Appends a point without checking for an existing identity.
    pub(crate) fn push(&mut self, point: MetricPoint) {
        self.by_fingerprint
            .entry(point.fingerprint())
            .or_default()
            .push(self.points.len());
        self.points.push(point);
    }

    /// Splits the family into its definition and points.
    pub fn into_parts(self) -> (MetricDefinition, Vec<MetricPoint>) {
        (self.definition, self.points)
    }
}

/// The accumulated samples of one series identity across batches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricFamilyTimeSeries {
    definition: MetricDefinition,
    labels: LabelSet,
    #[serde(skip)]
    fingerprint: u64,
    points: Vec<MetricPoint>,
}

impl MetricFamilyTimeSeries {
    /// Starts a series seeded with its first point.
    pub fn new(definition: MetricDefinition, first: MetricPoint) -> Self {
        Self {
            definition,
            labels: first.labels().clone(),
            fingerprint: first.fingerprint(),
            points: vec![first],
        }
    }

    /// The definition from the most recent batch that touched this series.
    pub fn definition(&self) -> &MetricDefinition {
        &self.definition
    }

    /// The metric name.
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// The series label set.
    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// The identity fingerprint shared by every point of the series.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// All points in ingest order.
    pub fn points(&self) -> &[MetricPoint] {
        &self.points
    }

    /// The most recently ingested point.
    pub fn latest(&self) -> Option<&MetricPoint> {
        self.points.last()
    }

    /// Returns true if this series has identity `(name, labels)`.
    pub fn has_identity(&self, name: &str, labels: &LabelSet) -> bool {
        self.definition.name == name && self.labels == *labels
    }

    pub(crate) fn matches_point(&self, point: &MetricPoint) -> bool {
        self.fingerprint == point.fingerprint() && self.has_identity(point.name(), point.labels())
    }

    pub(crate) fn append(&mut self, definition: &MetricDefinition, point: MetricPoint) {
        if self.definition != *definition {
            self.definition.clone_from(definition);
        }
        self.points.push(point);
    }
}
