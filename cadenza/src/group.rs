//! The per-batch family registry.
//!
//! A [`MetricFamiliesTimeGroup`] is built while one payload is read and
//! handed once to [`crate::block::Block::ingest`]. It enforces the batch
//! rules: a sample needs a prior declaration of its family, and an identity
//! may appear at most once per batch.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::FamilyError;
use crate::metric::{MetricDefinition, MetricFamily, MetricPoint};

/// Metric families and their points from a single ingested payload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricFamiliesTimeGroup {
    timestamp: i64,
    families: BTreeMap<String, MetricFamily>,
}

impl MetricFamiliesTimeGroup {
    /// Creates an empty batch with timestamp zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty batch with the given timestamp.
    pub fn with_timestamp(timestamp: i64) -> Self {
        Self {
            timestamp,
            families: BTreeMap::new(),
        }
    }

    /// The batch timestamp in unix seconds, or zero if the payload had none.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub(crate) fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    /// Declares a family, or merges the declaration into an existing one.
    ///
    /// Only the non-empty fields of `definition` are applied to an existing
    /// family; see [`MetricDefinition::merge`].
    pub fn upsert_family(&mut self, definition: MetricDefinition) {
        match self.families.get_mut(&definition.name) {
            Some(family) => family.definition_mut().merge(&definition),
            None => {
                self.families
                    .insert(definition.name.clone(), MetricFamily::new(definition));
            }
        }
    }

    /// Adds a point to its declared family.
    ///
    /// # Errors
    ///
    /// - [`FamilyError::FamilyNotFound`] if no family named `point.name()`
    ///   has been declared in this batch
    /// - [`FamilyError::DuplicateLabelSet`] if a point with the same
    ///   identity is already in the batch
    pub fn insert_point(&mut self, point: MetricPoint) -> Result<(), FamilyError> {
        let family = self
            .families
            .get_mut(point.name())
            .ok_or_else(|| FamilyError::FamilyNotFound {
                name: point.name().to_string(),
            })?;

        if family.find_identity(&point).is_some() {
            return Err(FamilyError::DuplicateLabelSet {
                name: point.name().to_string(),
                labels: point.labels().clone(),
            });
        }

        family.push(point);
        Ok(())
    }

    /// Looks up a family by name.
    pub fn family(&self, name: &str) -> Option<&MetricFamily> {
        self.families.get(name)
    }

    /// Iterates over families in name order.
    pub fn families(&self) -> impl Iterator<Item = &MetricFamily> {
        self.families.values()
    }

    /// Number of declared families.
    pub fn len(&self) -> usize {
        self.families.len()
    }

    /// Returns true if no family has been declared.
    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Total number of points across all families.
    pub fn point_count(&self) -> usize {
        self.families.values().map(MetricFamily::len).sum()
    }

    /// Consumes the batch, yielding its families in name order.
    pub fn into_families(self) -> impl Iterator<Item = MetricFamily> {
        self.families.into_values()
    }
}
