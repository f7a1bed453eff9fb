//! Consolidated public types for the tiltclass crate
//!
//! This module contains the data model shared by feature extraction,
//! clustering and output.

use ndarray::Array2;
use serde::Serialize;

pub use crate::csv_reader::CsvData;
pub use crate::error::{ClassifyError, Result};
pub use crate::ml::features::FeatureMatrix;

// ============================================================================
// Feature Types
// ============================================================================

/// Feature matrix after column standardization and row normalization
#[derive(Debug, Clone)]
pub struct NormalizedFeatures {
    pub names: Vec<String>,
    /// Samples x features
    pub data: Array2<f64>,
    /// Per-column statistics used for standardization
    pub column_stats: Vec<ColumnStats>,
}

impl NormalizedFeatures {
    /// Get number of samples
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.data.nrows()
    }

    /// Get number of features
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.data.ncols()
    }
}

/// Descriptive statistics for a numeric column
#[derive(Debug, Clone, Serialize)]
pub struct ColumnStats {
    pub name: String,
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl ColumnStats {
    /// Format as a summary string
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{}: n={}, mean={:.3}, std={:.3}, min={:.3}, max={:.3}",
            self.name, self.count, self.mean, self.std_dev, self.min, self.max
        )
    }
}

// ============================================================================
// Clustering Types
// ============================================================================

/// Result of K-means clustering
#[derive(Debug, Clone)]
pub struct ClusterResult {
    /// Cluster assignment for each sample
    pub labels: Vec<usize>,
    /// Number of clusters
    pub k: usize,
    /// Cluster sizes, summing to the sample count
    pub sizes: Vec<usize>,
    /// Final centroids (k x features)
    pub centroids: Array2<f64>,
    /// Update/assign rounds performed
    pub iterations: usize,
    /// Whether the last round left every label unchanged
    pub converged: bool,
    /// Sum of squared distances to the assigned centroid
    pub inertia: f64,
}

impl ClusterResult {
    /// Get summary of cluster sizes
    #[must_use]
    pub fn summary(&self) -> String {
        use std::fmt::Write as _;

        let mut s = format!("K-means clustering with k={}\n", self.k);
        for (i, size) in self.sizes.iter().enumerate() {
            let _ = writeln!(s, "  Cluster {i}: {size} samples");
        }
        s
    }
}

/// Progress report emitted after each k-means iteration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationProgress {
    /// 1-based iteration number
    pub iteration: usize,
    /// Samples whose cluster changed in this iteration
    pub changed: usize,
    pub inertia: f64,
}

/// Receives k-means progress reports
pub trait IterationObserver {
    fn on_iteration(&mut self, progress: &IterationProgress);
}

impl<F> IterationObserver for F
where
    F: FnMut(&IterationProgress),
{
    fn on_iteration(&mut self, progress: &IterationProgress) {
        self(progress);
    }
}

/// Forwards progress reports to the `tracing` debug log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl IterationObserver for LogObserver {
    fn on_iteration(&mut self, progress: &IterationProgress) {
        tracing::debug!(
            iteration = progress.iteration,
            changed = progress.changed,
            inertia = progress.inertia,
            "k-means iteration complete"
        );
    }
}

// ============================================================================
// Output Types
// ============================================================================

/// One output row of the label table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabeledSample {
    pub identifier: String,
    pub cluster_label: usize,
}

/// Identifier to cluster label mapping, in input order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelAssignment {
    entries: Vec<LabeledSample>,
}

impl LabelAssignment {
    /// Pair identifiers with labels by position
    ///
    /// # Errors
    /// Returns error if the two sequences differ in length
    pub fn new(identifiers: &[String], labels: &[usize]) -> Result<Self> {
        if identifiers.len() != labels.len() {
            return Err(ClassifyError::InvalidInput(format!(
                "{} identifiers for {} labels",
                identifiers.len(),
                labels.len()
            )));
        }

        let entries = identifiers
            .iter()
            .zip(labels)
            .map(|(identifier, &cluster_label)| LabeledSample {
                identifier: identifier.clone(),
                cluster_label,
            })
            .collect();

        Ok(Self { entries })
    }

    #[must_use]
    pub fn entries(&self) -> &[LabeledSample] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the label of an identifier
    #[cfg(test)]
    #[must_use]
    pub fn label_of(&self, identifier: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|e| e.identifier == identifier)
            .map(|e| e.cluster_label)
    }
}

/// Mean raw metrics of one cluster
#[derive(Debug, Clone, Serialize)]
pub struct ClusterProfile {
    pub id: usize,
    pub size: usize,
    /// Mean of each raw metric over the members, in feature order
    pub metric_means: Vec<f64>,
}

/// Everything produced by one classification run
#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub normalized: NormalizedFeatures,
    pub cluster_result: ClusterResult,
    pub assignment: LabelAssignment,
    pub profiles: Vec<ClusterProfile>,
}
