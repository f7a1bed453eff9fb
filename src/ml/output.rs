//! Output writers for classification results

use crate::error::Result;
use crate::structs::{ClassificationResult, ColumnStats, LabelAssignment};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Write the label table: `identifier,cluster_label`, one row per sample in input order
///
/// # Errors
/// Returns error if file cannot be written
pub fn write_labels(path: &Path, assignment: &LabelAssignment) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for entry in assignment.entries() {
        writer.serialize(entry)?;
    }
    writer.flush()?;
    Ok(())
}

/// Build a human readable summary of cluster sizes and mean metrics
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn build_summary(result: &ClassificationResult) -> String {
    use std::fmt::Write as _;

    let clusters = &result.cluster_result;
    let total = result.assignment.len();

    let mut s = clusters.summary();
    let _ = writeln!(
        s,
        "Iterations: {} ({})",
        clusters.iterations,
        if clusters.converged {
            "converged"
        } else {
            "iteration bound reached"
        }
    );
    let _ = writeln!(s, "Inertia: {:.6}", clusters.inertia);

    for profile in &result.profiles {
        let percentage = if result.assignment.is_empty() {
            0.0
        } else {
            profile.size as f64 / total as f64 * 100.0
        };
        let _ = writeln!(
            s,
            "\nCluster {} ({} samples, {percentage:.1}%)",
            profile.id, profile.size
        );
        for (name, mean) in result.normalized.names.iter().zip(&profile.metric_means) {
            let _ = writeln!(s, "  {name}: {mean:.3}");
        }
    }

    s
}

/// Write the JSON run summary
///
/// # Errors
/// Returns error if file cannot be written
#[allow(clippy::cast_precision_loss)]
pub fn write_summary_json(path: &Path, input: &Path, result: &ClassificationResult) -> Result<()> {
    let clusters = &result.cluster_result;
    let total = result.assignment.len();

    let output = SummaryOutput {
        input: input.display().to_string(),
        sample_count: total,
        features: result.normalized.names.clone(),
        column_stats: &result.normalized.column_stats,
        clustering: ClusteringSummary {
            k: clusters.k,
            iterations: clusters.iterations,
            converged: clusters.converged,
            inertia: clusters.inertia,
            clusters: result
                .profiles
                .iter()
                .map(|p| ClusterEntry {
                    id: p.id,
                    size: p.size,
                    percentage: if result.assignment.is_empty() {
                        0.0
                    } else {
                        p.size as f64 / total as f64 * 100.0
                    },
                    metric_means: p.metric_means.clone(),
                    centroid: clusters.centroids.row(p.id).to_vec(),
                })
                .collect(),
        },
    };

    let json = serde_json::to_string_pretty(&output)?;
    fs::write(path, json)?;
    Ok(())
}

// JSON output structures

#[derive(Serialize)]
struct SummaryOutput<'a> {
    input: String,
    sample_count: usize,
    features: Vec<String>,
    column_stats: &'a [ColumnStats],
    clustering: ClusteringSummary,
}

#[derive(Serialize)]
struct ClusteringSummary {
    k: usize,
    iterations: usize,
    converged: bool,
    inertia: f64,
    clusters: Vec<ClusterEntry>,
}

#[derive(Serialize)]
struct ClusterEntry {
    id: usize,
    size: usize,
    percentage: f64,
    metric_means: Vec<f64>,
    /// Centroid in normalized feature space
    centroid: Vec<f64>,
}
