//! Classification pipeline: normalize, cluster, label

use super::clustering::{KMeans, DEFAULT_MAX_ITERATIONS};
use crate::structs::{
    ClassificationResult, ClassifyError, ClusterProfile, ClusterResult, FeatureMatrix,
    IterationObserver, LabelAssignment, Result,
};

/// Configuration for the classification pipeline
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub clusters: usize,
    pub max_iterations: usize,
    pub seed: Option<u64>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            clusters: 3,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed: None,
        }
    }
}

/// Run the full classification pipeline
///
/// # Errors
/// Returns error if the number of clusters is outside `[1, n_samples]` or
/// the feature matrix is invalid. Nothing is computed in that case.
pub fn run_pipeline(
    features: &FeatureMatrix,
    config: &ClusterConfig,
    observer: &mut dyn IterationObserver,
) -> Result<ClassificationResult> {
    let n_samples = features.n_samples();
    if n_samples == 0 {
        return Err(ClassifyError::InvalidInput("No samples to classify".into()));
    }
    if config.clusters == 0 || config.clusters > n_samples {
        return Err(ClassifyError::InvalidInput(format!(
            "Number of classes must be between 1 and {n_samples}, got {}",
            config.clusters
        )));
    }

    let normalized = features.normalize();
    for stats in &normalized.column_stats {
        tracing::debug!("{}", stats.summary());
    }
    tracing::debug!(
        samples = normalized.n_samples(),
        features = normalized.n_features(),
        "features normalized"
    );

    let mut kmeans = KMeans::params(config.clusters).max_iterations(config.max_iterations);
    if let Some(seed) = config.seed {
        kmeans = kmeans.seed(seed);
    }
    let cluster_result = kmeans.fit_with_observer(normalized.data.view(), observer)?;

    tracing::info!(
        k = cluster_result.k,
        iterations = cluster_result.iterations,
        converged = cluster_result.converged,
        inertia = cluster_result.inertia,
        "clustering finished"
    );

    let assignment = LabelAssignment::new(features.identifiers(), &cluster_result.labels)?;
    let profiles = cluster_profiles(features, &cluster_result);

    Ok(ClassificationResult {
        normalized,
        cluster_result,
        assignment,
        profiles,
    })
}

/// Mean raw metrics per cluster
#[allow(clippy::cast_precision_loss)]
fn cluster_profiles(features: &FeatureMatrix, clusters: &ClusterResult) -> Vec<ClusterProfile> {
    let mut sums = vec![vec![0.0; features.n_features()]; clusters.k];

    for (row, &label) in features.rows().iter().zip(&clusters.labels) {
        for (sum, &val) in sums[label].iter_mut().zip(row) {
            *sum += val;
        }
    }

    sums.into_iter()
        .zip(&clusters.sizes)
        .enumerate()
        .map(|(id, (sum, &size))| ClusterProfile {
            id,
            size,
            metric_means: if size == 0 {
                sum
            } else {
                sum.into_iter().map(|s| s / size as f64).collect()
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::{CsvData, IterationProgress, LogObserver};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_metrics_csv() -> CsvData {
        let content = "Tilt_Series,Thickness,Tilt_Axis,Global_Shift,Bad_Patch_Low,Bad_Patch_All,CTF_Res,CTF_Score,Pix_Size,Comment\n\
ts_01.mrc,110.0,85.0,12.0,0.02,0.05,5.1,0.12,1.5,ok\n\
ts_02.mrc,115.0,85.2,11.5,0.03,0.06,5.3,0.11,1.5,ok\n\
ts_03.mrc,108.0,84.9,12.4,0.02,0.04,5.0,0.13,1.5,ok\n\
ts_04.mrc,320.0,70.1,85.0,0.40,0.55,14.8,0.02,1.5,bad\n\
ts_05.mrc,335.0,69.5,90.2,0.45,0.60,15.2,0.01,1.5,bad\n\
ts_06.mrc,310.0,71.0,80.7,0.38,0.52,13.9,0.03,1.5,bad";
        let mut file = NamedTempFile::new().expect("create");
        file.write_all(content.as_bytes()).expect("write");
        CsvData::from_file(file.path(), false).expect("parse")
    }

    fn config(clusters: usize) -> ClusterConfig {
        ClusterConfig {
            clusters,
            seed: Some(17),
            ..ClusterConfig::default()
        }
    }

    #[test]
    fn test_full_pipeline() {
        let csv = create_metrics_csv();
        let features = FeatureMatrix::from_csv(&csv).expect("extract");
        assert_eq!(features.n_features(), 8);

        let result = run_pipeline(&features, &config(2), &mut LogObserver).expect("pipeline");

        let labels: Vec<usize> = result
            .assignment
            .entries()
            .iter()
            .map(|e| e.cluster_label)
            .collect();
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[0], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[3], labels[5]);
        assert_ne!(labels[0], labels[3]);

        assert_eq!(result.assignment.entries()[3].identifier, "ts_04.mrc");
        assert_eq!(result.cluster_result.sizes.iter().sum::<usize>(), 6);
    }

    #[test]
    fn test_profiles_hold_raw_metric_means() {
        let csv = create_metrics_csv();
        let features = FeatureMatrix::from_csv(&csv).expect("extract");

        let result = run_pipeline(&features, &config(2), &mut LogObserver).expect("pipeline");

        let thick = result
            .assignment
            .label_of("ts_04.mrc")
            .expect("label for ts_04");
        let profile = &result.profiles[thick];
        assert_eq!(profile.size, 3);
        assert!((profile.metric_means[0] - 321.666_666_666_666_7).abs() < 1e-9);
        // Pixel size is constant
        assert!((profile.metric_means[7] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_pipeline_rejects_bad_cluster_count() {
        let csv = create_metrics_csv();
        let features = FeatureMatrix::from_csv(&csv).expect("extract");
        let mut calls = 0;
        let mut observer = |_: &IterationProgress| calls += 1;

        assert!(run_pipeline(&features, &config(0), &mut observer).is_err());
        assert!(run_pipeline(&features, &config(7), &mut observer).is_err());
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_one_class_per_sample() {
        let csv = create_metrics_csv();
        let features = FeatureMatrix::from_csv(&csv).expect("extract");

        let result = run_pipeline(&features, &config(6), &mut LogObserver).expect("pipeline");

        assert_eq!(result.cluster_result.sizes, vec![1; 6]);
        assert!(result.profiles.iter().all(|p| p.size == 1));
    }
}
