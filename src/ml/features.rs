use crate::structs::{ClassifyError, ColumnStats, CsvData, NormalizedFeatures, Result};
use ndarray::{Array2, Axis};

/// Guard added to every divisor during normalization
pub const EPSILON: f64 = 1e-30;

/// Raw metrics matrix extracted from an AreTomo3 metrics table
///
/// Only built through [`FeatureMatrix::new`] or [`FeatureMatrix::from_csv`],
/// so every instance has at least one sample and one feature, equal-length
/// rows and finite values.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    /// Tilt-series identifiers, one per row
    identifiers: Vec<String>,
    /// Feature names (column headers)
    names: Vec<String>,
    /// Row data as feature vectors
    data: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    /// Get number of samples (rows)
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.data.len()
    }

    /// Get number of features (columns)
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Raw feature vectors, one per sample
    #[must_use]
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.data
    }

    /// Get a feature column by index
    #[cfg(test)]
    #[must_use]
    pub fn column(&self, index: usize) -> Option<Vec<f64>> {
        if index >= self.n_features() {
            return None;
        }
        Some(self.data.iter().map(|row| row[index]).collect())
    }

    /// Build a feature matrix from in-memory rows
    ///
    /// # Errors
    /// Returns error if there are no samples or features, rows are ragged,
    /// identifiers and rows differ in count, or a value is not finite
    pub fn new(identifiers: Vec<String>, names: Vec<String>, data: Vec<Vec<f64>>) -> Result<Self> {
        if names.is_empty() {
            return Err(ClassifyError::InvalidInput("No feature columns".into()));
        }
        if data.is_empty() {
            return Err(ClassifyError::InvalidInput("Feature matrix has no samples".into()));
        }
        if identifiers.len() != data.len() {
            return Err(ClassifyError::InvalidInput(format!(
                "{} identifiers for {} samples",
                identifiers.len(),
                data.len()
            )));
        }

        for (row_idx, row) in data.iter().enumerate() {
            if row.len() != names.len() {
                return Err(ClassifyError::InvalidInput(format!(
                    "Sample {} has {} features, expected {}",
                    identifiers[row_idx],
                    row.len(),
                    names.len()
                )));
            }
            if let Some(col_idx) = row.iter().position(|v| !v.is_finite()) {
                return Err(ClassifyError::InvalidInput(format!(
                    "Sample {} has non-finite {}",
                    identifiers[row_idx], names[col_idx]
                )));
            }
        }

        Ok(Self {
            identifiers,
            names,
            data,
        })
    }

    /// Extract the metrics matrix from an AreTomo3 metrics table
    ///
    /// Column 0 holds the tilt-series identifiers. A non-numeric trailing
    /// column is dropped; every other column must be numeric in every row.
    ///
    /// # Errors
    /// Returns error if a feature cell is not numeric or the table has no
    /// rows or feature columns
    pub fn from_csv(csv: &CsvData) -> Result<Self> {
        let n_cols = csv.col_count();
        if n_cols < 2 {
            return Err(ClassifyError::InvalidInput(format!(
                "Expected an identifier column and at least one metric column, found {n_cols} columns"
            )));
        }

        let last = n_cols - 1;
        let feature_end = if last > 1 && !csv.is_numeric_column(last) {
            tracing::debug!(column = %csv.headers[last], "dropping non-numeric trailing column");
            last
        } else {
            n_cols
        };

        let names: Vec<String> = csv.headers[1..feature_end].to_vec();

        let mut identifiers = Vec::with_capacity(csv.row_count());
        let mut data = Vec::with_capacity(csv.row_count());

        for (row_idx, row) in csv.rows.iter().enumerate() {
            let identifier = row.first().cloned().unwrap_or_default();
            if row.len() != n_cols {
                return Err(ClassifyError::InvalidInput(format!(
                    "Row {} ({identifier}) has {} cells, header has {n_cols}",
                    row_idx + 1,
                    row.len()
                )));
            }

            let mut features = Vec::with_capacity(names.len());
            for (col_idx, name) in (1..feature_end).zip(&names) {
                let cell = &row[col_idx];
                let value = cell.parse::<f64>().map_err(|_| {
                    ClassifyError::InvalidInput(format!(
                        "Row {} ({identifier}) has non-numeric {name}: {cell:?}",
                        row_idx + 1
                    ))
                })?;
                features.push(value);
            }

            identifiers.push(identifier);
            data.push(features);
        }

        Self::new(identifiers, names, data)
    }

    /// Standardize each column, then scale each row to unit length
    ///
    /// Shape and finiteness are guaranteed by construction, so this cannot
    /// fail. Column statistics are taken over the raw values. Zero-variance
    /// columns become all zero and an all-zero row stays at the origin.
    #[must_use]
    pub fn normalize(&self) -> NormalizedFeatures {
        let mut data = Array2::from_shape_fn((self.n_samples(), self.n_features()), |(i, j)| {
            self.data[i][j]
        });

        let mut column_stats = Vec::with_capacity(self.n_features());
        for (mut col, name) in data.axis_iter_mut(Axis(1)).zip(&self.names) {
            let values: Vec<f64> = col.iter().copied().collect();
            // Never empty: `new` rejects matrices without samples
            let Ok(stats) = ColumnStats::calculate(name, &values) else {
                continue;
            };
            let divisor = stats.std_dev + EPSILON;
            col.mapv_inplace(|v| (v - stats.mean) / divisor);
            column_stats.push(stats);
        }

        for mut row in data.axis_iter_mut(Axis(0)) {
            let norm = row.dot(&row).sqrt() + EPSILON;
            row.mapv_inplace(|v| v / norm);
        }

        NormalizedFeatures {
            names: self.names.clone(),
            data,
            column_stats,
        }
    }
}
