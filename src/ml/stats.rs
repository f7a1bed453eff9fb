use crate::structs::{ClassifyError, ColumnStats, Result};

impl ColumnStats {
    /// Calculate statistics for a vector of values
    ///
    /// # Errors
    /// Returns error if values is empty
    #[allow(clippy::cast_precision_loss)]
    pub fn calculate(name: &str, values: &[f64]) -> Result<Self> {
        if values.is_empty() {
            return Err(ClassifyError::InvalidInput(format!(
                "Cannot calculate stats for empty column {name}"
            )));
        }

        let count = values.len();
        let mean = mean(values);

        let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / count as f64;
        let std_dev = variance.sqrt();

        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Ok(Self {
            name: name.to_string(),
            count,
            mean,
            std_dev,
            min,
            max,
        })
    }
}

/// Arithmetic mean, 0.0 for an empty slice
#[allow(clippy::cast_precision_loss)]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Squared Euclidean distance between two points
pub fn squared_distance<'a, A, B>(a: A, b: B) -> f64
where
    A: IntoIterator<Item = &'a f64>,
    B: IntoIterator<Item = &'a f64>,
{
    a.into_iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}
