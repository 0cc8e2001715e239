//! Per-feature standardization (zero mean, unit variance)

use serde::{Deserialize, Serialize};

use crate::error::{ScoringError, ScoringResult};
use crate::features::{FeatureVector, FEATURE_DIM};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: [f64; FEATURE_DIM],
    scale: [f64; FEATURE_DIM],
}

impl StandardScaler {
    /// Learn per-feature mean and population standard deviation.
    ///
    /// Constant features get a scale of 1 so they map to 0.
    pub fn fit(samples: &[FeatureVector]) -> ScoringResult<Self> {
        if samples.is_empty() {
            return Err(ScoringError::EmptyDataset);
        }
        let n = samples.len() as f64;

        let mut mean = [0.0; FEATURE_DIM];
        for sample in samples {
            for (m, v) in mean.iter_mut().zip(sample.as_slice()) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut scale = [0.0; FEATURE_DIM];
        for sample in samples {
            for (i, v) in sample.as_slice().iter().enumerate() {
                scale[i] += (v - mean[i]).powi(2);
            }
        }
        for s in scale.iter_mut() {
            *s = (*s / n).sqrt();
            if *s == 0.0 || !s.is_finite() {
                *s = 1.0;
            }
        }

        Ok(Self { mean, scale })
    }

    pub fn transform(&self, features: &FeatureVector) -> FeatureVector {
        let mut out = [0.0; FEATURE_DIM];
        for (i, v) in features.as_slice().iter().enumerate() {
            out[i] = (v - self.mean[i]) / self.scale[i];
        }
        FeatureVector::from_array(out)
    }

    pub fn mean(&self) -> &[f64; FEATURE_DIM] {
        &self.mean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(first: f64, second: f64) -> FeatureVector {
        let mut values = [5.0; FEATURE_DIM];
        values[0] = first;
        values[1] = second;
        FeatureVector::from_array(values)
    }

    #[test]
    fn test_fit_transform() {
        let samples = vec![vector(1.0, 10.0), vector(3.0, 30.0)];
        let scaler = StandardScaler::fit(&samples).unwrap();

        assert_eq!(scaler.mean()[0], 2.0);
        let t = scaler.transform(&vector(3.0, 10.0));
        assert_eq!(t.get(0), 1.0);
        assert_eq!(t.get(1), -1.0);
        // constant column maps to zero instead of dividing by zero
        assert_eq!(t.get(5), 0.0);
    }

    #[test]
    fn test_fit_empty_rejected() {
        assert_eq!(StandardScaler::fit(&[]), Err(ScoringError::EmptyDataset));
    }
}
