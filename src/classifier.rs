use rand::{Rng, RngCore};
use serde::Serialize;

use crate::config::Thresholds;
use crate::feature_extractor::{FeatureRecord, Pitch};

const NORMAL_CONFIDENCE: std::ops::Range<f64> = 85.0..100.0;
const ABNORMAL_CONFIDENCE: std::ops::Range<f64> = 70.0..90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    Normal,
    Abnormal,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Normal => "Normal",
            HealthStatus::Abnormal => "Abnormal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub status: HealthStatus,
    /// Demonstration magnitude in [0, 100]. Not a calibrated probability.
    pub confidence: f64,
    /// Mean square of the coefficients the status was derived from.
    pub variance: f64,
    pub features: FeatureRecord,
}

/// Maps a feature record to a status. Implement this to swap in a trained model.
pub trait Classify {
    /// Pure in its status; `rng` only feeds the confidence draw.
    fn classify(&self, features: FeatureRecord, rng: &mut dyn RngCore) -> ClassificationResult;
}

/// Placeholder threshold rule. Not a validated diagnostic.
#[derive(Debug, Clone)]
pub struct ThresholdClassifier {
    thresholds: Thresholds,
}

impl ThresholdClassifier {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Normal only when every feature is in range.
    pub fn status(&self, features: &FeatureRecord) -> HealthStatus {
        let t = &self.thresholds;
        let pitch_in_range = match features.pitch {
            Pitch::Voiced(hz) => hz > t.pitch_min_hz && hz < t.pitch_max_hz,
            Pitch::Unvoiced => false,
        };

        if coefficient_energy(&features.coefficients) < t.variance_max
            && features.zcr < t.zcr_max
            && pitch_in_range
        {
            HealthStatus::Normal
        } else {
            HealthStatus::Abnormal
        }
    }
}

impl Classify for ThresholdClassifier {
    fn classify(&self, features: FeatureRecord, rng: &mut dyn RngCore) -> ClassificationResult {
        let status = self.status(&features);
        let confidence = match status {
            HealthStatus::Normal => rng.gen_range(NORMAL_CONFIDENCE),
            HealthStatus::Abnormal => rng.gen_range(ABNORMAL_CONFIDENCE),
        };

        ClassificationResult {
            status,
            confidence,
            variance: coefficient_energy(&features.coefficients),
            features,
        }
    }
}

/// `mean(c^2)`. No mean subtraction, so this is an energy proxy rather than a
/// statistical variance. An empty vector has zero energy.
pub fn coefficient_energy(coefficients: &[f64]) -> f64 {
    if coefficients.is_empty() {
        return 0.0;
    }
    coefficients.iter().map(|c| c * c).sum::<f64>() / coefficients.len() as f64
}

/// Majority status over a session. Ties resolve to `Abnormal`.
pub fn summarize(statuses: &[HealthStatus]) -> Option<HealthStatus> {
    if statuses.is_empty() {
        return None;
    }

    let normal = statuses.iter().filter(|&&s| s == HealthStatus::Normal).count();
    let abnormal = statuses.len() - normal;

    if normal > abnormal {
        Some(HealthStatus::Normal)
    } else {
        Some(HealthStatus::Abnormal)
    }
}
