use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{PipelineError, Result};

/// Which coefficient computation is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Uniform pseudo-random values in [-1, 1]. Demonstration only.
    Placeholder,
    /// Windowed FFT + mel filterbank + log + DCT.
    Spectral,
}

/// How the raw crossing count is turned into a rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZcrNormalization {
    /// `(crossings / len) * sample_rate / 2`, compatible with the dashboard.
    HalfSampleRate,
    /// `crossings / (len / sample_rate)`, crossings per second.
    PerSecond,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchSearch {
    pub min_hz: f64,
    pub max_hz: f64,
}

impl Default for PitchSearch {
    fn default() -> Self {
        Self {
            min_hz: 60.0,
            max_hz: 400.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    pub n_fft: usize,
    pub hop_ms: f64,
    pub n_mels: usize,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_ms: 25.0,
            n_mels: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub mode: ExtractionMode,
    pub n_coefficients: usize,
    pub pitch_search: PitchSearch,
    pub zcr_normalization: ZcrNormalization,
    pub spectral: SpectralConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::Placeholder,
            n_coefficients: 13,
            pitch_search: PitchSearch::default(),
            zcr_normalization: ZcrNormalization::HalfSampleRate,
            spectral: SpectralConfig::default(),
        }
    }
}

impl ExtractionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_coefficients == 0 {
            return Err(invalid("coefficient count must be positive"));
        }

        let search = &self.pitch_search;
        if !is_positive(search.min_hz) || !is_positive(search.max_hz) {
            return Err(invalid("pitch search bounds must be positive and finite"));
        }
        if search.min_hz >= search.max_hz {
            return Err(invalid(format!(
                "pitch search lower bound {} Hz must be below upper bound {} Hz",
                search.min_hz, search.max_hz
            )));
        }

        let spectral = &self.spectral;
        if spectral.n_fft == 0 || spectral.n_mels == 0 {
            return Err(invalid("FFT size and mel band count must be positive"));
        }
        if !is_positive(spectral.hop_ms) {
            return Err(invalid("spectral hop must be positive and finite"));
        }

        Ok(())
    }
}

/// Bounds for the Normal status. Pitch bounds are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub zcr_max: f64,
    pub pitch_min_hz: f64,
    pub pitch_max_hz: f64,
    pub variance_max: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            zcr_max: 8.0,
            pitch_min_hz: 200.0,
            pitch_max_hz: 600.0,
            variance_max: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub extraction: ExtractionConfig,
    pub thresholds: Thresholds,
    pub history_len: usize,
    pub cadence_ms: u64,
    /// Seed for the confidence/placeholder random source. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extraction: ExtractionConfig::default(),
            thresholds: Thresholds::default(),
            history_len: 10,
            cadence_ms: 3000,
            seed: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PipelineError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.extraction.validate()?;
        if self.history_len == 0 {
            return Err(invalid("history length must be positive"));
        }
        if self.cadence_ms == 0 {
            return Err(invalid("cadence interval must be positive"));
        }

        let t = &self.thresholds;
        if !is_positive(t.zcr_max) || !is_positive(t.variance_max) {
            return Err(invalid("ZCR and variance thresholds must be positive and finite"));
        }
        if !t.pitch_min_hz.is_finite() || !t.pitch_max_hz.is_finite() || t.pitch_min_hz < 0.0 {
            return Err(invalid("pitch thresholds must be finite and non-negative"));
        }
        if t.pitch_min_hz >= t.pitch_max_hz {
            return Err(invalid(format!(
                "pitch threshold range ({}, {}) is empty",
                t.pitch_min_hz, t.pitch_max_hz
            )));
        }

        Ok(())
    }
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn invalid(msg: impl Into<String>) -> PipelineError {
    PipelineError::InvalidConfiguration(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.extraction.n_coefficients, 13);
        assert_eq!(config.history_len, 10);
        assert_eq!(config.cadence(), Duration::from_millis(3000));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{ "extraction": { "mode": "spectral" }, "seed": 7 }"#,
        )
        .unwrap();
        assert_eq!(config.extraction.mode, ExtractionMode::Spectral);
        assert_eq!(config.extraction.n_coefficients, 13);
        assert_eq!(config.thresholds, Thresholds::default());
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn rejects_zero_counts() {
        let mut config = PipelineConfig::default();
        config.extraction.n_coefficients = 0;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfiguration(_))
        ));

        let mut config = PipelineConfig::default();
        config.history_len = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.cadence_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_malformed_bounds() {
        let mut config = PipelineConfig::default();
        config.thresholds.pitch_min_hz = 600.0;
        config.thresholds.pitch_max_hz = 200.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.extraction.pitch_search.max_hz = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.thresholds.variance_max = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_is_invalid_configuration() {
        let err = PipelineConfig::from_json_str("{ \"history_len\": \"ten\" }").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfiguration(_)));
    }
}
