//! Per-buffer feature extraction: zero-crossing rate, autocorrelation pitch
//! and a fixed-length coefficient vector.
//!
//! ZCR and pitch are deterministic. The coefficient vector is either a
//! pseudo-random placeholder or a real MFCC computation, selected through
//! [`ExtractionMode`]; both always yield exactly `n_coefficients` values.

use log::debug;
use ndarray::{Array1, Array2, Axis};
use num_complex::Complex64;
use rand::{Rng, RngCore};
use rustfft::{Fft, FftPlanner};
use serde::Serialize;
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use crate::config::{ExtractionConfig, ExtractionMode, PitchSearch, SpectralConfig, ZcrNormalization};
use crate::{PipelineError, Result, SampleBuffer};

/// Estimated fundamental frequency.
///
/// `Unvoiced` is the sentinel for "no reliable periodicity found" and is
/// never confused with a frequency. Serializes as `null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(into = "Option<f64>")]
pub enum Pitch {
    Voiced(f64),
    Unvoiced,
}

impl Pitch {
    pub fn hz(&self) -> Option<f64> {
        match *self {
            Pitch::Voiced(hz) => Some(hz),
            Pitch::Unvoiced => None,
        }
    }

    pub fn is_voiced(&self) -> bool {
        matches!(self, Pitch::Voiced(_))
    }
}

impl From<Pitch> for Option<f64> {
    fn from(pitch: Pitch) -> Self {
        pitch.hz()
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pitch::Voiced(hz) => write!(f, "{:.1} Hz", hz),
            Pitch::Unvoiced => write!(f, "unvoiced"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRecord {
    pub coefficients: Vec<f64>,
    pub zcr: f64,
    pub pitch: Pitch,
}

impl FeatureRecord {
    /// True when the buffer was too short or too flat for a pitch estimate.
    pub fn is_degraded(&self) -> bool {
        !self.pitch.is_voiced()
    }
}

pub struct FeatureExtractor {
    mode: ExtractionMode,
    n_coefficients: usize,
    pitch_search: PitchSearch,
    zcr_normalization: ZcrNormalization,
    mfcc: MfccExtractor,
}

impl FeatureExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            mode: config.mode,
            n_coefficients: config.n_coefficients,
            pitch_search: config.pitch_search,
            zcr_normalization: config.zcr_normalization,
            mfcc: MfccExtractor::new(config.spectral, config.n_coefficients),
        })
    }

    pub fn mode(&self) -> ExtractionMode {
        self.mode
    }

    /// Extract a feature record. `rng` is only drawn from in placeholder mode.
    pub fn extract(&self, buffer: &SampleBuffer, rng: &mut dyn RngCore) -> FeatureRecord {
        if let Err(e) = self.check_sufficiency(buffer) {
            debug!("Degraded extraction: {}", e);
        }

        let coefficients = match self.mode {
            ExtractionMode::Placeholder => placeholder_coefficients(self.n_coefficients, rng),
            ExtractionMode::Spectral => self.mfcc.coefficients(buffer),
        };
        debug_assert_eq!(coefficients.len(), self.n_coefficients);

        FeatureRecord {
            coefficients,
            zcr: zero_crossing_rate(buffer.samples(), buffer.sample_rate(), self.zcr_normalization),
            pitch: estimate_pitch(buffer.samples(), buffer.sample_rate(), &self.pitch_search),
        }
    }

    /// `InsufficientSamples` when the buffer cannot support a pitch search.
    pub fn check_sufficiency(&self, buffer: &SampleBuffer) -> Result<()> {
        let (min_lag, _) = lag_range(buffer.sample_rate(), &self.pitch_search);
        let required = (min_lag + 1).max(2);
        if buffer.len() < required {
            return Err(PipelineError::InsufficientSamples {
                len: buffer.len(),
                required,
            });
        }
        Ok(())
    }
}

/// Zero-crossing rate of `samples`.
///
/// A crossing is a strict sign change, `s[i-1] * s[i] < 0`; touching zero is
/// not a crossing. The `HalfSampleRate` normalization approximates a
/// frequency in Hz but is not a frequency estimator, and only means something
/// once the buffer holds several crossings. Fewer than two samples yield 0.
pub fn zero_crossing_rate(samples: &[f64], sample_rate: u32, normalization: ZcrNormalization) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples.windows(2).filter(|w| w[0] * w[1] < 0.0).count() as f64;
    let len = samples.len() as f64;
    let sample_rate = sample_rate as f64;
    match normalization {
        ZcrNormalization::HalfSampleRate => (crossings / len) * sample_rate / 2.0,
        ZcrNormalization::PerSecond => crossings / (len / sample_rate),
    }
}

/// Lags `[min, max]` covering the search band, both edges included. The
/// minimum lag is at least 2 so a reported pitch never exceeds Nyquist.
fn lag_range(sample_rate: u32, search: &PitchSearch) -> (usize, usize) {
    let sample_rate = sample_rate as f64;
    let min_lag = ((sample_rate / search.max_hz).floor() as usize).max(2);
    let max_lag = (sample_rate / search.min_hz).floor() as usize;
    (min_lag, max_lag)
}

/// Single-pitch autocorrelation estimate.
///
/// Picks the lag in the search band with the largest unnormalized
/// autocorrelation; ties go to the smallest lag. Monophonic only: polyphonic
/// or noisy input produces a wrong answer rather than an error, and a tone
/// above the band is reported at a subharmonic.
///
/// Returns `Unvoiced` when the buffer is not longer than the minimum lag or
/// when no lag has positive correlation (silence).
pub fn estimate_pitch(samples: &[f64], sample_rate: u32, search: &PitchSearch) -> Pitch {
    let (min_lag, max_lag) = lag_range(sample_rate, search);
    if samples.len() <= min_lag {
        return Pitch::Unvoiced;
    }

    let mut best: Option<(usize, f64)> = None;
    for lag in min_lag..=max_lag.min(samples.len() - 1) {
        let correlation: f64 = samples[..samples.len() - lag]
            .iter()
            .zip(&samples[lag..])
            .map(|(a, b)| a * b)
            .sum();

        if best.map_or(true, |(_, best_corr)| correlation > best_corr) {
            best = Some((lag, correlation));
        }
    }

    match best {
        Some((lag, correlation)) if correlation > 0.0 => Pitch::Voiced(sample_rate as f64 / lag as f64),
        _ => Pitch::Unvoiced,
    }
}

/// Placeholder stand-in for spectral coefficients: uniform in [-1, 1].
fn placeholder_coefficients(n: usize, rng: &mut dyn RngCore) -> Vec<f64> {
    (0..n).map(|_| rng.gen_range(-1.0..=1.0)).collect()
}

/// MFCC computation over a whole buffer, averaged across frames.
struct MfccExtractor {
    n_mfcc: usize,
    n_fft: usize,
    hop_ms: f64,
    n_mels: usize,
    fft: Arc<dyn Fft<f64>>,
}

impl MfccExtractor {
    fn new(config: SpectralConfig, n_mfcc: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(config.n_fft.max(1));
        Self {
            n_mfcc,
            n_fft: config.n_fft.max(1),
            hop_ms: config.hop_ms,
            n_mels: config.n_mels.max(1),
            fft,
        }
    }

    fn coefficients(&self, buffer: &SampleBuffer) -> Vec<f64> {
        let sample_rate = buffer.sample_rate() as f64;
        let spectrogram = self.compute_spectrogram(buffer.samples(), sample_rate);
        let log_mel = self.apply_mel_filters(&spectrogram, sample_rate);
        let mfccs = self.apply_dct(&log_mel);

        let mean = mfccs
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(self.n_mfcc));

        mean.iter().map(|v| v.clamp(-100.0, 100.0)).collect()
    }

    /// Power spectrogram, `(n_fft / 2 + 1) x n_frames`. Buffers shorter than
    /// one frame are zero-padded to a single frame.
    fn compute_spectrogram(&self, audio: &[f64], sample_rate: f64) -> Array2<f64> {
        let hop_length = ((self.hop_ms / 1000.0 * sample_rate).round() as usize).max(1);
        let n_frames = if audio.len() <= self.n_fft {
            1
        } else {
            (audio.len() - self.n_fft) / hop_length + 1
        };
        let n_bins = self.n_fft / 2 + 1;
        let mut spectrogram = Array2::zeros((n_bins, n_frames));
        let window_denom = (self.n_fft.max(2) - 1) as f64;

        for frame_idx in 0..n_frames {
            let start = frame_idx * hop_length;
            let mut windowed: Vec<Complex64> = (0..self.n_fft)
                .map(|i| {
                    let sample = audio.get(start + i).copied().unwrap_or(0.0);
                    let hann = 0.5 * (1.0 - (2.0 * PI * i as f64 / window_denom).cos());
                    Complex64::new(sample * hann, 0.0)
                })
                .collect();

            self.fft.process(&mut windowed);

            for (bin, value) in windowed.iter().take(n_bins).enumerate() {
                spectrogram[[bin, frame_idx]] = value.norm_sqr();
            }
        }

        spectrogram
    }

    fn apply_mel_filters(&self, spectrogram: &Array2<f64>, sample_rate: f64) -> Array2<f64> {
        let filters = self.create_mel_filters(sample_rate);
        filters.dot(spectrogram).mapv(|x| (x + 1e-10).ln())
    }

    /// Triangular filters evenly spaced on the mel scale from 0 to Nyquist.
    fn create_mel_filters(&self, sample_rate: f64) -> Array2<f64> {
        let n_freqs = self.n_fft / 2 + 1;
        let mut filters = Array2::zeros((self.n_mels, n_freqs));

        let mel_low = hz_to_mel(0.0);
        let mel_high = hz_to_mel(sample_rate / 2.0);
        let bin_points: Vec<usize> = (0..=self.n_mels + 1)
            .map(|i| mel_low + (mel_high - mel_low) * i as f64 / (self.n_mels + 1) as f64)
            .map(|mel| ((mel_to_hz(mel) * self.n_fft as f64) / sample_rate).floor() as usize)
            .collect();

        for m in 0..self.n_mels {
            let (left, center, right) = (bin_points[m], bin_points[m + 1], bin_points[m + 2]);

            for k in left..=right.min(n_freqs - 1) {
                // Narrow low-frequency bands can collapse onto one bin.
                let weight = if k <= center {
                    if center > left {
                        (k - left) as f64 / (center - left) as f64
                    } else {
                        1.0
                    }
                } else if right > center {
                    (right - k) as f64 / (right - center) as f64
                } else {
                    1.0
                };
                filters[[m, k]] = weight;
            }
        }

        filters
    }

    /// DCT-II along the mel axis, keeping the first `n_mfcc` coefficients.
    fn apply_dct(&self, log_mel: &Array2<f64>) -> Array2<f64> {
        let (n_mels, n_frames) = log_mel.dim();
        let mut mfccs = Array2::zeros((self.n_mfcc, n_frames));

        for frame in 0..n_frames {
            for i in 0..self.n_mfcc {
                let sum: f64 = (0..n_mels)
                    .map(|j| log_mel[[j, frame]] * (PI * i as f64 * (j as f64 + 0.5) / n_mels as f64).cos())
                    .sum();
                mfccs[[i, frame]] = sum;
            }
        }

        mfccs
    }
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10.0_f64.powf(mel / 2595.0) - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sine(freq: f64, sample_rate: u32, len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f64 / sample_rate as f64).sin())
            .collect()
    }

    fn buffer(samples: Vec<f64>, sample_rate: u32) -> SampleBuffer {
        SampleBuffer::new(samples, sample_rate).unwrap()
    }

    fn assert_within_percent(actual: f64, expected: f64, percent: f64) {
        let tolerance = expected * percent / 100.0;
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {} within {}%, got {}",
            expected,
            percent,
            actual
        );
    }

    #[test]
    fn zcr_is_zero_for_short_buffers() {
        for samples in [vec![], vec![0.7]] {
            assert_eq!(zero_crossing_rate(&samples, 44100, ZcrNormalization::HalfSampleRate), 0.0);
        }
    }

    #[test]
    fn zcr_is_zero_for_constant_sign() {
        let samples = vec![0.1, 0.5, 0.9, 0.2, 0.3];
        assert_eq!(zero_crossing_rate(&samples, 8000, ZcrNormalization::HalfSampleRate), 0.0);
        let negative: Vec<f64> = samples.iter().map(|s| -s).collect();
        assert_eq!(zero_crossing_rate(&negative, 8000, ZcrNormalization::PerSecond), 0.0);
    }

    #[test]
    fn zcr_does_not_count_touching_zero() {
        // 0.5 -> 0.0 -> -0.5 passes through zero without a strict sign change
        let samples = vec![0.5, 0.0, -0.5];
        assert_eq!(zero_crossing_rate(&samples, 8000, ZcrNormalization::PerSecond), 0.0);
    }

    #[test]
    fn zcr_matches_both_normalizations() {
        let samples = vec![0.1, -0.2, 0.3, -0.1, 0.05];
        // 4 crossings over 5 samples
        let half = zero_crossing_rate(&samples, 8000, ZcrNormalization::HalfSampleRate);
        assert!((half - 4.0 / 5.0 * 4000.0).abs() < 1e-9);
        let per_second = zero_crossing_rate(&samples, 8000, ZcrNormalization::PerSecond);
        assert!((per_second - 4.0 / (5.0 / 8000.0)).abs() < 1e-9);
    }

    #[test]
    fn zcr_grows_with_crossing_count() {
        let mut samples = vec![0.5; 16];
        let mut previous = zero_crossing_rate(&samples, 8000, ZcrNormalization::HalfSampleRate);
        for i in (1..16).step_by(2) {
            samples[i] = -0.5;
            let current = zero_crossing_rate(&samples, 8000, ZcrNormalization::HalfSampleRate);
            assert!(current >= previous);
            previous = current;
        }
        assert!(previous > 0.0);
    }

    #[test]
    fn pitch_of_exact_period_sines() {
        let search = PitchSearch::default();
        for (freq, sample_rate) in [(100.0, 8000), (250.0, 8000), (160.0, 16000)] {
            let pitch = estimate_pitch(&sine(freq, sample_rate, 2048), sample_rate, &search);
            assert_within_percent(pitch.hz().unwrap(), freq, 1.0);
        }
    }

    #[test]
    fn pitch_at_band_edges() {
        let search = PitchSearch::default();
        for sample_rate in [6000, 8000] {
            for freq in [60.0, 400.0] {
                let samples = sine(freq, sample_rate, 2 * sample_rate as usize);
                let pitch = estimate_pitch(&samples, sample_rate, &search);
                assert_within_percent(pitch.hz().unwrap(), freq, 1.0);
            }
        }
        // sr / 60 is a whole number here, so the slowest lag must be searched
        let pitch = estimate_pitch(&sine(60.0, 6000, 12000), 6000, &search);
        assert_eq!(pitch, Pitch::Voiced(60.0));
    }

    #[test]
    fn pitch_of_non_integer_period_sine() {
        let pitch = estimate_pitch(&sine(220.0, 44100, 4096), 44100, &PitchSearch::default());
        assert_within_percent(pitch.hz().unwrap(), 220.0, 1.0);
    }

    #[test]
    fn tone_above_band_reports_subharmonic() {
        let pitch = estimate_pitch(&sine(440.0, 44100, 1024), 44100, &PitchSearch::default());
        assert_within_percent(pitch.hz().unwrap(), 220.5, 1.0);

        let wide = PitchSearch {
            min_hz: 60.0,
            max_hz: 500.0,
        };
        let pitch = estimate_pitch(&sine(440.0, 44100, 1024), 44100, &wide);
        assert_within_percent(pitch.hz().unwrap(), 440.0, 1.0);
    }

    #[test]
    fn short_buffer_is_unvoiced() {
        // min lag at 44.1 kHz is 110
        let samples = sine(200.0, 44100, 110);
        assert_eq!(estimate_pitch(&samples, 44100, &PitchSearch::default()), Pitch::Unvoiced);
        assert_eq!(estimate_pitch(&[], 44100, &PitchSearch::default()), Pitch::Unvoiced);
    }

    #[test]
    fn silence_is_unvoiced() {
        let samples = vec![0.0; 4000];
        assert_eq!(estimate_pitch(&samples, 8000, &PitchSearch::default()), Pitch::Unvoiced);
    }

    #[test]
    fn low_sample_rate_never_divides_by_zero() {
        // sample_rate / max_hz floors to 0; the lag is clamped
        let samples = sine(50.0, 200, 400);
        let pitch = estimate_pitch(&samples, 200, &PitchSearch::default());
        if let Some(hz) = pitch.hz() {
            assert!(hz.is_finite() && hz <= 100.0);
        }
    }

    #[test]
    fn placeholder_mode_yields_n_values_in_range() {
        let extractor = FeatureExtractor::new(&ExtractionConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let record = extractor.extract(&buffer(sine(220.0, 8000, 800), 8000), &mut rng);
        assert_eq!(record.coefficients.len(), 13);
        assert!(record.coefficients.iter().all(|c| (-1.0..=1.0).contains(c)));
    }

    #[test]
    fn placeholder_mode_is_reproducible_with_a_pinned_seed() {
        let extractor = FeatureExtractor::new(&ExtractionConfig::default()).unwrap();
        let audio = buffer(sine(220.0, 8000, 800), 8000);
        let a = extractor.extract(&audio, &mut StdRng::seed_from_u64(9));
        let b = extractor.extract(&audio, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn spectral_mode_yields_n_finite_values() {
        let config = ExtractionConfig {
            mode: ExtractionMode::Spectral,
            n_coefficients: 13,
            ..ExtractionConfig::default()
        };
        let extractor = FeatureExtractor::new(&config).unwrap();
        let mut rng = StdRng::seed_from_u64(1);

        for len in [0, 100, 2048, 9000] {
            let record = extractor.extract(&buffer(sine(300.0, 16000, len), 16000), &mut rng);
            assert_eq!(record.coefficients.len(), 13);
            assert!(record.coefficients.iter().all(|c| c.is_finite() && c.abs() <= 100.0));
        }
    }

    #[test]
    fn spectral_mode_is_deterministic() {
        let config = ExtractionConfig {
            mode: ExtractionMode::Spectral,
            ..ExtractionConfig::default()
        };
        let extractor = FeatureExtractor::new(&config).unwrap();
        let audio = buffer(sine(300.0, 16000, 4096), 16000);
        let a = extractor.extract(&audio, &mut StdRng::seed_from_u64(1));
        let b = extractor.extract(&audio, &mut StdRng::seed_from_u64(2));
        assert_eq!(a.coefficients, b.coefficients);
    }

    #[test]
    fn extractor_rejects_invalid_config() {
        let config = ExtractionConfig {
            n_coefficients: 0,
            ..ExtractionConfig::default()
        };
        assert!(matches!(
            FeatureExtractor::new(&config),
            Err(PipelineError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn sufficiency_check_reports_required_length() {
        let extractor = FeatureExtractor::new(&ExtractionConfig::default()).unwrap();
        let err = extractor.check_sufficiency(&buffer(vec![0.0; 100], 44100)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InsufficientSamples { len: 100, required: 111 }
        ));
        assert!(extractor.check_sufficiency(&buffer(vec![0.0; 111], 44100)).is_ok());
    }
}
