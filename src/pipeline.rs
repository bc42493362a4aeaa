use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;

use crate::classifier::{ClassificationResult, Classify, ThresholdClassifier};
use crate::config::PipelineConfig;
use crate::feature_extractor::FeatureExtractor;
use crate::pitch_history::PitchHistory;
use crate::{Result, SampleBuffer};

/// Extract -> classify -> record pitch, once per tick.
///
/// `tick` takes `&mut self`, so ticks on one pipeline are strictly
/// sequential: the history update of one tick completes before the next
/// tick can start.
pub struct Pipeline {
    extractor: FeatureExtractor,
    classifier: Box<dyn Classify + Send>,
    history: PitchHistory,
    rng: StdRng,
    cadence: Duration,
}

impl Pipeline {
    /// Build a pipeline with the threshold classifier.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let classifier = ThresholdClassifier::new(config.thresholds);
        Self::with_classifier(config, Box::new(classifier))
    }

    pub fn with_classifier(
        config: &PipelineConfig,
        classifier: Box<dyn Classify + Send>,
    ) -> Result<Self> {
        config.validate()?;
        let extractor = FeatureExtractor::new(&config.extraction)?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        info!(
            "Pipeline ready: {:?} coefficients (N={}), history K={}, cadence {} ms",
            config.extraction.mode,
            config.extraction.n_coefficients,
            config.history_len,
            config.cadence_ms
        );

        Ok(Self {
            extractor,
            classifier,
            history: PitchHistory::new(config.history_len),
            rng,
            cadence: config.cadence(),
        })
    }

    pub fn tick(&mut self, buffer: &SampleBuffer) -> ClassificationResult {
        let features = self.extractor.extract(buffer, &mut self.rng);
        let pitch = features.pitch;
        let result = self.classifier.classify(features, &mut self.rng);
        self.history.push(pitch);

        debug!(
            "Tick over {} samples: zcr={:.2} pitch={} variance={:.3}",
            buffer.len(),
            result.features.zcr,
            pitch,
            result.variance
        );

        result
    }

    pub fn history(&self) -> &PitchHistory {
        &self.history
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }
}
