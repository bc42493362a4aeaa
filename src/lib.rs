pub mod audio_processor;
pub mod classifier;
pub mod config;
pub mod error;
pub mod feature_extractor;
pub mod pipeline;
pub mod pitch_history;
pub mod stream_processor;

pub use audio_processor::{FilePlayback, SampleBuffer};
pub use classifier::{ClassificationResult, Classify, HealthStatus, ThresholdClassifier};
pub use config::{ExtractionMode, PipelineConfig};
pub use error::{PipelineError, Result};
pub use feature_extractor::{FeatureExtractor, FeatureRecord, Pitch};
pub use pipeline::Pipeline;
pub use pitch_history::PitchHistory;
pub use stream_processor::{run_cadence, shutdown_signal, LiveCapture, SampleSource};
