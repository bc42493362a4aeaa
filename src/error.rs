use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The external decoder could not turn the input into PCM.
    /// An empty or silent file decodes successfully and never lands here.
    #[error("Decode failure: {0}")]
    Decode(String),

    /// Buffer too short for a reliable estimate. Extraction reports this
    /// as a degraded record rather than returning it.
    #[error("Insufficient samples: got {len}, need at least {required}")]
    InsufficientSamples { len: usize, required: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),

    #[error("Invalid sample at index {index}: {value}")]
    InvalidSample { index: usize, value: f64 },

    /// Live capture device or stream error
    #[error("Audio device error: {0}")]
    Device(String),
}

impl From<hound::Error> for PipelineError {
    fn from(err: hound::Error) -> Self {
        PipelineError::Decode(err.to_string())
    }
}
