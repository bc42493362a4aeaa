use hound::{SampleFormat, WavReader};
use log::{debug, info};
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use crate::stream_processor::SampleSource;
use crate::{PipelineError, Result};

/// Mono PCM samples at a fixed sample rate.
///
/// Every sample is finite; construction rejects NaN and infinities so that
/// nothing downstream can silently produce a plausible-looking result from
/// corrupt input.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    samples: Vec<f64>,
    sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(samples: Vec<f64>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(PipelineError::InvalidSampleRate(sample_rate));
        }
        if let Some((index, &value)) = samples.iter().enumerate().find(|(_, s)| !s.is_finite()) {
            return Err(PipelineError::InvalidSample { index, value });
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Copy of `[start, end)`, clamped to the buffer.
    pub fn window(&self, start: usize, end: usize) -> SampleBuffer {
        let end = end.min(self.samples.len());
        let start = start.min(end);
        SampleBuffer {
            samples: self.samples[start..end].to_vec(),
            sample_rate: self.sample_rate,
        }
    }
}

/// Decode a WAV file into a mono buffer at its native sample rate.
pub fn load_wav<P: AsRef<Path>>(path: P) -> Result<SampleBuffer> {
    let path = path.as_ref();
    let reader = WavReader::open(path)
        .map_err(|e| PipelineError::Decode(format!("{}: {}", path.display(), e)))?;
    let buffer = decode(reader)?;
    info!(
        "Loaded {} with {} samples ({:.2} seconds at {} Hz)",
        path.display(),
        buffer.len(),
        buffer.duration().as_secs_f64(),
        buffer.sample_rate()
    );
    Ok(buffer)
}

/// Decode WAV data from any reader.
pub fn decode_wav<R: Read>(reader: R) -> Result<SampleBuffer> {
    decode(WavReader::new(reader)?)
}

fn decode<R: Read>(mut reader: WavReader<R>) -> Result<SampleBuffer> {
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(PipelineError::Decode("WAV header declares zero channels".to_string()));
    }

    let interleaved: Vec<f64> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(f64::from))
            .collect::<std::result::Result<Vec<f64>, hound::Error>>()?,
        SampleFormat::Int => {
            let full_scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f64;
            reader
                .samples::<i32>()
                .map(|s| s.map(|sample| sample as f64 / full_scale))
                .collect::<std::result::Result<Vec<f64>, hound::Error>>()?
        }
    };

    let mono = downmix(&interleaved, spec.channels as usize);
    debug!(
        "Decoded {} frames, {} channel(s), {} bits",
        mono.len(),
        spec.channels,
        spec.bits_per_sample
    );

    SampleBuffer::new(mono, spec.sample_rate)
}

/// Average interleaved channels into one.
pub(crate) fn downmix<T: Copy + Into<f64>>(interleaved: &[T], channels: usize) -> Vec<f64> {
    if channels <= 1 {
        return interleaved.iter().map(|&s| s.into()).collect();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().map(|&s| s.into()).sum::<f64>() / frame.len() as f64)
        .collect()
}

/// Simulated playback of a decoded file.
///
/// Each tick consumes the audio that "played" since the previous tick: one
/// window of cadence length. Paused playback is inactive and does not move.
pub struct FilePlayback {
    audio: SampleBuffer,
    window_len: usize,
    position: usize,
    playing: bool,
}

impl FilePlayback {
    pub fn new(audio: SampleBuffer, window: Duration) -> Self {
        let window_len = (window.as_secs_f64() * audio.sample_rate() as f64).round() as usize;
        Self {
            audio,
            window_len: window_len.max(1),
            position: 0,
            playing: true,
        }
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

impl SampleSource for FilePlayback {
    fn is_active(&self) -> bool {
        self.playing && !self.is_finished()
    }

    fn is_finished(&self) -> bool {
        self.position >= self.audio.len()
    }

    fn next_buffer(&mut self) -> Result<Option<SampleBuffer>> {
        if !self.is_active() {
            return Ok(None);
        }
        let end = self.position + self.window_len;
        let chunk = self.audio.window(self.position, end);
        self.position = end.min(self.audio.len());
        Ok(Some(chunk))
    }
}
