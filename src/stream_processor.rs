use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use log::{debug, error, info};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::classifier::ClassificationResult;
use crate::pipeline::Pipeline;
use crate::{PipelineError, Result, SampleBuffer};

/// Supplier of sample buffers for the cadence loop.
pub trait SampleSource {
    /// Whether the source is currently producing samples ("is playing").
    fn is_active(&self) -> bool;

    /// No more samples will ever arrive.
    fn is_finished(&self) -> bool;

    /// The samples produced since the previous call, if enough are available.
    fn next_buffer(&mut self) -> Result<Option<SampleBuffer>>;
}

/// Drive `pipeline` from `source` every cadence interval until the source
/// finishes or `shutdown` resolves. Returns the number of completed ticks.
///
/// Ticks while the source is idle change nothing. Missed intervals are
/// skipped rather than replayed in a burst.
pub async fn run_cadence<S, F, Sh>(
    pipeline: &mut Pipeline,
    source: &mut S,
    mut on_result: F,
    shutdown: Sh,
) -> Result<usize>
where
    S: SampleSource + ?Sized,
    F: FnMut(&ClassificationResult),
    Sh: Future<Output = ()>,
{
    let period = pipeline.cadence();
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    let mut ticks = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down cadence loop after {} ticks", ticks);
                break;
            }
            _ = interval.tick() => {}
        }

        if source.is_finished() {
            info!("Source finished after {} ticks", ticks);
            break;
        }
        if !source.is_active() {
            debug!("Source idle, skipping tick");
            continue;
        }

        let Some(buffer) = source.next_buffer()? else {
            debug!("No buffer available this tick");
            continue;
        };

        let result = pipeline.tick(&buffer);
        info!(
            "Health status: {} ({:.1}% confidence), pitch {}",
            result.status.as_str(),
            result.confidence,
            result.features.pitch
        );
        on_result(&result);
        ticks += 1;
    }

    Ok(ticks)
}

/// Resolves when `signal` fires. If the signal cannot be registered the error
/// is logged and this never resolves, so the session keeps running until its
/// source finishes.
pub async fn shutdown_signal<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Live microphone capture from the default input device.
///
/// The device callback downmixes to mono and pushes into a ring buffer; each
/// `next_buffer` drains one window once enough audio has accumulated.
pub struct LiveCapture {
    _stream: Stream,
    consumer: HeapConsumer<f32>,
    sample_rate: u32,
    window_len: usize,
    failed: Arc<AtomicBool>,
}

impl LiveCapture {
    pub fn open_default(window: Duration) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| PipelineError::Device("No input device available".to_string()))?;

        info!("Using input device: {}", device.name().map_err(device_error)?);

        let supported = device.default_input_config().map_err(device_error)?;
        info!("Default input config: {:?}", supported);

        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let sample_rate = config.sample_rate.0;
        let window_len = ((window.as_secs_f64() * sample_rate as f64) as usize).max(1);

        let ring_buffer = HeapRb::<f32>::new(window_len * 2);
        let (producer, consumer) = ring_buffer.split();
        let failed = Arc::new(AtomicBool::new(false));

        let stream = build_input_stream(&device, &config, sample_format, producer, failed.clone())?;
        stream.play().map_err(device_error)?;
        info!("Started audio capture stream at {} Hz", sample_rate);

        Ok(Self {
            _stream: stream,
            consumer,
            sample_rate,
            window_len,
            failed,
        })
    }
}

impl SampleSource for LiveCapture {
    fn is_active(&self) -> bool {
        !self.is_finished()
    }

    fn is_finished(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    fn next_buffer(&mut self) -> Result<Option<SampleBuffer>> {
        let available = self.consumer.len();
        if available < self.window_len {
            info!(
                "Not enough audio data for prediction ({} < {})",
                available, self.window_len
            );
            return Ok(None);
        }

        let samples: Vec<f64> = std::iter::from_fn(|| self.consumer.pop())
            .take(self.window_len)
            .map(f64::from)
            .collect();
        SampleBuffer::new(samples, self.sample_rate).map(Some)
    }
}

fn build_input_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    mut producer: HeapProducer<f32>,
    failed: Arc<AtomicBool>,
) -> Result<Stream> {
    let channels = config.channels as usize;
    let on_error = move |err: cpal::StreamError| {
        error!("Audio stream error: {}", err);
        failed.store(true, Ordering::Relaxed);
    };

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                push_mono(data.iter().copied(), channels, &mut producer);
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples = data.iter().map(|&s| s as f32 / i16::MAX as f32);
                push_mono(samples, channels, &mut producer);
            },
            on_error,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let samples = data.iter().map(|&s| (s as f32 - 32768.0) / 32768.0);
                push_mono(samples, channels, &mut producer);
            },
            on_error,
            None,
        ),
        other => {
            return Err(PipelineError::Device(format!(
                "Unsupported sample format: {:?}",
                other
            )))
        }
    };

    stream.map_err(device_error)
}

/// Average each interleaved frame and push it. Drops the rest of the
/// callback when the ring buffer is full.
fn push_mono<I>(samples: I, channels: usize, producer: &mut HeapProducer<f32>)
where
    I: Iterator<Item = f32>,
{
    let channels = channels.max(1);
    let mut frame_sum = 0.0f32;
    for (i, sample) in samples.enumerate() {
        frame_sum += sample;
        if (i + 1) % channels == 0 {
            if producer.push(frame_sum / channels as f32).is_err() {
                break;
            }
            frame_sum = 0.0;
        }
    }
}

fn device_error<E: Display>(err: E) -> PipelineError {
    PipelineError::Device(err.to_string())
}
