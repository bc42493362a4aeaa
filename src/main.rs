use anyhow::{Context, Result};
use audio_health_classifier::{
    audio_processor, classifier, run_cadence, shutdown_signal, ClassificationResult, FilePlayback,
    LiveCapture, Pipeline, PipelineConfig, SampleSource,
};
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(about = "Audio feature extraction and health classification")]
struct Cli {
    /// JSON pipeline configuration; defaults apply to missing fields
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print each result as a JSON line
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify a whole WAV file in one pass
    Analyze { file: PathBuf },
    /// Simulate playback of a WAV file, classifying on the cadence
    Play { file: PathBuf },
    /// Classify live microphone input until Ctrl-C
    Stream,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let mut pipeline = Pipeline::new(&config)?;

    match cli.command {
        Command::Analyze { file } => {
            let audio = audio_processor::load_wav(&file)
                .with_context(|| format!("Failed to load {}", file.display()))?;
            let result = pipeline.tick(&audio);
            report(&result, cli.json)?;
        }
        Command::Play { file } => {
            let audio = audio_processor::load_wav(&file)
                .with_context(|| format!("Failed to load {}", file.display()))?;
            let mut playback = FilePlayback::new(audio, pipeline.cadence());
            play(&mut pipeline, &mut playback, cli.json).await?;
        }
        Command::Stream => {
            info!("Starting real-time audio stream processing");
            let mut capture = LiveCapture::open_default(pipeline.cadence())
                .context("Failed to open audio input")?;
            play(&mut pipeline, &mut capture, cli.json).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            Ok(PipelineConfig::from_json_str(&json)?)
        }
        None => Ok(PipelineConfig::default()),
    }
}

async fn play<S>(pipeline: &mut Pipeline, source: &mut S, json: bool) -> Result<()>
where
    S: SampleSource,
{
    let mut statuses = Vec::new();
    let mut report_error = None;

    let shutdown = shutdown_signal(tokio::signal::ctrl_c());
    run_cadence(
        pipeline,
        source,
        |result| {
            statuses.push(result.status);
            if let Err(e) = report(result, json) {
                if report_error.is_none() {
                    report_error = Some(e);
                }
            }
        },
        shutdown,
    )
    .await?;

    if let Some(e) = report_error {
        return Err(e);
    }

    println!("\n=== SESSION SUMMARY ===");
    match classifier::summarize(&statuses) {
        Some(status) => println!("Overall status: {} over {} ticks", status.as_str(), statuses.len()),
        None => println!("No ticks completed."),
    }
    let trend: Vec<String> = pipeline.history().iter().map(|p| p.to_string()).collect();
    println!("Pitch trend: [{}]", trend.join(", "));

    Ok(())
}

fn report(result: &ClassificationResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(result)?);
        return Ok(());
    }

    let features = &result.features;
    println!(
        "Status: {}  (confidence {:.1}%)",
        result.status.as_str(),
        result.confidence
    );
    println!(
        "  zcr {:.2}  pitch {}  coefficient energy {:.3}",
        features.zcr, features.pitch, result.variance
    );
    Ok(())
}
