//! `cuecast` CLI - render an SRT track into a zip bundle of audio clips

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use cuecast::{
    default_worker_count, parse_srt_file, render_batch, AudioFormat, BatchError, RenderOptions,
    TtsClient,
};

/// The original desktop UI bounds the speed slider to this range; the CLI
/// keeps the same guardrail. The library itself forwards speed untouched.
const SPEED_RANGE: (f32, f32) = (0.5, 1.5);

#[derive(Parser)]
#[command(name = "cuecast")]
#[command(about = "Render subtitle cues to speech and bundle the clips")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render an SRT file into a zip bundle of per-cue audio clips
    Generate {
        /// Path to the SRT subtitle file
        srt: PathBuf,

        /// TTS API base URL
        #[arg(long, default_value = "http://localhost:5050", env = "CUECAST_API_BASE")]
        api_base: String,

        /// Voice ID to synthesize with
        #[arg(short, long, default_value = "alloy")]
        voice: String,

        /// Model ID (backend default when omitted)
        #[arg(short, long)]
        model: Option<String>,

        /// Output audio format: mp3, wav, opus, aac, flac
        #[arg(short, long, default_value = "mp3")]
        format: AudioFormat,

        /// Playback speed (0.5 - 1.5)
        #[arg(short, long, default_value = "1.0")]
        speed: f32,

        /// Concurrent synthesis workers (default: CUECAST_WORKERS or host parallelism)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Pass cue text to the backend verbatim, markup included
        #[arg(long)]
        no_sanitize: bool,

        /// Where to put the bundle
        #[arg(short, long, default_value = "subtitle_audio.zip")]
        output: PathBuf,
    },

    /// List voices offered by the backend
    Voices {
        /// TTS API base URL
        #[arg(long, default_value = "http://localhost:5050", env = "CUECAST_API_BASE")]
        api_base: String,
    },

    /// List models offered by the backend
    Models {
        /// TTS API base URL
        #[arg(long, default_value = "http://localhost:5050", env = "CUECAST_API_BASE")]
        api_base: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            srt,
            api_base,
            voice,
            model,
            format,
            speed,
            workers,
            no_sanitize,
            output,
        } => {
            cmd_generate(
                &srt,
                &api_base,
                voice,
                model,
                format,
                speed,
                workers,
                no_sanitize,
                &output,
            )
            .await?;
        }
        Commands::Voices { api_base } => {
            cmd_voices(&api_base).await?;
        }
        Commands::Models { api_base } => {
            cmd_models(&api_base).await?;
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_generate(
    srt: &Path,
    api_base: &str,
    voice: String,
    model: Option<String>,
    format: AudioFormat,
    speed: f32,
    workers: Option<usize>,
    no_sanitize: bool,
    output: &Path,
) -> Result<()> {
    let cues = parse_srt_file(srt)
        .await
        .with_context(|| format!("failed to parse '{}'", srt.display()))?;

    let mut backend = TtsClient::new(api_base)?;
    if let Some(model) = model {
        backend = backend.with_model(model);
    }

    let options = RenderOptions {
        voice,
        format,
        speed: speed.clamp(SPEED_RANGE.0, SPEED_RANGE.1),
        sanitize: !no_sanitize,
        max_workers: workers.unwrap_or_else(default_worker_count),
    };

    println!(
        "🎙️  Rendering {} cues ({} voice, {} format, {} workers)",
        cues.len(),
        options.voice,
        options.format,
        options.max_workers
    );

    let start = Instant::now();

    match render_batch(Arc::new(backend), cues, &options).await {
        Ok(outcome) => {
            tokio::fs::rename(&outcome.archive_path, output)
                .await
                .or_else(|_| {
                    // Rename fails across filesystems; fall back to copy+remove.
                    std::fs::copy(&outcome.archive_path, output)
                        .and_then(|_| std::fs::remove_file(&outcome.archive_path))
                })
                .with_context(|| format!("failed to move bundle to '{}'", output.display()))?;

            println!(
                "📦 Saved {} clips to {} in {:.1}s",
                outcome.clip_count,
                output.display(),
                start.elapsed().as_secs_f64()
            );
            Ok(())
        }
        Err(BatchError::Failures(failures)) => {
            eprintln!("❌ Batch failed; no bundle was produced:");
            for failure in &failures {
                eprintln!("   {failure}");
            }
            anyhow::bail!("{} cue(s) failed to render", failures.len());
        }
        Err(e) => Err(e.into()),
    }
}

async fn cmd_voices(api_base: &str) -> Result<()> {
    let client = TtsClient::new(api_base)?;
    let voices = client.voices().await?;

    if voices.is_empty() {
        println!("No voices reported by {api_base}");
    } else {
        for voice in voices {
            println!("{voice}");
        }
    }
    Ok(())
}

async fn cmd_models(api_base: &str) -> Result<()> {
    let client = TtsClient::new(api_base)?;
    let models = client.models().await?;

    if models.is_empty() {
        println!("No models reported by {api_base}");
    } else {
        for model in models {
            println!("{model}");
        }
    }
    Ok(())
}
