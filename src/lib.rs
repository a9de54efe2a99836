//! `cuecast` - Concurrent subtitle-to-speech renderer
//!
//! # Features
//!
//! - **SRT parsing**: lenient block parser preserving cue indices
//! - **Bounded fan-out**: semaphore-limited parallel synthesis, one task per cue
//! - **Complete accounting**: every cue yields exactly one result; a batch
//!   with any failure yields no archive and a report naming every failed cue
//! - **Deterministic packaging**: `{index:04}.{ext}` zip entries in ascending
//!   index order, independent of completion order
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cuecast::{parse_srt, render_batch, AudioFormat, RenderOptions, TtsClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cues = parse_srt(&std::fs::read_to_string("episode.srt")?)?;
//!     let backend = Arc::new(TtsClient::new("http://localhost:5050")?);
//!     let options = RenderOptions {
//!         voice: "alloy".into(),
//!         format: AudioFormat::Mp3,
//!         speed: 1.0,
//!         sanitize: true,
//!         max_workers: cuecast::default_worker_count(),
//!     };
//!     let outcome = render_batch(backend, cues, &options).await?;
//!     println!("{} clips in {}", outcome.clip_count, outcome.archive_path.display());
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod render;
pub mod sanitize;
pub mod subtitle;
pub mod tts;

pub use archive::{entry_name, package_clips, ArchiveError};
pub use render::{
    default_worker_count, render_batch, BatchError, BatchOutcome, RenderFailure, RenderOptions,
    RenderedClip,
};
pub use sanitize::{sanitize, SanitizeError};
pub use subtitle::{parse_srt, parse_srt_file, Cue, SubtitleError};
pub use tts::{AudioFormat, SpeechBackend, TtsClient, TtsError};

/// Version of cuecast
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
