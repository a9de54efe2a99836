//! Concurrent cue rendering
//!
//! The core fan-out/fan-in pipeline: every cue becomes one independent
//! rendering task, at most `max_workers` run at a time, and all of them run
//! to completion before the batch is judged. Exactly one result exists per
//! submitted cue - a rendered artifact or a structured failure - and a batch
//! with any failure yields no archive at all.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::archive::{self, ArchiveError};
use crate::sanitize;
use crate::subtitle::Cue;
use crate::tts::{AudioFormat, SpeechBackend};

/// Rendering options for one batch
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Voice ID passed to the backend
    pub voice: String,
    /// Output audio format
    pub format: AudioFormat,
    /// Playback speed multiplier
    pub speed: f32,
    /// Strip markup from cue text before synthesis
    pub sanitize: bool,
    /// Upper bound on concurrently running units, must be >= 1
    pub max_workers: usize,
}

/// A successfully rendered cue: its index and the artifact on disk
#[derive(Debug, Clone)]
pub struct RenderedClip {
    pub index: u32,
    pub path: PathBuf,
}

/// One cue that failed to render
#[derive(Debug, Clone, Serialize)]
pub struct RenderFailure {
    pub index: u32,
    pub start_ms: u64,
    pub end_ms: u64,
    pub cause: String,
}

impl std::fmt::Display for RenderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "failed to render cue {} ({}): {}",
            self.index,
            Cue::time_range(self.start_ms, self.end_ms),
            self.cause
        )
    }
}

/// Batch-level errors
#[derive(Error, Debug)]
pub enum BatchError {
    /// Configuration error, rejected before any unit starts
    #[error("max_workers must be at least 1 (got {0})")]
    InvalidWorkerCount(usize),

    /// One or more cues failed; the whole batch is treated as not produced
    #[error("{}", format_failures(.0))]
    Failures(Vec<RenderFailure>),

    /// Packaging of a fully successful batch failed
    #[error("failed to package archive: {0}")]
    Archive(#[from] ArchiveError),
}

fn format_failures(failures: &[RenderFailure]) -> String {
    let lines: Vec<String> = failures.iter().map(ToString::to_string).collect();
    format!("{} cue(s) failed: {}", failures.len(), lines.join("; "))
}

/// Result of a fully successful batch
#[derive(Debug)]
pub struct BatchOutcome {
    /// Location of the zip bundle
    pub archive_path: PathBuf,
    /// Number of clips in the bundle (one per cue)
    pub clip_count: usize,
}

/// Worker-count default for callers that do not configure one explicitly:
/// `CUECAST_WORKERS` if set to a positive integer, else host parallelism.
///
/// The render functions never consult this themselves - the count always
/// arrives through [`RenderOptions`].
#[must_use]
pub fn default_worker_count() -> usize {
    std::env::var("CUECAST_WORKERS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4)
        })
}

/// Deletes whatever artifacts are still on disk when dropped.
///
/// Archiving removes each file as it is packed, so after a clean success
/// every path in here is already gone and the drop is a no-op. On any
/// failure path the successful units' orphans get cleaned up here.
struct ArtifactGuard {
    paths: Vec<PathBuf>,
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        for path in &self.paths {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Render every cue and package the successes into a zip bundle.
///
/// The single entry point of the pipeline. Waits for all units regardless
/// of individual failures, then either packages all N artifacts (ascending
/// index order, `{index:04}.{ext}` names) or returns
/// [`BatchError::Failures`] enumerating every failed cue. No temp artifact
/// survives the call on any path.
pub async fn render_batch<B>(
    backend: Arc<B>,
    cues: Vec<Cue>,
    options: &RenderOptions,
) -> Result<BatchOutcome, BatchError>
where
    B: SpeechBackend + ?Sized + 'static,
{
    let (clips, mut failures) = fan_out(backend, cues, options).await?;

    // From here on the guard owns every artifact that made it to disk.
    let guard = ArtifactGuard {
        paths: clips.iter().map(|c| c.path.clone()).collect(),
    };

    if !failures.is_empty() {
        failures.sort_by_key(|f| f.index);
        warn!(failed = failures.len(), "batch failed");
        return Err(BatchError::Failures(failures));
    }

    let (archive_path, clip_count) = archive::package_clips(&clips, options.format)?;
    drop(guard);

    info!(clips = clip_count, path = %archive_path.display(), "batch complete");

    Ok(BatchOutcome {
        archive_path,
        clip_count,
    })
}

/// Bounded fan-out: one task per cue, at most `max_workers` running.
///
/// Returns one entry across the two vectors for every submitted cue.
/// Results carry no ordering guarantee; ordering is enforced at packaging
/// time.
async fn fan_out<B>(
    backend: Arc<B>,
    cues: Vec<Cue>,
    options: &RenderOptions,
) -> Result<(Vec<RenderedClip>, Vec<RenderFailure>), BatchError>
where
    B: SpeechBackend + ?Sized + 'static,
{
    if options.max_workers == 0 {
        return Err(BatchError::InvalidWorkerCount(options.max_workers));
    }

    info!(
        cues = cues.len(),
        workers = options.max_workers,
        "rendering batch"
    );

    let semaphore = Arc::new(Semaphore::new(options.max_workers));
    let mut handles = Vec::with_capacity(cues.len());

    for cue in cues {
        let sem = Arc::clone(&semaphore);
        let backend = Arc::clone(&backend);
        let voice = options.voice.clone();
        let format = options.format;
        let speed = options.speed;
        let sanitize_text = options.sanitize;

        // Join metadata kept outside the task so a panicked unit can still
        // be accounted for.
        let (index, start_ms, end_ms) = (cue.index, cue.start_ms, cue.end_ms);

        let handle = tokio::spawn(async move {
            // The semaphore lives as long as every task; it is never closed.
            let _permit = sem.acquire_owned().await.expect("semaphore closed");
            render_unit(backend.as_ref(), &cue, &voice, format, speed, sanitize_text).await
        });

        handles.push((index, start_ms, end_ms, handle));
    }

    // One slot per unit, consumed in submission order; completion order is
    // irrelevant here.
    let mut clips = Vec::new();
    let mut failures = Vec::new();
    for (index, start_ms, end_ms, handle) in handles {
        match handle.await {
            Ok(Ok(clip)) => clips.push(clip),
            Ok(Err(failure)) => failures.push(failure),
            Err(e) => failures.push(RenderFailure {
                index,
                start_ms,
                end_ms,
                cause: format!("rendering task panicked: {e}"),
            }),
        }
    }

    Ok((clips, failures))
}

/// Render a single cue: optional sanitization, then synthesis.
///
/// Every error is captured as a [`RenderFailure`] here; nothing escapes the
/// unit boundary, so a failing cue never disturbs its siblings.
async fn render_unit<B>(
    backend: &B,
    cue: &Cue,
    voice: &str,
    format: AudioFormat,
    speed: f32,
    sanitize_text: bool,
) -> Result<RenderedClip, RenderFailure>
where
    B: SpeechBackend + ?Sized,
{
    let fail = |cause: String| {
        warn!(index = cue.index, %cause, "cue failed");
        RenderFailure {
            index: cue.index,
            start_ms: cue.start_ms,
            end_ms: cue.end_ms,
            cause,
        }
    };

    let text = if sanitize_text {
        sanitize::sanitize(&cue.text).map_err(|e| fail(e.to_string()))?
    } else {
        cue.text.clone()
    };

    let path = backend
        .synthesize(&text, voice, format, speed)
        .await
        .map_err(|e| fail(e.to_string()))?;

    debug!(index = cue.index, path = %path.display(), "cue rendered");

    Ok(RenderedClip {
        index: cue.index,
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::TtsError;
    use async_trait::async_trait;
    use std::fs::File;
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted backend: the artifact content is derived from the text, a
    /// cue whose text contains "fail" errors out, and one containing "slow"
    /// sleeps so completion order differs from submission order.
    struct MockBackend {
        created: Mutex<Vec<PathBuf>>,
        calls: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                created: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
            }
        }

        fn audio_for(text: &str) -> Vec<u8> {
            format!("audio:{text}").into_bytes()
        }
    }

    #[async_trait]
    impl SpeechBackend for MockBackend {
        async fn synthesize(
            &self,
            text: &str,
            _voice: &str,
            format: AudioFormat,
            _speed: f32,
        ) -> Result<PathBuf, TtsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);

            if text.contains("slow") {
                tokio::time::sleep(Duration::from_millis(50)).await;
            } else {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }

            self.running.fetch_sub(1, Ordering::SeqCst);

            if text.contains("fail") {
                return Err(TtsError::Backend {
                    status: 500,
                    message: "induced failure".into(),
                });
            }

            let file = tempfile::Builder::new()
                .suffix(&format!(".{}", format.extension()))
                .tempfile()
                .unwrap();
            let (_, path) = file.keep().unwrap();
            std::fs::write(&path, Self::audio_for(text)).unwrap();
            self.created.lock().unwrap().push(path.clone());
            Ok(path)
        }
    }

    fn options(max_workers: usize) -> RenderOptions {
        RenderOptions {
            voice: "alloy".into(),
            format: AudioFormat::Wav,
            speed: 1.0,
            sanitize: false,
            max_workers,
        }
    }

    fn archive_entries(path: &std::path::Path) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                let mut bytes = Vec::new();
                entry.read_to_end(&mut bytes).unwrap();
                (entry.name().to_string(), bytes)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_success_produces_ordered_archive() {
        let backend = Arc::new(MockBackend::new());
        // Index 3 is submitted first but finishes last; the archive must
        // still be ascending.
        let cues = vec![
            Cue::new(3, 4000, 5000, "slow third"),
            Cue::new(1, 0, 1000, "first"),
            Cue::new(2, 2000, 3000, "second"),
        ];

        let outcome = render_batch(backend, cues, &options(4)).await.unwrap();
        assert_eq!(outcome.clip_count, 3);

        let entries = archive_entries(&outcome.archive_path);
        let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["0001.wav", "0002.wav", "0003.wav"]);

        std::fs::remove_file(&outcome.archive_path).unwrap();
    }

    #[tokio::test]
    async fn test_entry_bytes_round_trip() {
        let backend = Arc::new(MockBackend::new());
        let cues = vec![Cue::new(3, 0, 1000, "hello there")];

        let outcome = render_batch(backend, cues, &options(2)).await.unwrap();
        let entries = archive_entries(&outcome.archive_path);

        assert_eq!(entries[0].0, "0003.wav");
        assert_eq!(entries[0].1, MockBackend::audio_for("hello there"));

        std::fs::remove_file(&outcome.archive_path).unwrap();
    }

    #[tokio::test]
    async fn test_artifacts_deleted_after_archiving() {
        let backend = Arc::new(MockBackend::new());
        let cues = vec![Cue::new(1, 0, 1000, "one"), Cue::new(2, 1000, 2000, "two")];

        let outcome = render_batch(Arc::clone(&backend), cues, &options(2))
            .await
            .unwrap();

        for path in backend.created.lock().unwrap().iter() {
            assert!(!path.exists(), "artifact {} should be gone", path.display());
        }

        std::fs::remove_file(&outcome.archive_path).unwrap();
    }

    #[tokio::test]
    async fn test_single_failure_fails_whole_batch() {
        let backend = Arc::new(MockBackend::new());
        let cues = vec![
            Cue::new(4, 0, 1000, "fine"),
            Cue::new(5, 1500, 2500, "this will fail"),
            Cue::new(6, 3000, 4000, "also fine"),
        ];

        let err = render_batch(Arc::clone(&backend), cues, &options(4))
            .await
            .unwrap_err();

        match &err {
            BatchError::Failures(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].index, 5);
                assert_eq!(failures[0].start_ms, 1500);
                assert_eq!(failures[0].end_ms, 2500);
                assert!(failures[0].cause.contains("induced failure"));
            }
            other => panic!("expected Failures, got {other:?}"),
        }

        // Failure report names the cue and its time range.
        let message = err.to_string();
        assert!(message.contains("cue 5"));
        assert!(message.contains("00:00:01,500 -> 00:00:02,500"));

        // All three units ran; no early cancellation.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);

        // The two successful artifacts must not be orphaned.
        for path in backend.created.lock().unwrap().iter() {
            assert!(!path.exists(), "orphan left behind: {}", path.display());
        }
    }

    #[tokio::test]
    async fn test_zero_workers_rejected_before_any_unit() {
        let backend = Arc::new(MockBackend::new());
        let cues = vec![Cue::new(1, 0, 1000, "never rendered")];

        let err = render_batch(Arc::clone(&backend), cues, &options(0))
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::InvalidWorkerCount(0)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_worker_limit_respected() {
        let backend = Arc::new(MockBackend::new());
        let cues: Vec<Cue> = (1..=8)
            .map(|i| Cue::new(i, u64::from(i) * 1000, u64::from(i) * 1000 + 500, "slow cue"))
            .collect();

        let outcome = render_batch(Arc::clone(&backend), cues, &options(2))
            .await
            .unwrap();

        assert!(backend.max_running.load(Ordering::SeqCst) <= 2);
        std::fs::remove_file(&outcome.archive_path).unwrap();
    }

    #[tokio::test]
    async fn test_concurrency_does_not_affect_output() {
        let cues: Vec<Cue> = (1..=5)
            .map(|i| Cue::new(i, u64::from(i) * 1000, u64::from(i) * 1000 + 800, format!("cue number {i}")))
            .collect();

        let serial = render_batch(Arc::new(MockBackend::new()), cues.clone(), &options(1))
            .await
            .unwrap();
        let parallel = render_batch(Arc::new(MockBackend::new()), cues, &options(8))
            .await
            .unwrap();

        let serial_entries = archive_entries(&serial.archive_path);
        let parallel_entries = archive_entries(&parallel.archive_path);
        assert_eq!(serial_entries, parallel_entries);

        std::fs::remove_file(&serial.archive_path).unwrap();
        std::fs::remove_file(&parallel.archive_path).unwrap();
    }

    #[tokio::test]
    async fn test_sanitize_failure_is_a_render_failure() {
        let backend = Arc::new(MockBackend::new());
        let cues = vec![Cue::new(1, 0, 1000, "<i></i>")];
        let mut opts = options(2);
        opts.sanitize = true;

        let err = render_batch(backend, cues, &opts).await.unwrap_err();
        match err {
            BatchError::Failures(failures) => {
                assert_eq!(failures[0].index, 1);
                assert!(failures[0].cause.contains("no speakable text"));
            }
            other => panic!("expected Failures, got {other:?}"),
        }
    }

    #[test]
    fn test_default_worker_count_is_positive() {
        assert!(default_worker_count() >= 1);
    }
}
