//! Deterministic clip packaging
//!
//! Packs a fully successful batch into one deflate-compressed zip. Entry
//! names are `{index:04}.{ext}` and entries are written in ascending cue
//! index order no matter what order the units finished in. Each source
//! artifact is deleted right after it is packed; a source that already
//! vanished is tolerated.

use std::io::Write;
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::render::RenderedClip;
use crate::tts::AudioFormat;

/// Packaging errors
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Deterministic entry name for one clip
#[must_use]
pub fn entry_name(index: u32, format: AudioFormat) -> String {
    format!("{index:04}.{}", format.extension())
}

/// Package clips into a zip bundle, returning its path and entry count.
///
/// Only called for batches with zero failures - a partial archive is never
/// produced. The archive file is allocated in the system temp directory and
/// persisted; the caller owns it from here on.
pub fn package_clips(
    clips: &[RenderedClip],
    format: AudioFormat,
) -> Result<(PathBuf, usize), ArchiveError> {
    let (file, archive_path) = tempfile::Builder::new()
        .prefix("cuecast-bundle-")
        .suffix(".zip")
        .tempfile()?
        .keep()
        .map_err(|e| ArchiveError::Io(e.error))?;

    let mut sorted: Vec<&RenderedClip> = clips.iter().collect();
    sorted.sort_by_key(|clip| clip.index);

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut writer = ZipWriter::new(file);
    for clip in &sorted {
        let content = std::fs::read(&clip.path)?;
        writer.start_file(entry_name(clip.index, format), options)?;
        writer.write_all(&content)?;

        // Ownership has transferred to the archive; a missing source is fine.
        let _ = std::fs::remove_file(&clip.path);

        debug!(index = clip.index, bytes = content.len(), "packed clip");
    }
    writer.finish()?;

    Ok((archive_path, sorted.len()))
}
