//! SRT subtitle parsing
//!
//! Produces the ordered cue sequence the renderer fans out. Only `SubRip`
//! (.srt) input is supported; the parser is deliberately lenient about
//! stray blank lines and skips blocks whose first line is not a sequence
//! number, but a malformed timestamp line is an error.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

/// Subtitle parsing errors
#[derive(Error, Debug)]
pub enum SubtitleError {
    #[error("invalid timestamp line: {0}")]
    InvalidTimestampLine(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("no cues found in subtitle input")]
    Empty,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One timed subtitle line.
///
/// The index comes from the SRT sequence number and is unique but not
/// necessarily contiguous; archive entries are named after it, so it is
/// preserved rather than renumbered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cue {
    /// SRT sequence number
    pub index: u32,
    /// Start time in milliseconds
    pub start_ms: u64,
    /// End time in milliseconds
    pub end_ms: u64,
    /// Cue text (may contain newlines)
    pub text: String,
}

impl Cue {
    /// Create a new cue
    #[must_use]
    pub fn new(index: u32, start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            index,
            start_ms,
            end_ms,
            text: text.into(),
        }
    }

    /// Format a millisecond offset as an SRT timestamp (HH:MM:SS,mmm)
    #[must_use]
    pub fn format_time(ms: u64) -> String {
        let hours = ms / 3_600_000;
        let minutes = (ms % 3_600_000) / 60_000;
        let seconds = (ms % 60_000) / 1000;
        let millis = ms % 1000;
        format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
    }

    /// Human-readable time range, used in failure reports
    #[must_use]
    pub fn time_range(start_ms: u64, end_ms: u64) -> String {
        format!(
            "{} -> {}",
            Self::format_time(start_ms),
            Self::format_time(end_ms)
        )
    }
}

/// Parse SRT file content into cues
pub fn parse_srt(content: &str) -> Result<Vec<Cue>, SubtitleError> {
    let mut cues = Vec::new();
    let mut lines = content.lines().peekable();

    while lines.peek().is_some() {
        // Skip empty lines between blocks
        while lines.peek().is_some_and(|l| l.trim().is_empty()) {
            lines.next();
        }

        let seq_line = match lines.next() {
            Some(l) => l,
            None => break,
        };

        // Blocks that do not start with a sequence number are skipped,
        // matching how permissive players treat stray text.
        let index: u32 = match seq_line.trim().parse() {
            Ok(n) => n,
            Err(_) => continue,
        };

        let time_line = match lines.next() {
            Some(l) => l,
            None => break,
        };

        let (start_ms, end_ms) = parse_timestamp_line(time_line)?;

        // Text lines run until the blank separator
        let mut text_lines = Vec::new();
        while lines.peek().is_some_and(|l| !l.trim().is_empty()) {
            if let Some(line) = lines.next() {
                text_lines.push(line);
            }
        }

        cues.push(Cue::new(index, start_ms, end_ms, text_lines.join("\n")));
    }

    if cues.is_empty() {
        return Err(SubtitleError::Empty);
    }

    Ok(cues)
}

/// Read and parse an SRT file from disk
pub async fn parse_srt_file(path: &Path) -> Result<Vec<Cue>, SubtitleError> {
    let content = fs::read_to_string(path).await?;
    parse_srt(&content)
}

/// Parse an SRT timestamp line "HH:MM:SS,mmm --> HH:MM:SS,mmm"
fn parse_timestamp_line(line: &str) -> Result<(u64, u64), SubtitleError> {
    let parts: Vec<&str> = line.split("-->").collect();
    if parts.len() != 2 {
        return Err(SubtitleError::InvalidTimestampLine(line.to_string()));
    }

    let start = parse_timestamp(parts[0].trim())?;
    let end = parse_timestamp(parts[1].trim())?;

    Ok((start, end))
}

/// Parse an SRT timestamp "HH:MM:SS,mmm" to milliseconds
fn parse_timestamp(ts: &str) -> Result<u64, SubtitleError> {
    let parts: Vec<&str> = ts.split(&[',', ':'][..]).collect();
    if parts.len() != 4 {
        return Err(SubtitleError::InvalidTimestamp(ts.to_string()));
    }

    let mut fields = [0u64; 4];
    for (slot, part) in fields.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse()
            .map_err(|_| SubtitleError::InvalidTimestamp(ts.to_string()))?;
    }

    let [hours, minutes, seconds, millis] = fields;
    Ok(hours * 3_600_000 + minutes * 60_000 + seconds * 1000 + millis)
}
