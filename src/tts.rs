//! Speech synthesis backend
//!
//! The renderer talks to synthesis through the [`SpeechBackend`] trait so
//! the fan-out logic stays independent of any concrete engine. [`TtsClient`]
//! is the shipped implementation: an OpenAI-compatible HTTP API
//! (`POST /v1/audio/speech`) that returns raw audio bytes, which are parked
//! in a temp file owned by the pipeline until archived.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

/// Speech backend errors
#[derive(Error, Debug)]
pub enum TtsError {
    #[error("invalid API base URL: {0}")]
    InvalidApiBase(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output audio container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    /// MPEG layer III - small, universally supported
    #[default]
    Mp3,
    /// Uncompressed PCM WAV
    Wav,
    /// Opus in an Ogg container
    Opus,
    /// Advanced Audio Coding
    Aac,
    /// Free Lossless Audio Codec
    Flac,
}

impl AudioFormat {
    /// File extension for this format (doubles as the API's `response_format`)
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::Opus => "opus",
            Self::Aac => "aac",
            Self::Flac => "flac",
        }
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mp3" => Ok(Self::Mp3),
            "wav" => Ok(Self::Wav),
            "opus" => Ok(Self::Opus),
            "aac" => Ok(Self::Aac),
            "flac" => Ok(Self::Flac),
            other => Err(format!(
                "unsupported audio format '{other}' (expected mp3, wav, opus, aac, or flac)"
            )),
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// A speech synthesis engine.
///
/// Implementations own provider specifics (auth, batching limits, voice
/// naming); the contract is one audio artifact on disk per call, or an error.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Synthesize one cue's text to an audio file and return its path.
    ///
    /// The artifact belongs to the caller, which deletes it after archiving
    /// (or during batch cleanup).
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        format: AudioFormat,
        speed: f32,
    ) -> Result<PathBuf, TtsError>;
}

/// HTTP client for an OpenAI-compatible TTS server
pub struct TtsClient {
    client: Client,
    base: Url,
    model: Option<String>,
}

impl TtsClient {
    /// Create a client for the given API base URL (e.g. `http://localhost:5050`)
    pub fn new(api_base: &str) -> Result<Self, TtsError> {
        let base = Url::parse(api_base.trim_end_matches('/'))
            .map_err(|e| TtsError::InvalidApiBase(format!("{api_base}: {e}")))?;

        let client = Client::builder()
            // Synthesis calls block for the length of the generated clip,
            // so the request timeout is much longer than the connect one.
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            // Reuse connections across the batch fan-out
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()?;

        debug!("TTS client targeting {base}");

        Ok(Self {
            client,
            base,
            model: None,
        })
    }

    /// Select a specific model for synthesis requests
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, TtsError> {
        self.base
            .join(path)
            .map_err(|e| TtsError::InvalidApiBase(format!("{path}: {e}")))
    }

    /// List voice IDs offered by the backend (`GET /v1/audio/voices`)
    pub async fn voices(&self) -> Result<Vec<String>, TtsError> {
        let payload: serde_json::Value = self
            .client
            .get(self.endpoint("/v1/audio/voices")?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(extract_ids(&payload, "voices"))
    }

    /// List model IDs offered by the backend (`GET /v1/models`)
    pub async fn models(&self) -> Result<Vec<String>, TtsError> {
        let payload: serde_json::Value = self
            .client
            .get(self.endpoint("/v1/models")?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(extract_ids(&payload, "models"))
    }
}

/// Pull string or `{"id": ...}` entries out of a listing payload.
///
/// Servers disagree on whether listings are bare strings or objects, so
/// both shapes are accepted.
fn extract_ids(payload: &serde_json::Value, key: &str) -> Vec<String> {
    payload
        .get(key)
        .or_else(|| payload.get("data"))
        .and_then(serde_json::Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    entry
                        .as_str()
                        .or_else(|| entry.get("id").and_then(serde_json::Value::as_str))
                        .map(String::from)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl SpeechBackend for TtsClient {
    #[instrument(skip(self, text), fields(chars = text.len()))]
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        format: AudioFormat,
        speed: f32,
    ) -> Result<PathBuf, TtsError> {
        let mut body = json!({
            "input": text,
            "voice": voice,
            "response_format": format.extension(),
            "speed": speed,
        });
        if let Some(model) = &self.model {
            body["model"] = json!(model);
        }

        let response = self
            .client
            .post(self.endpoint("/v1/audio/speech")?)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TtsError::Backend {
                status: status.as_u16(),
                message: if message.is_empty() {
                    status.to_string()
                } else {
                    message
                },
            });
        }

        let audio = response.bytes().await?;
        debug!(bytes = audio.len(), "received audio");

        // Persisted temp file; ownership passes to the render pipeline.
        let (file, path) = tempfile::Builder::new()
            .prefix("cuecast-")
            .suffix(&format!(".{}", format.extension()))
            .tempfile()?
            .keep()
            .map_err(|e| TtsError::Io(e.error))?;
        drop(file);
        tokio::fs::write(&path, &audio).await?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_extension() {
        assert_eq!(AudioFormat::Mp3.extension(), "mp3");
        assert_eq!(AudioFormat::Flac.extension(), "flac");
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("WAV".parse::<AudioFormat>().unwrap(), AudioFormat::Wav);
        assert_eq!("opus".parse::<AudioFormat>().unwrap(), AudioFormat::Opus);
        assert!("ogg".parse::<AudioFormat>().is_err());
    }

    #[test]
    fn test_extract_ids_object_entries() {
        let payload = json!({"voices": [{"id": "alloy"}, {"id": "echo"}]});
        assert_eq!(extract_ids(&payload, "voices"), vec!["alloy", "echo"]);
    }

    #[test]
    fn test_extract_ids_string_entries() {
        let payload = json!({"voices": ["alloy", "echo"]});
        assert_eq!(extract_ids(&payload, "voices"), vec!["alloy", "echo"]);
    }

    #[test]
    fn test_extract_ids_data_fallback() {
        let payload = json!({"data": [{"id": "tts-1"}]});
        assert_eq!(extract_ids(&payload, "models"), vec!["tts-1"]);
    }

    #[test]
    fn test_invalid_api_base() {
        assert!(matches!(
            TtsClient::new("not a url"),
            Err(TtsError::InvalidApiBase(_))
        ));
    }
}
