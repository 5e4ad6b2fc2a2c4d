//! TTS service client.
//!
//! The narration synthesis stage talks to an external speech service over
//! HTTP. Transient failures (5xx, transport) are retried with backoff;
//! client errors are permanent and fail the stage without retry.

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use estudio_models::NarrationSegment;

use crate::retry::{retry_async_if, RetryConfig};

/// Errors from the TTS service.
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("TTS request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("TTS service unavailable ({status})")]
    Unavailable { status: u16 },

    #[error("TTS transport error: {0}")]
    Transport(String),
}

impl TtsError {
    /// Whether retrying cannot help (bad request, invalid voice).
    pub fn is_permanent(&self) -> bool {
        matches!(self, TtsError::Rejected { .. })
    }
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice: &'a str,
    language: &'a str,
    speaking_rate: f64,
    pitch: f64,
    audio_encoding: &'static str,
}

/// HTTP client for the TTS service.
#[derive(Debug, Clone)]
pub struct TtsClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

impl TtsClient {
    /// Create a client for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            retry: RetryConfig::new("tts_synthesize"),
        }
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Synthesize one narration segment. Returns encoded audio bytes (MP3).
    pub async fn synthesize(&self, segment: &NarrationSegment) -> Result<Vec<u8>, TtsError> {
        let url = format!("{}/v1/synthesize", self.base_url);

        retry_async_if(
            &self.retry,
            || async {
            let request = SynthesizeRequest {
                text: &segment.text,
                voice: &segment.voice,
                language: &segment.language,
                speaking_rate: segment.speaking_rate,
                pitch: segment.pitch,
                audio_encoding: "MP3",
            };

                let response = self
                    .http
                    .post(&url)
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| TtsError::Transport(e.to_string()))?;

                let status = response.status();
                if status.is_client_error() {
                    let message = response.text().await.unwrap_or_default();
                    return Err(TtsError::Rejected {
                        status: status.as_u16(),
                        message,
                    });
                }
                if !status.is_success() {
                    return Err(TtsError::Unavailable {
                        status: status.as_u16(),
                    });
                }

                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| TtsError::Transport(e.to_string()))?;

                debug!(
                    voice = %segment.voice,
                    bytes = bytes.len(),
                    "Synthesized narration segment"
                );
                Ok(bytes.to_vec())
            },
            |e| !e.is_permanent(),
        )
        .await
    }

    /// Check service health.
    pub async fn health(&self) -> Result<(), TtsError> {
        let url = format!("{}/healthz", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| TtsError::Transport(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(TtsError::Unavailable {
                status: response.status().as_u16(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn segment() -> NarrationSegment {
        NarrationSegment {
            scene_id: "s1".into(),
            text: "Bem-vindo ao treinamento de segurança.".into(),
            voice: "pt-BR-Neural2-A".into(),
            language: "pt-BR".into(),
            speaking_rate: 1.0,
            pitch: 0.0,
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::new("tts_test")
            .with_base_delay(Duration::from_millis(1))
            .with_max_retries(2)
    }

    #[tokio::test]
    async fn test_synthesize_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/synthesize"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3fake-mp3".to_vec()))
            .mount(&server)
            .await;

        let client = TtsClient::new(server.uri()).with_retry(fast_retry());
        let audio = client.synthesize(&segment()).await.unwrap();
        assert_eq!(&audio[..3], b"ID3");
    }

    #[tokio::test]
    async fn test_synthesize_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/synthesize"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/synthesize"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"audio".to_vec()))
            .mount(&server)
            .await;

        let client = TtsClient::new(server.uri()).with_retry(fast_retry());
        let audio = client.synthesize(&segment()).await.unwrap();
        assert_eq!(audio, b"audio");
    }

    #[tokio::test]
    async fn test_synthesize_client_error_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/synthesize"))
            .respond_with(ResponseTemplate::new(400).set_body_string("unknown voice"))
            .expect(1)
            .mount(&server)
            .await;

        let client = TtsClient::new(server.uri()).with_retry(fast_retry());
        let err = client.synthesize(&segment()).await.unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_health() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/healthz"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = TtsClient::new(server.uri());
        assert!(client.health().await.is_ok());
    }
}
