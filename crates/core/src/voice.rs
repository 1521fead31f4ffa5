use crate::error::{CaptureError, RecognitionError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PHRASE_LIMIT: Duration = Duration::from_secs(30);
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
pub const DEFAULT_SPEECH_URL: &str = "https://speech.googleapis.com/v1/";
pub const DEFAULT_LANGUAGE: &str = "en-US";

pub const LISTENING_MESSAGE: &str = "Listening... Speak now!";
pub const UNINTELLIGIBLE_MESSAGE: &str = "Could not understand the audio";
pub const UNREACHABLE_MESSAGE: &str = "Could not request results, check your internet connection";

/// Mono 16-bit little-endian PCM without a header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedAudio {
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
}

#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Returns `None` when nobody started speaking within `timeout`.
    async fn listen(&self, timeout: Duration) -> Result<Option<CapturedAudio>, CaptureError>;
}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn recognize(&self, audio: &CapturedAudio) -> Result<String, RecognitionError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderConfig {
    pub program: String,
    pub args: Vec<String>,
    pub sample_rate: u32,
    pub phrase_limit: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            program: "rec".to_string(),
            args: sox_args(DEFAULT_SAMPLE_RATE),
            sample_rate: DEFAULT_SAMPLE_RATE,
            phrase_limit: DEFAULT_PHRASE_LIMIT,
        }
    }
}

/// sox `rec` arguments: raw mono PCM on stdout, held back until the input
/// rises above the silence threshold and stopped after a second and a half
/// of quiet.
pub fn sox_args(sample_rate: u32) -> Vec<String> {
    [
        "-q",
        "-c",
        "1",
        "-r",
        &sample_rate.to_string(),
        "-b",
        "16",
        "-e",
        "signed-integer",
        "-t",
        "raw",
        "-",
        "silence",
        "1",
        "0.1",
        "3%",
        "1",
        "1.5",
        "3%",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect()
}

/// Records from the default microphone through an external recorder program.
/// The first bytes on its stdout mark the start of speech.
#[derive(Debug, Clone, Default)]
pub struct CommandAudioSource {
    config: RecorderConfig,
}

impl CommandAudioSource {
    pub fn new(config: RecorderConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AudioSource for CommandAudioSource {
    async fn listen(&self, timeout: Duration) -> Result<Option<CapturedAudio>, CaptureError> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CaptureError::Spawn {
                program: self.config.program.clone(),
                source,
            })?;
        let mut stdout = child.stdout.take().ok_or(CaptureError::NoOutput)?;

        let mut buffer = [0u8; 4096];
        let first = match tokio::time::timeout(timeout, stdout.read(&mut buffer)).await {
            Ok(read) => read?,
            Err(_) => {
                debug!(?timeout, "no speech before timeout");
                let _ = child.kill().await;
                return Ok(None);
            }
        };
        if first == 0 {
            let _ = child.wait().await;
            return Ok(None);
        }

        let mut pcm = buffer[..first].to_vec();
        match tokio::time::timeout(self.config.phrase_limit, stdout.read_to_end(&mut pcm)).await {
            Ok(read) => {
                read?;
                let _ = child.wait().await;
            }
            Err(_) => {
                debug!(limit = ?self.config.phrase_limit, "phrase limit reached");
                let _ = child.kill().await;
            }
        }

        Ok(Some(CapturedAudio {
            pcm,
            sample_rate: self.config.sample_rate,
        }))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognizeRequest<'a> {
    config: RecognitionConfig<'a>,
    audio: RecognitionAudio,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionConfig<'a> {
    encoding: &'static str,
    sample_rate_hertz: u32,
    language_code: &'a str,
}

#[derive(Debug, Serialize)]
struct RecognitionAudio {
    content: String,
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognitionResult>,
}

#[derive(Debug, Deserialize)]
struct RecognitionResult {
    #[serde(default)]
    alternatives: Vec<RecognitionAlternative>,
}

#[derive(Debug, Deserialize)]
struct RecognitionAlternative {
    #[serde(default)]
    transcript: String,
}

pub struct GoogleSpeechRecognizer {
    http: Client,
    endpoint: Url,
    api_key: String,
    language: String,
}

impl std::fmt::Debug for GoogleSpeechRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleSpeechRecognizer")
            .field("endpoint", &self.endpoint.as_str())
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

impl GoogleSpeechRecognizer {
    pub fn new(
        api_key: impl Into<String>,
        base_url: &str,
        language: impl Into<String>,
    ) -> Result<Self, url::ParseError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            http: Client::new(),
            endpoint: base.join("speech:recognize")?,
            api_key: api_key.into(),
            language: language.into(),
        })
    }

    fn request<'a>(&'a self, audio: &CapturedAudio) -> RecognizeRequest<'a> {
        RecognizeRequest {
            config: RecognitionConfig {
                encoding: "LINEAR16",
                sample_rate_hertz: audio.sample_rate,
                language_code: &self.language,
            },
            audio: RecognitionAudio {
                content: STANDARD.encode(&audio.pcm),
            },
        }
    }
}

fn best_transcript(response: RecognizeResponse) -> Option<String> {
    let transcript = response
        .results
        .into_iter()
        .filter_map(|result| result.alternatives.into_iter().next())
        .map(|alternative| alternative.transcript.trim().to_string())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if transcript.is_empty() {
        None
    } else {
        Some(transcript)
    }
}

#[async_trait]
impl SpeechRecognizer for GoogleSpeechRecognizer {
    async fn recognize(&self, audio: &CapturedAudio) -> Result<String, RecognitionError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request(audio))
            .send()
            .await
            .map_err(|error| RecognitionError::Unreachable(error.to_string()))?;

        if !response.status().is_success() {
            return Err(RecognitionError::Unreachable(format!(
                "speech service returned {}",
                response.status()
            )));
        }

        let parsed: RecognizeResponse = response
            .json()
            .await
            .map_err(|error| RecognitionError::Unreachable(error.to_string()))?;

        best_transcript(parsed).ok_or(RecognitionError::Unintelligible)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceStatus {
    Recognized,
    Unintelligible,
    Unreachable(String),
    MicrophoneUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceOutcome {
    pub text: String,
    pub status: VoiceStatus,
}

impl VoiceOutcome {
    fn failed(status: VoiceStatus) -> Self {
        Self {
            text: String::new(),
            status,
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.status == VoiceStatus::Recognized
    }

    pub fn message(&self) -> String {
        match &self.status {
            VoiceStatus::Recognized => format!("Recognized Speech: {}", self.text),
            VoiceStatus::Unintelligible => UNINTELLIGIBLE_MESSAGE.to_string(),
            VoiceStatus::Unreachable(_) => UNREACHABLE_MESSAGE.to_string(),
            VoiceStatus::MicrophoneUnavailable(details) => {
                format!("Microphone unavailable: {details}")
            }
        }
    }
}

/// Turns one utterance into a question. Never fails: every problem becomes an
/// empty transcript plus a status.
pub struct VoiceInput {
    source: Arc<dyn AudioSource>,
    recognizer: Arc<dyn SpeechRecognizer>,
    listen_timeout: Duration,
}

impl VoiceInput {
    pub fn new(source: Arc<dyn AudioSource>, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        Self {
            source,
            recognizer,
            listen_timeout: DEFAULT_LISTEN_TIMEOUT,
        }
    }

    pub fn with_listen_timeout(mut self, timeout: Duration) -> Self {
        self.listen_timeout = timeout;
        self
    }

    pub async fn listen(&self) -> VoiceOutcome {
        info!("{LISTENING_MESSAGE}");

        let audio = match self.source.listen(self.listen_timeout).await {
            Ok(Some(audio)) => audio,
            Ok(None) => return VoiceOutcome::failed(VoiceStatus::Unintelligible),
            Err(error) => {
                warn!(error = %error, "microphone capture failed");
                return VoiceOutcome::failed(VoiceStatus::MicrophoneUnavailable(error.to_string()));
            }
        };

        match self.recognizer.recognize(&audio).await {
            Ok(text) => VoiceOutcome {
                text,
                status: VoiceStatus::Recognized,
            },
            Err(RecognitionError::Unintelligible) => {
                VoiceOutcome::failed(VoiceStatus::Unintelligible)
            }
            Err(RecognitionError::Unreachable(details)) => {
                warn!(details = %details, "speech recognition request failed");
                VoiceOutcome::failed(VoiceStatus::Unreachable(details))
            }
        }
    }
}
