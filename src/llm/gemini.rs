//! Gemini REST client.
//!
//! One analysis is three steps: a resumable upload of the video to the Files
//! API, polling the uploaded file until server-side processing finishes, and
//! a single `generateContent` request referencing the file and the prompt.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::AnalysisService;
use crate::error::AnalysisError;

/// Environment variable holding the API key.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Default Gemini API endpoint.
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// API version path segment.
const API_VERSION: &str = "v1beta";

/// Request timeout in seconds. Uploads and video generation are slow.
const REQUEST_TIMEOUT_SECS: u64 = 600;

/// Interval between file-state polls.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

const VIDEO_MIME_TYPE: &str = "video/mp4";

/// Server-side processing state of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    Processing,
    Active,
    Failed,
    /// `STATE_UNSPECIFIED` and any state this client does not know.
    #[serde(other)]
    StateUnspecified,
}

/// Metadata of an uploaded file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub name: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub state: Option<FileState>,
}

impl UploadedFile {
    fn is_processing(&self) -> bool {
        self.state == Some(FileState::Processing)
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Debug, Serialize)]
struct UploadStart<'a> {
    file: UploadStartFile<'a>,
}

#[derive(Debug, Serialize)]
struct UploadStartFile<'a> {
    display_name: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    File { file_data: FileData<'a> },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct FileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Client for the Gemini API.
///
/// Holds its HTTP connection pool, so one client should be reused for every
/// episode a worker handles.
pub struct GeminiClient {
    /// HTTP client for making API requests.
    client: Client,
    /// API key sent as `x-goog-api-key`.
    api_key: String,
    /// Base URL, without version segment.
    base_url: String,
    /// Model identifier, e.g. `gemini-2.5-pro`.
    model: String,
    /// Delay between file-state polls.
    poll_interval: Duration,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    /// Creates a client with an explicit key.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Gemini API key
    /// * `model` - Model identifier
    /// * `base_url` - Override for the API endpoint, mainly for proxies and tests
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::MissingApiKey` for an empty key, or
    /// `AnalysisError::RequestFailed` if the HTTP client cannot be built.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: Option<&str>,
    ) -> Result<Self, AnalysisError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AnalysisError::MissingApiKey);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AnalysisError::RequestFailed(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url
                .unwrap_or(GEMINI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.into(),
            poll_interval: POLL_INTERVAL,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Creates a client reading the key from `GEMINI_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::MissingApiKey` if the variable is unset or empty.
    pub fn from_env(model: impl Into<String>, base_url: Option<&str>) -> Result<Self, AnalysisError> {
        let api_key = std::env::var(GEMINI_API_KEY_ENV).map_err(|_| AnalysisError::MissingApiKey)?;
        Self::new(api_key, model, base_url)
    }

    /// Returns true if an API key is available in the environment.
    pub fn credentials_available() -> bool {
        std::env::var(GEMINI_API_KEY_ENV)
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Uploads a video with the resumable upload protocol.
    pub async fn upload_video(&self, path: &Path) -> Result<UploadedFile, AnalysisError> {
        let bytes = tokio::fs::read(path).await?;
        let display_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("episode.mp4");

        let start_url = format!("{}/upload/{API_VERSION}/files", self.base_url);
        let start = self
            .client
            .post(&start_url)
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", VIDEO_MIME_TYPE)
            .json(&UploadStart {
                file: UploadStartFile { display_name },
            })
            .send()
            .await
            .map_err(|e| AnalysisError::RequestFailed(e.to_string()))?;
        let start = check_status(start).await?;

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| AnalysisError::ParseError("upload start returned no upload URL".to_string()))?;

        let size = bytes.len();
        let response = self
            .client
            .post(&upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await
            .map_err(|e| AnalysisError::RequestFailed(e.to_string()))?;
        let response = check_status(response).await?;

        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::ParseError(format!("Failed to parse upload response: {e}")))?;
        debug!(file = %uploaded.file.name, bytes = size, "Video uploaded");
        Ok(uploaded.file)
    }

    /// Fetches current metadata of an uploaded file.
    pub async fn get_file(&self, name: &str) -> Result<UploadedFile, AnalysisError> {
        let url = format!("{}/{API_VERSION}/{name}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| AnalysisError::RequestFailed(e.to_string()))?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| AnalysisError::ParseError(format!("Failed to parse file metadata: {e}")))
    }

    /// Polls until the file leaves the `PROCESSING` state.
    ///
    /// There is no upper bound on the wait.
    pub async fn wait_until_processed(&self, mut file: UploadedFile) -> Result<UploadedFile, AnalysisError> {
        while file.is_processing() {
            tokio::time::sleep(self.poll_interval).await;
            file = self.get_file(&file.name).await?;
        }
        if file.state == Some(FileState::Failed) {
            return Err(AnalysisError::FileProcessingFailed { name: file.name });
        }
        Ok(file)
    }

    /// Issues one `generateContent` request over an uploaded file.
    pub async fn generate(&self, file: &UploadedFile, prompt: &str) -> Result<String, AnalysisError> {
        let url = format!(
            "{}/{API_VERSION}/models/{}:generateContent",
            self.base_url, self.model
        );
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::File {
                        file_data: FileData {
                            mime_type: file.mime_type.as_deref().unwrap_or(VIDEO_MIME_TYPE),
                            file_uri: &file.uri,
                        },
                    },
                    Part::Text { text: prompt },
                ],
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalysisError::RequestFailed(e.to_string()))?;
        let response = check_status(response).await?;

        let body = response
            .text()
            .await
            .map_err(|e| AnalysisError::RequestFailed(e.to_string()))?;
        response_text(&body)
    }
}

#[async_trait]
impl AnalysisService for GeminiClient {
    async fn analyze_episode(&self, video: &Path, prompt: &str) -> Result<String, AnalysisError> {
        let started = Instant::now();
        let uploaded = self.upload_video(video).await?;
        let file = self.wait_until_processed(uploaded).await?;
        let text = self.generate(&file, prompt).await?;
        info!(
            video = %video.display(),
            model = %self.model,
            duration_secs = started.elapsed().as_secs_f64(),
            "Gemini call completed"
        );
        Ok(text)
    }
}

/// Converts a non-success response into `AnalysisError::ApiError`.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AnalysisError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error response".to_string());
    let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
        .map(|e| e.error.message)
        .unwrap_or(error_text);
    Err(AnalysisError::ApiError {
        code: status.as_u16(),
        message,
    })
}

/// Concatenates the text parts of the first candidate.
fn response_text(body: &str) -> Result<String, AnalysisError> {
    let response: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| AnalysisError::ParseError(format!("Failed to parse generate response: {e}")))?;
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(AnalysisError::EmptyResponse);
    }
    Ok(text)
}
