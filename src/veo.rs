//! Video generation adapter: submits a Veo long-running operation, polls it to
//! completion, downloads the result and parks it in the session media store.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};

use crate::config::GeminiConfig;
use crate::constants::{DEFAULT_VIDEO_MIME, VIDEO_ASPECT_RATIO, VIDEO_COUNT, VIDEO_RESOLUTION};
use crate::credentials::ApiKeySource;
use crate::error::{FitStreamError, Result};
use crate::media::MediaStore;
use crate::message::GeneratedVideo;

#[async_trait]
pub trait VideoBackend: Send + Sync {
    /// Generate a video for `prompt` and return a session-local handle to it.
    async fn generate_video(&self, prompt: &str) -> Result<GeneratedVideo>;
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    instances: Vec<Instance<'a>>,
    parameters: Parameters,
}

#[derive(Serialize)]
struct Instance<'a> {
    prompt: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Parameters {
    sample_count: u32,
    resolution: &'static str,
    aspect_ratio: &'static str,
}

/// Long-running operation as reported by the API.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct VideoOperation {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    error: Option<OperationStatus>,
    response: Option<OperationResponse>,
}

#[derive(Deserialize, Debug, Clone)]
struct OperationStatus {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct GenerateVideoResponse {
    #[serde(default, alias = "generatedVideos")]
    generated_samples: Vec<GeneratedSample>,
}

#[derive(Deserialize, Debug, Clone)]
struct GeneratedSample {
    video: Option<VideoRef>,
}

#[derive(Deserialize, Debug, Clone)]
struct VideoRef {
    uri: Option<String>,
}

impl VideoOperation {
    /// Remote locator of the first generated video, once the operation is done.
    pub fn download_uri(&self) -> Option<&str> {
        self.response
            .as_ref()?
            .generate_video_response
            .as_ref()?
            .generated_samples
            .first()?
            .video
            .as_ref()?
            .uri
            .as_deref()
            .filter(|u| !u.is_empty())
    }

    fn failure(&self) -> Option<FitStreamError> {
        self.error.as_ref().map(|status| FitStreamError::Operation {
            name: self.name.clone(),
            message: status.message.clone(),
        })
    }
}

/// Append the API key as a `key` query parameter.
pub fn with_key_param(locator: &str, api_key: &str) -> Result<Url> {
    let mut url = Url::parse(locator)
        .map_err(|e| FitStreamError::Malformed(format!("invalid video URI {}: {}", locator, e)))?;
    url.query_pairs_mut().append_pair("key", api_key);
    Ok(url)
}

/// Veo video generation over the Gemini REST API.
pub struct VeoVideo {
    config: GeminiConfig,
    api_key: Arc<dyn ApiKeySource>,
    media: MediaStore,
}

impl VeoVideo {
    pub fn new(config: GeminiConfig, api_key: Arc<dyn ApiKeySource>, media: MediaStore) -> Self {
        Self {
            config,
            api_key,
            media,
        }
    }

    async fn submit(&self, client: &Client, api_key: &str, prompt: &str) -> Result<VideoOperation> {
        let endpoint = self.config.endpoint(&format!(
            "v1beta/models/{}:predictLongRunning",
            self.config.video_model
        ));
        let request = PredictRequest {
            instances: vec![Instance { prompt }],
            parameters: Parameters {
                sample_count: VIDEO_COUNT,
                resolution: VIDEO_RESOLUTION,
                aspect_ratio: VIDEO_ASPECT_RATIO,
            },
        };
        let response = client
            .post(&endpoint)
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| FitStreamError::http(&endpoint, e))?;
        Self::parse_operation(&endpoint, response).await
    }

    async fn refresh(&self, client: &Client, api_key: &str, name: &str) -> Result<VideoOperation> {
        let endpoint = self.config.endpoint(&format!("v1beta/{}", name));
        let response = client
            .get(&endpoint)
            .header("x-goog-api-key", api_key)
            .send()
            .await
            .map_err(|e| FitStreamError::http(&endpoint, e))?;
        Self::parse_operation(&endpoint, response).await
    }

    async fn parse_operation(endpoint: &str, response: reqwest::Response) -> Result<VideoOperation> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %body, "Veo API request failed");
            return Err(FitStreamError::from_api_body(status.as_u16(), &body));
        }
        response
            .json::<VideoOperation>()
            .await
            .map_err(|e| FitStreamError::Malformed(format!("operation from {}: {}", endpoint, e)))
    }

    /// Poll until the operation reports done. Sleeps once before every status
    /// query and returns the finished operation with the number of sleeps taken.
    async fn wait_for_completion(
        &self,
        client: &Client,
        api_key: &str,
        mut operation: VideoOperation,
    ) -> Result<(VideoOperation, u32)> {
        let started = Instant::now();
        let mut sleeps = 0u32;
        while !operation.done {
            if let Some(max_wait) = self.config.max_video_wait {
                if started.elapsed() + self.config.poll_interval > max_wait {
                    return Err(FitStreamError::Timeout(max_wait));
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
            sleeps += 1;
            operation = self.refresh(client, api_key, &operation.name).await?;
            debug!(operation = %operation.name, polls = sleeps, done = operation.done, "Polled video operation");
        }
        Ok((operation, sleeps))
    }

    async fn download(&self, client: &Client, api_key: &str, locator: &str) -> Result<GeneratedVideo> {
        let url = with_key_param(locator, api_key)?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| FitStreamError::http(locator, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FitStreamError::Download(status.as_u16()));
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| v.starts_with("video/"))
            .unwrap_or_else(|| DEFAULT_VIDEO_MIME.to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FitStreamError::http(locator, e))?;
        Ok(self.media.store(&bytes, &mime_type).await?)
    }

    async fn run(&self, prompt: &str) -> Result<(GeneratedVideo, u32)> {
        let api_key = self.api_key.api_key().ok_or(FitStreamError::MissingApiKey)?;
        // A fresh client per call so a newly selected key takes effect immediately.
        let client = Client::new();

        let operation = self.submit(&client, &api_key, prompt).await?;
        info!(operation = %operation.name, "Video generation submitted");

        let (operation, sleeps) = self.wait_for_completion(&client, &api_key, operation).await?;
        if let Some(err) = operation.failure() {
            return Err(err);
        }
        let locator = operation
            .download_uri()
            .ok_or(FitStreamError::NoVideoResult)?
            .to_string();

        let video = self.download(&client, &api_key, &locator).await?;
        Ok((video, sleeps))
    }

    /// Like [`VideoBackend::generate_video`], also reporting how many poll
    /// intervals were slept before the operation finished.
    pub async fn generate_video_with_polls(&self, prompt: &str) -> Result<(GeneratedVideo, u32)> {
        self.run(prompt).await.map_err(|e| {
            error!("Veo generation error: {}", e);
            e
        })
    }
}

#[async_trait]
impl VideoBackend for VeoVideo {
    #[instrument(skip(self), fields(model = %self.config.video_model))]
    async fn generate_video(&self, prompt: &str) -> Result<GeneratedVideo> {
        let (video, sleeps) = self.generate_video_with_polls(prompt).await?;
        info!(url = %video.url, polls = sleeps, "Video generation finished");
        Ok(video)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_download_uri_extraction() {
        let op: VideoOperation = serde_json::from_str(
            r#"{"name":"operations/1","done":true,"response":{"generateVideoResponse":
                {"generatedSamples":[{"video":{"uri":"https://files.example/v.mp4?alt=media"}}]}}}"#,
        )
        .unwrap();
        assert_eq!(op.download_uri(), Some("https://files.example/v.mp4?alt=media"));
    }

    #[test]
    fn test_download_uri_accepts_generated_videos_alias() {
        let op: VideoOperation = serde_json::from_str(
            r#"{"name":"operations/1","done":true,"response":{"generateVideoResponse":
                {"generatedVideos":[{"video":{"uri":"https://files.example/v.mp4"}}]}}}"#,
        )
        .unwrap();
        assert_eq!(op.download_uri(), Some("https://files.example/v.mp4"));
    }

    #[test]
    fn test_missing_result_and_failure() {
        let op: VideoOperation =
            serde_json::from_str(r#"{"name":"operations/2","done":true,"response":{}}"#).unwrap();
        assert!(op.download_uri().is_none());
        assert!(op.failure().is_none());

        let op: VideoOperation = serde_json::from_str(
            r#"{"name":"operations/3","done":true,"error":{"code":5,"message":"Requested entity was not found."}}"#,
        )
        .unwrap();
        let err = op.failure().unwrap();
        assert!(err.is_credential_failure());
    }

    #[test]
    fn test_pending_operation_defaults_to_not_done() {
        let op: VideoOperation = serde_json::from_str(r#"{"name":"operations/4"}"#).unwrap();
        assert!(!op.done);
    }

    #[test]
    fn test_key_param_appended_to_existing_query() {
        let url = with_key_param("https://files.example/v.mp4?alt=media", "secret").unwrap();
        assert_eq!(url.as_str(), "https://files.example/v.mp4?alt=media&key=secret");

        let url = with_key_param("https://files.example/v.mp4", "s e").unwrap();
        assert_eq!(url.as_str(), "https://files.example/v.mp4?key=s+e");

        assert!(with_key_param("not a url", "k").is_err());
    }

    #[test]
    fn test_predict_request_shape() {
        let request = PredictRequest {
            instances: vec![Instance { prompt: "yoga" }],
            parameters: Parameters {
                sample_count: VIDEO_COUNT,
                resolution: VIDEO_RESOLUTION,
                aspect_ratio: VIDEO_ASPECT_RATIO,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["instances"][0]["prompt"], "yoga");
        assert_eq!(json["parameters"]["sampleCount"], 1);
        assert_eq!(json["parameters"]["resolution"], "720p");
        assert_eq!(json["parameters"]["aspectRatio"], "16:9");
    }

    #[test]
    fn test_timeout_reports_limit() {
        let err = FitStreamError::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30s"));
    }
}
