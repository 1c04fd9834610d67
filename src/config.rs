use std::time::Duration;

use crate::constants;

/// Connection settings shared by the chat and video adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_base: String,
    pub chat_model: String,
    pub video_model: String,
    pub poll_interval: Duration,
    /// Upper bound on video polling. `None` polls until the operation finishes.
    pub max_video_wait: Option<Duration>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: constants::API_BASE.clone(),
            chat_model: constants::CHAT_MODEL.clone(),
            video_model: constants::VIDEO_MODEL.clone(),
            poll_interval: constants::POLL_INTERVAL,
            max_video_wait: None,
        }
    }
}

impl GeminiConfig {
    /// Join a path onto the API base without doubling slashes.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
