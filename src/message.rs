use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of recommended videos surfaced per model message.
pub const RECOMMENDED_VIDEO_LIMIT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// Correlation key for a placeholder message that is still being filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A web page cited by a grounded response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroundingSource {
    pub uri: String,
    pub title: String,
}

impl GroundingSource {
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            title: title.into(),
        }
    }

    /// Heuristic used to pick video links out of research citations.
    pub fn looks_like_video(&self) -> bool {
        self.uri.contains("youtube.com")
            || self.uri.contains("youtu.be")
            || self.title.to_lowercase().contains("video")
    }
}

/// Handle to a generated video that is only valid for the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedVideo {
    pub url: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<GroundingSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_video: Option<GeneratedVideo>,
}

impl Message {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: None,
            role,
            text: text.into(),
            timestamp: Utc::now(),
            is_streaming: false,
            is_error: false,
            sources: Vec::new(),
            generated_video: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, text)
    }

    /// Empty model message that a stream will fill in.
    pub fn placeholder(id: MessageId) -> Self {
        Self {
            id: Some(id),
            is_streaming: true,
            ..Self::new(Role::Model, String::new())
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::new(Role::Model, text)
        }
    }

    pub fn with_video(mut self, video: GeneratedVideo) -> Self {
        self.generated_video = Some(video);
        self
    }

    /// Sources deduplicated by URI. The first occurrence of a URI keeps its
    /// position; the last occurrence supplies the title.
    pub fn unique_sources(&self) -> Vec<GroundingSource> {
        let mut unique: Vec<GroundingSource> = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            match unique.iter_mut().find(|s| s.uri == source.uri) {
                Some(existing) => existing.title = source.title.clone(),
                None => unique.push(source.clone()),
            }
        }
        unique
    }

    /// Citations that look like videos, capped at [`RECOMMENDED_VIDEO_LIMIT`].
    pub fn video_sources(&self) -> Vec<&GroundingSource> {
        self.sources
            .iter()
            .filter(|s| s.looks_like_video())
            .take(RECOMMENDED_VIDEO_LIMIT)
            .collect()
    }
}

/// In-place update applied to a single message by identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub text: Option<String>,
    pub sources: Option<Vec<GroundingSource>>,
    pub is_streaming: Option<bool>,
    pub is_error: Option<bool>,
}

impl MessagePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn sources(mut self, sources: Vec<GroundingSource>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn streaming(mut self, is_streaming: bool) -> Self {
        self.is_streaming = Some(is_streaming);
        self
    }

    pub fn error(mut self, is_error: bool) -> Self {
        self.is_error = Some(is_error);
        self
    }

    pub fn apply(self, message: &mut Message) {
        if let Some(text) = self.text {
            message.text = text;
        }
        if let Some(sources) = self.sources {
            message.sources = sources;
        }
        if let Some(is_streaming) = self.is_streaming {
            message.is_streaming = is_streaming;
        }
        if let Some(is_error) = self.is_error {
            message.is_error = is_error;
        }
    }
}
