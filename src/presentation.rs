// View models handed to the web and console front ends.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::message::{GeneratedVideo, GroundingSource, Message, Role};
use crate::orchestrator::ConversationSnapshot;

lazy_static::lazy_static! {
    static ref YOUTUBE_ID: Regex =
        Regex::new(r"^.*(youtu\.be/|v/|u/\w/|embed/|watch\?v=|&v=)([^#&?]*).*").expect("valid YouTube regex");
}

const YOUTUBE_ID_LEN: usize = 11;

/// Extract the 11-character video id from a YouTube link.
pub fn youtube_id(url: &str) -> Option<&str> {
    YOUTUBE_ID
        .captures(url)
        .and_then(|c| c.get(2))
        .map(|m| m.as_str())
        .filter(|id| id.len() == YOUTUBE_ID_LEN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackKind {
    Youtube,
    Native,
}

/// Request to open a video in the theater modal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoPlayback {
    pub locator: String,
    pub kind: PlaybackKind,
}

impl VideoPlayback {
    pub fn youtube(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            kind: PlaybackKind::Youtube,
        }
    }

    pub fn native(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            kind: PlaybackKind::Native,
        }
    }

    /// URL the player should load. YouTube links become autoplaying embeds
    /// when an id can be found; everything else plays as given.
    pub fn embed_url(&self) -> String {
        match self.kind {
            PlaybackKind::Youtube => match youtube_id(&self.locator) {
                Some(id) => format!("https://www.youtube.com/embed/{}?autoplay=1", id),
                None => self.locator.clone(),
            },
            PlaybackKind::Native => self.locator.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoCard {
    pub uri: String,
    pub title: String,
    /// Inline embed, present only for recognizable YouTube links.
    pub embed_url: Option<String>,
    pub playback: VideoPlayback,
}

impl From<&GroundingSource> for VideoCard {
    fn from(source: &GroundingSource) -> Self {
        Self {
            uri: source.uri.clone(),
            title: source.title.clone(),
            embed_url: youtube_id(&source.uri).map(|id| format!("https://www.youtube.com/embed/{}", id)),
            playback: VideoPlayback::youtube(source.uri.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub role: Role,
    pub text: String,
    pub time: String,
    pub is_streaming: bool,
    pub is_error: bool,
    pub sources: Vec<GroundingSource>,
    pub recommended_videos: Vec<VideoCard>,
    pub generated_video: Option<GeneratedVideo>,
    pub playback: Option<VideoPlayback>,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        let is_model = message.role == Role::Model;
        let (sources, recommended_videos) = if is_model {
            (
                message.unique_sources(),
                message.video_sources().into_iter().map(VideoCard::from).collect(),
            )
        } else {
            (Vec::new(), Vec::new())
        };
        Self {
            role: message.role,
            text: message.text.clone(),
            time: message
                .timestamp
                .with_timezone(&chrono::Local)
                .format("%H:%M")
                .to_string(),
            is_streaming: message.is_streaming,
            is_error: message.is_error,
            sources,
            recommended_videos,
            generated_video: message.generated_video.clone(),
            playback: message
                .generated_video
                .as_ref()
                .map(|v| VideoPlayback::native(v.url.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub messages: Vec<MessageView>,
    pub is_loading: bool,
    pub loading_text: String,
}

impl From<&ConversationSnapshot> for ConversationView {
    fn from(snapshot: &ConversationSnapshot) -> Self {
        Self {
            messages: snapshot.messages.iter().map(MessageView::from).collect(),
            is_loading: snapshot.is_loading,
            loading_text: snapshot.loading_text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_youtube_id_variants() {
        assert_eq!(youtube_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), Some("dQw4w9WgXcQ"));
        assert_eq!(youtube_id("https://youtu.be/dQw4w9WgXcQ?t=10"), Some("dQw4w9WgXcQ"));
        assert_eq!(youtube_id("https://www.youtube.com/embed/dQw4w9WgXcQ"), Some("dQw4w9WgXcQ"));
        assert_eq!(
            youtube_id("https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(youtube_id("https://www.youtube.com/watch?v=short"), None);
        assert_eq!(youtube_id("https://example.com/article"), None);
    }

    #[test]
    fn test_playback_embed_urls() {
        let yt = VideoPlayback::youtube("https://youtu.be/dQw4w9WgXcQ");
        assert_eq!(yt.embed_url(), "https://www.youtube.com/embed/dQw4w9WgXcQ?autoplay=1");

        let odd = VideoPlayback::youtube("https://example.com/clip");
        assert_eq!(odd.embed_url(), "https://example.com/clip");

        let native = VideoPlayback::native("/media/abc");
        assert_eq!(native.embed_url(), "/media/abc");
    }

    #[test]
    fn test_message_view_dedupes_and_recommends() {
        let message = Message {
            sources: vec![
                GroundingSource::new("https://youtu.be/dQw4w9WgXcQ", "Squat form video"),
                GroundingSource::new("https://youtu.be/dQw4w9WgXcQ", "Squat form"),
                GroundingSource::new("https://example.com/squats", "Guide"),
            ],
            ..Message::model("Try these")
        };
        let view = MessageView::from(&message);
        assert_eq!(view.sources.len(), 2);
        assert_eq!(view.sources[0].title, "Squat form");
        assert_eq!(view.recommended_videos.len(), 2);
        assert_eq!(
            view.recommended_videos[0].embed_url.as_deref(),
            Some("https://www.youtube.com/embed/dQw4w9WgXcQ")
        );
        assert_eq!(view.time.len(), 5);
    }

    #[test]
    fn test_user_message_view_hides_sources() {
        let message = Message {
            sources: vec![GroundingSource::new("https://youtu.be/dQw4w9WgXcQ", "x")],
            ..Message::user("hi")
        };
        let view = MessageView::from(&message);
        assert!(view.sources.is_empty());
        assert!(view.recommended_videos.is_empty());
    }

    #[test]
    fn test_generated_video_gets_native_playback() {
        let message = Message::model("done").with_video(GeneratedVideo {
            url: "/media/1".to_string(),
            mime_type: "video/mp4".to_string(),
        });
        let view = MessageView::from(&message);
        assert_eq!(view.playback, Some(VideoPlayback::native("/media/1")));
    }
}
