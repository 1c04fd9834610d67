use serde::Serialize;

/// Command prefix that always routes to video generation.
pub const VIDEO_COMMAND_PREFIX: &str = "/video";

const VIDEO_PHRASES: &[&str] = &["generate video", "create a video"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Intent {
    Chat,
    VideoGen,
}

/// Decide which remote operation a user utterance should drive.
/// Purely lexical: no model call is involved.
pub fn classify_intent(text: &str) -> Intent {
    let lower = text.to_lowercase();
    if lower.starts_with(VIDEO_COMMAND_PREFIX) || VIDEO_PHRASES.iter().any(|p| lower.contains(p)) {
        Intent::VideoGen
    } else {
        Intent::Chat
    }
}
