// Defaults for the remote API and the fixed conversation texts.
// Env-derived values are read once; CLI flags in main.rs override them.

use std::env;
use std::time::Duration;

lazy_static::lazy_static! {
    pub static ref API_BASE: String = env::var("FITSTREAM_API_BASE").unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string());
    pub static ref CHAT_MODEL: String = env::var("FITSTREAM_CHAT_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string());
    pub static ref VIDEO_MODEL: String = env::var("FITSTREAM_VIDEO_MODEL").unwrap_or_else(|_| "veo-3.1-fast-generate-preview".to_string());
}

/// Env vars consulted, in order, for the API key on every remote call.
pub const API_KEY_VARS: &[&str] = &["GEMINI_API_KEY", "API_KEY"];

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const VIDEO_RESOLUTION: &str = "720p";
pub const VIDEO_ASPECT_RATIO: &str = "16:9";
pub const VIDEO_COUNT: u32 = 1;
pub const DEFAULT_VIDEO_MIME: &str = "video/mp4";

/// Route prefix under which session media is served.
pub const MEDIA_ROUTE: &str = "/media";

pub const CREDENTIAL_FAILURE_SIGNATURE: &str = "Requested entity was not found";

pub const SYSTEM_INSTRUCTION: &str = "You are FitStream AI, an expert fitness coach and researcher.

GOALS:
1. Provide accurate workout tips, form guides, and nutrition advice.
2. RESEARCH VIDEOS: When users ask for exercises, actively search for and recommend YouTube videos.
3. If you find a video, explicitly mention it in the text (e.g., \"Here is a video demonstrating the form\").

FORMATTING:
- Use clear Markdown.
- Be concise and energetic.";

pub const GREETING: &str = "Hi! I'm FitStream AI. I can research workout tips or find streaming videos. Try asking for 'HIIT workout videos' or say 'Generate a video of a yoga pose'!";

pub const STATUS_RESEARCHING: &str = "Searching fitness database...";
pub const STATUS_VIDEO_INIT: &str = "Initializing creative studio...";
pub const STATUS_VIDEO_GENERATING: &str = "Generating your custom fitness video (this takes a moment)...";

pub const CHAT_ERROR_TEXT: &str = "Sorry, I encountered an error while researching that for you. Please try again.";
pub const VIDEO_ERROR_TEXT: &str = "I couldn't generate that video right now.";
pub const VIDEO_CREDENTIAL_ERROR_TEXT: &str = "It seems the API Key was invalid or missing. Please select a valid key and try again.";
