pub mod chat;
pub mod config;
pub mod constants;
pub mod conversation;
pub mod credentials;
pub mod error;
pub mod gemini;
pub mod intent;
pub mod media;
pub mod message;
pub mod orchestrator;
pub mod presentation;
pub mod veo;
pub mod web_server;

pub use config::GeminiConfig;
pub use conversation::ConversationStore;
pub use credentials::{ApiKeySource, CredentialManager, EnvApiKey, SharedApiKey};
pub use error::{FitStreamError, Result};
pub use gemini::{ChatBackend, ChatChunk, GeminiChat};
pub use intent::{classify_intent, Intent};
pub use media::MediaStore;
pub use message::{GeneratedVideo, GroundingSource, Message, MessageId, Role};
pub use orchestrator::{ConversationSnapshot, InputOutcome, Orchestrator};
pub use veo::{VeoVideo, VideoBackend};
