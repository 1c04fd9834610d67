//! Response orchestration: routes each user utterance to grounded chat or video
//! generation and drives the conversation state while the remote call runs.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::constants::{
    CHAT_ERROR_TEXT, STATUS_RESEARCHING, STATUS_VIDEO_GENERATING, STATUS_VIDEO_INIT,
    VIDEO_CREDENTIAL_ERROR_TEXT, VIDEO_ERROR_TEXT,
};
use crate::conversation::ConversationStore;
use crate::credentials::CredentialManager;
use crate::error::Result;
use crate::gemini::ChatBackend;
use crate::intent::{classify_intent, Intent};
use crate::message::{GroundingSource, Message, MessageId, MessagePatch};
use crate::veo::VideoBackend;

const SNAPSHOT_CHANNEL_CAPACITY: usize = 256;

/// What a presentation layer needs to render one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub loading_text: String,
}

/// Result of a single `handle_user_input` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "intent", rename_all = "camelCase")]
pub enum InputOutcome {
    /// Input was blank; nothing happened.
    Empty,
    /// Another request was in flight; the input was dropped.
    Busy,
    /// The request ran to completion (successfully or not) along this path.
    Completed(Intent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Processing { status: String },
}

/// Returns the orchestrator to `Idle` however the operation exits.
struct ProcessingGuard<'a> {
    orchestrator: &'a Orchestrator,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        *self.orchestrator.lock_phase() = Phase::Idle;
        self.orchestrator.publish();
    }
}

pub struct Orchestrator {
    conversation: RwLock<ConversationStore>,
    phase: Mutex<Phase>,
    chat: Arc<dyn ChatBackend>,
    video: Arc<dyn VideoBackend>,
    credentials: Option<Arc<dyn CredentialManager>>,
    updates: broadcast::Sender<ConversationSnapshot>,
}

impl Orchestrator {
    /// Orchestrator over a conversation seeded with the greeting.
    pub fn new(chat: Arc<dyn ChatBackend>, video: Arc<dyn VideoBackend>) -> Self {
        Self::with_conversation(ConversationStore::with_greeting(), chat, video)
    }

    pub fn with_conversation(
        conversation: ConversationStore,
        chat: Arc<dyn ChatBackend>,
        video: Arc<dyn VideoBackend>,
    ) -> Self {
        let (updates, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        Self {
            conversation: RwLock::new(conversation),
            phase: Mutex::new(Phase::Idle),
            chat,
            video,
            credentials: None,
            updates,
        }
    }

    /// Enable the interactive key check before video generation.
    pub fn with_credential_manager(mut self, manager: Arc<dyn CredentialManager>) -> Self {
        self.credentials = Some(manager);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationSnapshot> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        let messages = self.read_conversation().messages().to_vec();
        let (is_loading, loading_text) = match &*self.lock_phase() {
            Phase::Idle => (false, String::new()),
            Phase::Processing { status } => (true, status.clone()),
        };
        ConversationSnapshot {
            messages,
            is_loading,
            loading_text,
        }
    }

    pub fn is_busy(&self) -> bool {
        !matches!(*self.lock_phase(), Phase::Idle)
    }

    /// Handle one utterance from the user.
    ///
    /// Blank input and input arriving while another request is in flight are
    /// dropped without touching the conversation. Otherwise exactly one user
    /// message is appended, the request is routed by [`classify_intent`], and
    /// every failure is turned into an error message in the conversation.
    #[instrument(skip(self, text), fields(len = text.len()))]
    pub async fn handle_user_input(&self, text: &str) -> InputOutcome {
        let prompt = text.trim();
        if prompt.is_empty() {
            return InputOutcome::Empty;
        }
        let Some(_guard) = self.begin() else {
            debug!("Dropping input while a request is in flight");
            return InputOutcome::Busy;
        };

        let history = self.read_conversation().history();
        self.append(Message::user(prompt));

        let intent = classify_intent(prompt);
        info!(?intent, "Handling user input");
        match intent {
            Intent::Chat => self.run_chat(prompt, &history).await,
            Intent::VideoGen => self.run_video(prompt).await,
        }
        InputOutcome::Completed(intent)
    }

    async fn run_chat(&self, prompt: &str, history: &[Message]) {
        self.set_status(STATUS_RESEARCHING);
        let id = MessageId::new();
        self.append(Message::placeholder(id));

        match self.stream_into(id, prompt, history).await {
            Ok(()) => self.update(id, MessagePatch::new().streaming(false)),
            Err(e) => {
                error!("Error getting response: {}", e);
                self.update(
                    id,
                    MessagePatch::new()
                        .text(CHAT_ERROR_TEXT)
                        .sources(Vec::new())
                        .error(true)
                        .streaming(false),
                );
            }
        }
    }

    /// Accumulate text deltas into the placeholder. Each citation set replaces
    /// the previous one rather than merging with it.
    async fn stream_into(&self, id: MessageId, prompt: &str, history: &[Message]) -> Result<()> {
        let mut stream = self.chat.stream_chat(prompt, history).await?;
        let mut text = String::new();
        let mut sources: Vec<GroundingSource> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            text.push_str(&chunk.text);
            if let Some(citations) = chunk.citations {
                sources = citations;
            }
            self.update(id, MessagePatch::new().text(text.clone()).sources(sources.clone()));
        }
        Ok(())
    }

    async fn run_video(&self, prompt: &str) {
        self.set_status(STATUS_VIDEO_INIT);
        if let Some(manager) = &self.credentials {
            if !manager.has_selected_credential().await {
                manager.prompt_select_credential().await;
            }
        }

        self.set_status(STATUS_VIDEO_GENERATING);
        match self.video.generate_video(prompt).await {
            Ok(video) => {
                let text = format!("I've generated a video based on your request: \"{}\".", prompt);
                self.append(Message::model(text).with_video(video));
            }
            Err(e) => {
                error!("Video Gen Error: {}", e);
                let mut text = VIDEO_ERROR_TEXT;
                if e.is_credential_failure() {
                    if let Some(manager) = &self.credentials {
                        manager.prompt_select_credential().await;
                        text = VIDEO_CREDENTIAL_ERROR_TEXT;
                    }
                }
                self.append(Message::error(text));
            }
        }
    }

    /// Single compare-and-set from `Idle` to `Processing`.
    fn begin(&self) -> Option<ProcessingGuard<'_>> {
        let mut phase = self.lock_phase();
        if *phase != Phase::Idle {
            return None;
        }
        *phase = Phase::Processing {
            status: String::new(),
        };
        drop(phase);
        self.publish();
        Some(ProcessingGuard { orchestrator: self })
    }

    fn set_status(&self, status: &str) {
        if let Phase::Processing { status: current } = &mut *self.lock_phase() {
            *current = status.to_string();
        }
        self.publish();
    }

    fn append(&self, message: Message) {
        self.write_conversation().append(message);
        self.publish();
    }

    fn update(&self, id: MessageId, patch: MessagePatch) {
        if !self.write_conversation().update_by_id(id, patch) {
            warn!(%id, "No message to update");
        }
        self.publish();
    }

    fn publish(&self) {
        // Snapshots are also available on demand, so skip the clone when nobody listens.
        if self.updates.receiver_count() == 0 {
            return;
        }
        let _ = self.updates.send(self.snapshot());
    }

    fn lock_phase(&self) -> std::sync::MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_conversation(&self) -> std::sync::RwLockReadGuard<'_, ConversationStore> {
        self.conversation.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_conversation(&self) -> std::sync::RwLockWriteGuard<'_, ConversationStore> {
        self.conversation.write().unwrap_or_else(PoisonError::into_inner)
    }
}
