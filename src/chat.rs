// Interactive console front end over the orchestrator.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::credentials::{CredentialManager, SharedApiKey};
use crate::media::MediaStore;
use crate::message::Role;
use crate::orchestrator::{ConversationSnapshot, InputOutcome, Orchestrator};

/// Stdin line reader shared by the prompt loop and the key prompt.
pub type SharedLines = Arc<Mutex<Lines<BufReader<Stdin>>>>;

pub fn stdin_lines() -> SharedLines {
    Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()))
}

/// Asks for an API key on the terminal and installs it in a [`SharedApiKey`].
pub struct ConsoleCredentialPrompt {
    key: SharedApiKey,
    input: SharedLines,
}

impl ConsoleCredentialPrompt {
    pub fn new(key: SharedApiKey, input: SharedLines) -> Self {
        Self { key, input }
    }
}

#[async_trait]
impl CredentialManager for ConsoleCredentialPrompt {
    async fn has_selected_credential(&self) -> bool {
        self.key.is_selected()
    }

    async fn prompt_select_credential(&self) {
        print!("Video generation needs an API key with Veo access. Paste a key (blank keeps the current one): ");
        let _ = std::io::stdout().flush();
        match self.input.lock().await.next_line().await {
            Ok(Some(line)) if !line.trim().is_empty() => {
                self.key.select(line);
                info!("API key selected from console");
            }
            Ok(_) => info!("API key selection skipped"),
            Err(e) => warn!("Failed to read API key from console: {}", e),
        }
    }
}

/// Turns successive snapshots into incremental terminal output.
///
/// Model replies are printed as their text grows. Once a reply stops
/// streaming its sources and any generated video are listed below it.
pub struct ConsoleRenderer {
    media: MediaStore,
    shown: usize,
    printed: Option<String>,
    status: String,
}

impl ConsoleRenderer {
    pub fn new(media: MediaStore) -> Self {
        Self {
            media,
            shown: 0,
            printed: None,
            status: String::new(),
        }
    }

    pub fn render(&mut self, snapshot: &ConversationSnapshot) -> String {
        let mut out = String::new();
        if snapshot.is_loading && snapshot.loading_text != self.status {
            out.push_str(&format!("[{}]\n", snapshot.loading_text));
        }
        self.status = snapshot.loading_text.clone();

        while let Some(message) = snapshot.messages.get(self.shown) {
            if message.role == Role::User {
                self.shown += 1;
                continue;
            }

            match self.printed.as_deref() {
                None => {
                    out.push_str("FitStream: ");
                    out.push_str(&message.text);
                }
                Some(printed) => match message.text.strip_prefix(printed) {
                    Some(rest) => out.push_str(rest),
                    // Streamed text was replaced, e.g. by an apology.
                    None => {
                        out.push('\n');
                        out.push_str(&message.text);
                    }
                },
            }
            self.printed = Some(message.text.clone());
            if message.is_streaming {
                break;
            }
            out.push('\n');

            let sources = message.unique_sources();
            if !sources.is_empty() {
                out.push_str("  Sources:\n");
                for (i, source) in sources.iter().enumerate() {
                    out.push_str(&format!("    {}. {} <{}>\n", i + 1, source.title, source.uri));
                }
            }
            for video in message.video_sources() {
                out.push_str(&format!("  Watch: {} <{}>\n", video.title, video.uri));
            }
            if let Some(video) = &message.generated_video {
                match self.media.resolve(&video.url) {
                    Some(entry) => out.push_str(&format!(
                        "  Video ({}): {}\n",
                        entry.mime_type,
                        entry.path.display()
                    )),
                    None => out.push_str(&format!("  Video: {}\n", video.url)),
                }
            }

            self.shown += 1;
            self.printed = None;
        }
        out
    }
}

fn emit(text: &str) {
    if text.is_empty() {
        return;
    }
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

/// Read-eval-print loop until EOF or `exit`.
pub async fn run_console_chat(
    orchestrator: Arc<Orchestrator>,
    media: MediaStore,
    input: SharedLines,
) -> Result<()> {
    info!("Starting console chat session...");
    let mut renderer = ConsoleRenderer::new(media);
    let mut updates = orchestrator.subscribe();
    emit(&renderer.render(&orchestrator.snapshot()));

    loop {
        emit("\n> ");
        let line = input
            .lock()
            .await
            .next_line()
            .await
            .context("Failed to read from stdin")?;
        let Some(line) = line else { break };
        if matches!(line.trim(), "exit" | "quit") {
            break;
        }

        let work = orchestrator.handle_user_input(&line);
        tokio::pin!(work);
        let outcome = loop {
            tokio::select! {
                outcome = &mut work => break outcome,
                update = updates.recv() => match update {
                    Ok(snapshot) => emit(&renderer.render(&snapshot)),
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        emit(&renderer.render(&orchestrator.snapshot()))
                    }
                    Err(broadcast::error::RecvError::Closed) => {}
                },
            }
        };

        while updates.try_recv().is_ok() {}
        emit(&renderer.render(&orchestrator.snapshot()));
        if outcome == InputOutcome::Busy {
            emit("(still working on the previous request)\n");
        }
    }

    info!("Console chat session finished.");
    Ok(())
}
