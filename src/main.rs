use anyhow::{Context, Result};
use clap::Parser;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use fitstream::chat::{self, ConsoleCredentialPrompt};
use fitstream::web_server::{self, AppState};
use fitstream::{constants, EnvApiKey, GeminiChat, GeminiConfig, MediaStore, Orchestrator, SharedApiKey, VeoVideo};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    api: ApiArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Settings for the Gemini and Veo endpoints.
#[derive(clap::Args, Debug)]
struct ApiArgs {
    #[arg(long, global = true, env = "FITSTREAM_API_BASE", help = "Base URL of the Gemini API.")]
    api_base: Option<String>,
    #[arg(long, global = true, env = "FITSTREAM_CHAT_MODEL", help = "Model used for grounded chat.")]
    chat_model: Option<String>,
    #[arg(long, global = true, env = "FITSTREAM_VIDEO_MODEL", help = "Model used for video generation.")]
    video_model: Option<String>,
    #[arg(long, global = true, default_value_t = constants::POLL_INTERVAL.as_secs(), help = "Seconds between video status checks.")]
    poll_interval_secs: u64,
    #[arg(long, global = true, env = "FITSTREAM_MAX_VIDEO_WAIT", help = "Give up on a video after this many seconds (default: wait indefinitely).")]
    max_video_wait_secs: Option<u64>,
}

impl ApiArgs {
    fn into_config(self) -> GeminiConfig {
        let defaults = GeminiConfig::default();
        GeminiConfig {
            api_base: self.api_base.unwrap_or(defaults.api_base),
            chat_model: self.chat_model.unwrap_or(defaults.chat_model),
            video_model: self.video_model.unwrap_or(defaults.video_model),
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            max_video_wait: self.max_video_wait_secs.map(Duration::from_secs),
        }
    }
}

// Define the available subcommands
#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the FitStream web server.
    Start {
        #[arg(long, default_value = "127.0.0.1", help = "Address to bind the web server to.")]
        host: IpAddr,
        #[arg(long, default_value_t = 9900, help = "Port for the web server.")]
        port: u16,
    },
    /// Chat with FitStream in the terminal.
    Chat,
}

// The main entry point of the application, using tokio's async runtime
#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for GEMINI_API_KEY)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG (e.g., RUST_LOG=info,fitstream=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    info!("FitStream starting with command: {:?}", cli.command);

    let config = cli.api.into_config();
    let media = MediaStore::new().context("Failed to create session media directory")?;
    let api_key = SharedApiKey::new(Arc::new(EnvApiKey::new()));
    let chat_backend = Arc::new(GeminiChat::new(config.clone(), Arc::new(api_key.clone())));
    let video_backend = Arc::new(VeoVideo::new(config, Arc::new(api_key.clone()), media.clone()));

    match cli.command {
        Commands::Start { host, port } => {
            info!("Starting FitStream web server on {}:{}...", host, port);
            let orchestrator = Arc::new(Orchestrator::new(chat_backend, video_backend));
            let state = AppState::new(orchestrator, media.clone())?;

            let mut web_server_handle = tokio::spawn(async move {
                if let Err(e) = web_server::start_web_server(host, port, state).await {
                    error!("Web server failed: {:?}", e);
                }
            });

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, initiating shutdown...");
                }
                res = &mut web_server_handle => {
                    match res {
                        Ok(_) => info!("Web server task completed unexpectedly."),
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }

            if !web_server_handle.is_finished() {
                info!("Aborting web server task...");
                web_server_handle.abort();
            }
            info!("Shutdown complete.");
        }
        Commands::Chat => {
            let input = chat::stdin_lines();
            let prompt = Arc::new(ConsoleCredentialPrompt::new(api_key, input.clone()));
            let orchestrator = Arc::new(
                Orchestrator::new(chat_backend, video_backend).with_credential_manager(prompt),
            );
            chat::run_console_chat(orchestrator, media.clone(), input)
                .await
                .context("Chat session failed")?;
        }
    }

    // Session media is removed when the last store handle drops.
    drop(media);
    Ok(())
}
