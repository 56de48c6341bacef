// Declare the modules
pub mod api;
pub mod cache;
pub mod commands;
pub mod config;
pub mod context;
pub mod conversation;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod protocol;
pub mod state;
pub mod storage;
pub mod terminal;
pub mod workspace;

use crate::api::OllamaProvider;
use crate::commands::PresentationBridge;
use crate::context::SharedEditorState;
use crate::protocol::{Notifier, OutboundMessage};
use crate::state::{Session, SessionParts};
use crate::storage::StorageManager;
use crate::terminal::ShellCommandRunner;
use crate::workspace::Workspace;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Parser, Debug)]
#[command(name = "localassist", version, about = "Local Ollama chat assistant")]
struct Cli {
    /// Workspace root used for file listing, file context and commands
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    /// Directory holding the assistant database
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Speak the panel protocol as JSON lines over stdin/stdout
    Serve,
    /// Send a single prompt to the model without history or context
    Ask { prompt: String },
    /// Change a model setting (endpointBaseUrl or modelName)
    Set { key: String, value: String },
}

fn default_data_dir() -> anyhow::Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join("localassist"))
        .context("Could not determine a local data directory; pass --data-dir")
}

pub async fn run() -> anyhow::Result<()> {
    // stdout carries the protocol, so logs go to stderr
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    let workspace_root = match cli.workspace {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    log::info!(
        "Workspace: {}, data: {}",
        workspace_root.display(),
        data_dir.display()
    );

    let storage = Arc::new(StorageManager::new(&data_dir).await?);
    let (notifier, rx) = Notifier::channel();
    let session = Session::open(
        SessionParts {
            storage: storage.clone(),
            backend: Arc::new(OllamaProvider::new()),
            editor: Arc::new(SharedEditorState::new()),
            commands: Arc::new(ShellCommandRunner::new(&workspace_root)),
            workspace: Workspace::new(&workspace_root),
        },
        notifier,
    )
    .await;

    let result = match cli.command {
        CliCommand::Serve => {
            let input = BufReader::new(tokio::io::stdin());
            serve(session, rx, input, tokio::io::stdout()).await
        }
        CliCommand::Ask { prompt } => {
            let reply = session.orchestrator.quick_ask(&prompt).await?;
            println!("{}", reply);
            Ok(())
        }
        CliCommand::Set { key, value } => {
            let config = session.settings.update(&key, &value).await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    };

    storage.close().await;
    result
}

/// Runs the panel protocol: one inbound envelope per input line, one outbound
/// envelope per output line. Returns once input ends and every ask has finished.
async fn serve<R, W>(
    session: Session,
    rx: UnboundedReceiver<OutboundMessage>,
    input: R,
    output: W,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer = tokio::spawn(write_outbound(rx, output));
    let bridge = PresentationBridge::new(session);

    bridge.session().conversations.notify_threads().await;

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        bridge.handle_raw(line).await;
    }

    log::info!("Input closed, waiting for in-flight asks");
    bridge.drain().await;

    // The writer finishes once every notifier clone is gone.
    drop(bridge);
    writer.await.context("Output writer task failed")??;
    Ok(())
}

async fn write_outbound<W>(
    mut rx: UnboundedReceiver<OutboundMessage>,
    mut output: W,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = serde_json::to_string(&message)?;
        line.push('\n');
        output.write_all(line.as_bytes()).await?;
        output.flush().await?;
    }
    Ok(())
}
