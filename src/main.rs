#![forbid(unsafe_code)]

//! `brambles-stream`: resumable chat stream client.
//!
//! Sends a message to the chat API, prints generated words as they
//! arrive, and transparently resumes the stream after network failures
//! or a process restart.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use brambles_stream::config::GlobalConfig;
use brambles_stream::models::status::{SessionState, SessionStatus, SessionUpdate};
use brambles_stream::orchestrator::session::{Session, SessionHandle, SessionOptions};
use brambles_stream::persistence::checkpoint_repo::CheckpointRepo;
use brambles_stream::persistence::db;
use brambles_stream::stream::HttpTransport;
use brambles_stream::{AppError, Result};

/// Buffered updates between the session task and the terminal.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "brambles-stream", about = "Resumable chat stream client", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a message and stream the reply.
    Send {
        /// Chat (task) identifier.
        chat_id: String,
        /// Message text; multiple words are joined with spaces.
        #[arg(required = true)]
        message: Vec<String>,
        /// On Ctrl-C, stop the task and discard its checkpoint instead of
        /// keeping it for `resume`.
        #[arg(long)]
        cancel_on_interrupt: bool,
    },
    /// Continue the task recorded in the checkpoint.
    Resume {
        /// On Ctrl-C, stop the task and discard its checkpoint instead of
        /// keeping it for `resume`.
        #[arg(long)]
        cancel_on_interrupt: bool,
    },
    /// Show the stored checkpoint.
    Status,
    /// Discard the stored checkpoint.
    Clear,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;

    // ── Open checkpoint store ───────────────────────────
    let db_path = config.db_path();
    let pool = Arc::new(db::connect(&db_path).await?);
    let repo = CheckpointRepo::new(pool, config.session_key.clone());
    info!(db_path = %db_path.display(), slot = repo.slot(), "checkpoint store ready");

    match args.command {
        Command::Status => print_status(&repo).await,
        Command::Clear => {
            repo.delete().await?;
            eprintln!("checkpoint cleared");
            Ok(())
        }
        Command::Send {
            chat_id,
            message,
            cancel_on_interrupt,
        } => {
            let message = message.join(" ");
            // A new task replaces whatever was pending; don't resume it first.
            if let Some(previous) = repo.get().await? {
                repo.delete().await?;
                eprintln!("discarded pending task {}", previous.task_id);
            }
            let (handle, updates) = start_session(&mut config, repo).await?;
            handle.begin(chat_id, message).await?;
            finish(stream_until_done(handle, updates, cancel_on_interrupt).await?)
        }
        Command::Resume { cancel_on_interrupt } => {
            let Some(checkpoint) = repo.get().await? else {
                eprintln!("nothing to resume");
                return Ok(());
            };
            if let Some(ttl) = config.checkpoint_ttl() {
                if checkpoint.is_stale(ttl, Utc::now()) {
                    repo.delete().await?;
                    eprintln!("checkpoint for {} expired; discarded", checkpoint.task_id);
                    return Ok(());
                }
            }

            let (handle, updates) = start_session(&mut config, repo).await?;
            // Recovery resumes on its own once progress was recorded.
            if !checkpoint.is_resumable() {
                handle.retry().await?;
            }
            finish(stream_until_done(handle, updates, cancel_on_interrupt).await?)
        }
    }
}

/// Wire the HTTP transport and checkpoint store into a running session.
async fn start_session(
    config: &mut GlobalConfig,
    repo: CheckpointRepo,
) -> Result<(SessionHandle, mpsc::Receiver<SessionUpdate>)> {
    if let Err(err) = config.load_credentials().await {
        warn!(%err, "continuing without session cookie");
    }

    let transport = HttpTransport::from_config(config)?;
    let (updates_tx, updates) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
    let session = Session::new(
        SessionOptions::from_config(config),
        Arc::new(transport),
        Arc::new(repo),
        updates_tx,
    );
    info!(session_id = session.session_id(), "session created");
    Ok((session.spawn(), updates))
}

/// Print words until the session reaches a terminal status.
async fn stream_until_done(
    handle: SessionHandle,
    mut updates: mpsc::Receiver<SessionUpdate>,
    cancel_on_interrupt: bool,
) -> Result<SessionState> {
    let mut stdout = std::io::stdout();
    let mut interrupted = false;

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                match update {
                    SessionUpdate::Restored { task_id, words } => {
                        eprintln!("restored {task_id} ({} words)", words.len());
                        if !words.is_empty() {
                            write!(stdout, "{} ", words.join(" "))?;
                        }
                    }
                    SessionUpdate::Started { task_id } => {
                        info!(task_id, "server started generation");
                    }
                    SessionUpdate::Word { word, .. } => write!(stdout, "{word} ")?,
                    SessionUpdate::Status(status) => {
                        if matches!(status, SessionStatus::Reconnecting { .. }) {
                            eprintln!("\n[{status}]");
                        }
                        if status.state().is_terminal() {
                            writeln!(stdout)?;
                            eprintln!("[{status}]");
                            break;
                        }
                    }
                }
                stdout.flush()?;
            }
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal?;
                interrupted = true;
                if cancel_on_interrupt {
                    handle.cancel().await?;
                } else {
                    eprintln!("\ninterrupted; checkpoint kept, run `resume` to continue");
                    break;
                }
            }
        }
    }

    // A full channel would otherwise block the session before it sees Shutdown.
    drop(updates);
    handle.shutdown().await
}

fn finish(state: SessionState) -> Result<()> {
    match state {
        SessionState::Failed => Err(AppError::Session(
            "stream could not be resumed; run `resume` to try again".into(),
        )),
        _ => Ok(()),
    }
}

async fn print_status(repo: &CheckpointRepo) -> Result<()> {
    match repo.get().await? {
        None => println!("no checkpoint"),
        Some(checkpoint) => {
            println!("task:            {}", checkpoint.task_id);
            println!("message:         {}", checkpoint.pending_message);
            println!("last seen index: {}", checkpoint.last_seen_index);
            println!("words:           {}", checkpoint.words.len());
            println!("updated at:      {}", checkpoint.updated_at.to_rfc3339());
            if !checkpoint.words.is_empty() {
                println!();
                println!("{}", checkpoint.words.join(" "));
            }
        }
    }
    Ok(())
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
