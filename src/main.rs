use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use redpen::coach::{Goal, Orchestrator, Proficiency, Register, WritingContext};
use redpen::config::{Config, KNOWN_KEYS, Settings};
use redpen::consts::{DEFAULT_CAPABILITY, DEFAULT_HISTORY_LIMIT, default_db_path, format_number};
use redpen::identity::{self, IdentityFacts};
use redpen::limiter::RateLimiter;
use redpen::persist::{PersistReport, PersistenceSink, PhraseBank};
use redpen::pipeline::{Coordinator, Envelope, Submission};
use redpen::provider::anthropic::AnthropicProvider;
use redpen::store::Store;
use redpen::store::null::NullStore;
use redpen::store::sqlite::SqliteStore;

/// How long to wait for outstanding persistence tasks on exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const DEFAULT_USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; redpen-cli/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

#[derive(Parser)]
#[command(name = "redpen", version, about = "A writing coach with a bouncer at the door.")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// SQLite database path for config, sessions and phrases (use :memory: for ephemeral)
    #[arg(short, long)]
    db: Option<String>,

    #[command(flatten)]
    caller: CallerArgs,

    /// Model to coach with (haiku, sonnet, opus)
    #[arg(short, long, default_value = DEFAULT_CAPABILITY)]
    model: String,

    /// Target register
    #[arg(long, value_enum, default_value_t = Register::Neutral)]
    register: Register,

    /// What the rewrite should aim for
    #[arg(long, value_enum, default_value_t = Goal::Correct)]
    goal: Goal,

    /// Where the text will be used
    #[arg(long, value_enum, default_value_t = WritingContext::General)]
    context: WritingContext,

    /// Writer's proficiency
    #[arg(long, value_enum, default_value_t = Proficiency::Intermediate)]
    level: Proficiency,

    /// Coach a single text and exit (non-interactive)
    #[arg(short, long)]
    text: Option<String>,
}

/// Who the CLI pretends to be. Stands in for what a transport layer
/// would decode from a request.
#[derive(Args)]
struct CallerArgs {
    /// Authenticated user id (omit for anonymous)
    #[arg(long)]
    user: Option<String>,

    /// Role granted to the user (repeatable: premium, admin)
    #[arg(long = "role")]
    roles: Vec<String>,

    /// Caller network address
    #[arg(long, default_value = "127.0.0.1")]
    ip: String,

    /// User-agent to present
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    user_agent: String,
}

impl CallerArgs {
    fn envelope(&self) -> Envelope {
        let identity = match &self.user {
            Some(user) => self
                .roles
                .iter()
                .fold(IdentityFacts::user(user.as_str()), |facts, role| {
                    facts.with_role(role.as_str())
                }),
            None => IdentityFacts::anonymous(),
        };
        Envelope {
            user_agent: Some(self.user_agent.clone()),
            remote_addr: self.ip.clone(),
            identity,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Show recent coaching sessions
    History {
        #[arg(short, long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },
    /// List the phrase bank
    Phrases,
    /// Remove a phrase from the bank
    Forget {
        /// Phrase id as shown by `redpen phrases`
        id: String,
    },
    /// Read or change persistent settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print a value
    Get { key: String },
    /// Set a value
    Set { key: String, value: String },
    /// Remove a value, restoring the default
    Unset { key: String },
    /// Print every known key and its stored value
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("redpen=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let db = match cli.db.clone() {
        Some(db) => db,
        None => {
            let path = default_db_path().context("cannot determine home directory; pass --db")?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            path.to_string_lossy().into_owned()
        }
    };

    let config = Config::open(&db)?;

    if let Some(Command::Config { action }) = &cli.command {
        return handle_config(&config, action);
    }

    let settings = Settings::load(&config)?;
    let store = open_store(&db);

    match &cli.command {
        Some(Command::History { limit }) => return handle_history(&cli, store, *limit).await,
        Some(Command::Phrases) => return handle_phrases(&cli, store).await,
        Some(Command::Forget { id }) => return handle_forget(&cli, store, id).await,
        Some(Command::Config { .. }) | None => {}
    }

    let provider = AnthropicProvider::from_env()?;
    if !provider.has_credentials() {
        warn!("ANTHROPIC_API_KEY is not set; every submission will fail");
    }

    let coordinator = Coordinator::new(
        Arc::new(RateLimiter::new(settings.rate.clone())),
        Orchestrator::new(Arc::new(provider), settings.retry.clone()),
        PersistenceSink::new(store),
    );
    let envelope = cli.caller.envelope();
    let mut pending = Vec::new();

    // Single text mode
    if let Some(text) = cli.text.clone() {
        if let Some(handle) = run_once(&coordinator, &envelope, &cli, text).await? {
            pending.push(handle);
        }
        drain(pending).await;
        return Ok(());
    }

    // REPL: one submission per line
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        print!("\nredpen> ");
        io::stdout().flush()?;

        let line = tokio::select! {
            result = lines.next_line() => {
                match result {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        println!();
                        break;
                    }
                    Err(e) => {
                        eprintln!("input error: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };

        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "quit" || text == "exit" {
            break;
        }

        if let Some(handle) = run_once(&coordinator, &envelope, &cli, text.to_string()).await? {
            pending.push(handle);
        }
        pending.retain(|h| !h.is_finished());
    }

    drain(pending).await;
    Ok(())
}

async fn run_once(
    coordinator: &Coordinator,
    envelope: &Envelope,
    cli: &Cli,
    text: String,
) -> Result<Option<JoinHandle<PersistReport>>> {
    let submission = Submission {
        text,
        register: cli.register,
        goal: cli.goal,
        context: cli.context,
        level: cli.level,
        capability: cli.model.clone(),
    };

    match coordinator.submit_with_receipt(envelope, submission).await {
        Ok(receipt) => {
            println!("{}", serde_json::to_string_pretty(&receipt.result)?);
            println!(
                "\n[{} | tokens: {} in / {} out ({} total) | {}/{} this window]",
                receipt.result.model,
                format_number(receipt.result.usage.input_tokens),
                format_number(receipt.result.usage.output_tokens),
                format_number(receipt.result.usage.total()),
                receipt.rate.current_count,
                receipt.rate.limit
            );
            Ok(Some(receipt.persistence))
        }
        Err(e) => {
            eprintln!("error: {}", e);
            println!("{}", serde_json::to_string_pretty(&e)?);
            Ok(None)
        }
    }
}

/// Give detached persistence tasks a bounded chance to finish.
async fn drain(pending: Vec<JoinHandle<PersistReport>>) {
    if pending.is_empty() {
        return;
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(pending))
        .await
        .is_err()
    {
        warn!("persistence still running at exit; some records may be lost");
    }
}

fn open_store(db: &str) -> Arc<dyn Store> {
    match SqliteStore::open(db) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(db, error = %e, "record store unavailable; results will not be saved");
            Arc::new(NullStore)
        }
    }
}

fn caller_key(cli: &Cli) -> identity::CallerKey {
    let envelope = cli.caller.envelope();
    identity::resolve(&envelope.identity, &envelope.remote_addr).key
}

async fn handle_history(cli: &Cli, store: Arc<dyn Store>, limit: usize) -> Result<()> {
    let bank = PhraseBank::new(store);
    let sessions = bank.sessions(&caller_key(cli), limit).await?;
    if sessions.is_empty() {
        println!("No sessions yet.");
        return Ok(());
    }
    for session in sessions {
        println!(
            "{}  {}  [{}]",
            session.created_at.format("%Y-%m-%d %H:%M"),
            session.id,
            session.request.capability
        );
        println!("  before: {}", session.request.text);
        println!("  after:  {}", session.result.corrected);
    }
    Ok(())
}

async fn handle_phrases(cli: &Cli, store: Arc<dyn Store>) -> Result<()> {
    let bank = PhraseBank::new(store);
    let phrases = bank.phrases(&caller_key(cli)).await?;
    if phrases.is_empty() {
        println!("Phrase bank is empty.");
        return Ok(());
    }
    for phrase in phrases {
        println!("{}  {} - {}", phrase.id, phrase.phrase, phrase.meaning);
        println!("    e.g. {}", phrase.example);
    }
    Ok(())
}

async fn handle_forget(cli: &Cli, store: Arc<dyn Store>, id: &str) -> Result<()> {
    let bank = PhraseBank::new(store);
    if !bank.forget_phrase(&caller_key(cli), id).await? {
        bail!("no phrase with id {id}");
    }
    println!("✓ Forgot {id}.");
    Ok(())
}

fn handle_config(config: &Config, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get { key } => match config.get(key)? {
            Some(value) => println!("{value}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                bail!("unknown config key: {key}");
            }
            config.set(key, value)?;
            // Reject values that would make the next start fail.
            if let Err(e) = Settings::load(config) {
                config.remove(key)?;
                return Err(e);
            }
            println!("✓ {key} = {value}");
        }
        ConfigAction::Unset { key } => {
            config.remove(key)?;
            println!("✓ {key} reset to default");
        }
        ConfigAction::List => {
            for key in KNOWN_KEYS {
                let value = config.get(key)?.unwrap_or_else(|| "(default)".to_string());
                println!("{key} = {value}");
            }
        }
    }
    Ok(())
}
