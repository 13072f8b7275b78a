//! AURA Memory - long-term user memory for a conversational assistant
//!
//! Command-line front end for inspecting and driving the memory pipeline
//! against the on-disk store.

use anyhow::{Context, Result};
use aura_memory::{
    config::AuraConfig,
    memory::{
        memory_prompt_section, InstructionClassifier, JsonFileStore, MemoryEngine, MemoryService,
        MemoryStore, Turn,
    },
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "aura-memory")]
#[command(author = "AURA Team")]
#[command(version)]
#[command(about = "Long-term user memory for a conversational assistant")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "AURA_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether an utterance is an explicit memory instruction
    Classify {
        /// The user utterance
        text: String,
    },

    /// Run one conversational turn through the memory pipeline
    Turn {
        /// User identifier
        #[arg(short, long)]
        user: String,

        /// Session identifier
        #[arg(short, long, default_value = "cli")]
        session: String,

        /// The user's message
        #[arg(short, long)]
        message: String,

        /// The assistant's reply
        #[arg(short, long, default_value = "")]
        reply: String,
    },

    /// Print the rendered memory context for a user
    Context {
        /// User identifier
        #[arg(short, long)]
        user: String,

        /// Wrap the context in the prompt section heading
        #[arg(long)]
        section: bool,
    },

    /// Print a user's stored memory document
    Show {
        /// User identifier
        #[arg(short, long)]
        user: String,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("aura_memory={}", log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        AuraConfig::from_file(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        AuraConfig::default()
    };

    match cli.command {
        Commands::Classify { text } => {
            classify(&text)?;
        }
        Commands::Turn {
            user,
            session,
            message,
            reply,
        } => {
            let turn = Turn {
                user_id: &user,
                session_id: &session,
                user_message: &message,
                assistant_reply: &reply,
            };
            run_turn(&config, &turn).await?;
        }
        Commands::Context { user, section } => {
            show_context(&config, &user, section).await?;
        }
        Commands::Show { user } => {
            show_memory(&config, &user).await?;
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

fn build_service(config: &AuraConfig) -> Result<MemoryService> {
    let engine = MemoryEngine::from_config(config)?;
    let store = JsonFileStore::new(config.storage.base_dir.clone());
    Ok(MemoryService::new(Arc::new(engine), Arc::new(store)))
}

fn classify(text: &str) -> Result<()> {
    let classifier = InstructionClassifier::default();
    let report = serde_json::json!({
        "instruction": classifier.is_memory_instruction(text),
        "content": classifier.strip_directive(text).map(str::trim),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_turn(config: &AuraConfig, turn: &Turn<'_>) -> Result<()> {
    let service = build_service(config)?;
    let outcome = service.handle_turn(turn).await?;

    let report = serde_json::json!({
        "manualInstruction": outcome.manual_instruction,
        "changed": outcome.changed,
        "added": outcome.added,
        "reinforced": outcome.reinforced,
        "evicted": outcome.evicted,
        "truncated": outcome.truncated,
        "totalMemories": outcome.memory.as_ref().map(|m| m.total_memories).unwrap_or(0),
        "storageUsed": outcome.memory.as_ref().map(|m| m.storage_used),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn show_context(config: &AuraConfig, user_id: &str, section: bool) -> Result<()> {
    let service = build_service(config)?;
    let context = service.context_for(user_id).await?;
    if section {
        if let Some(section) = memory_prompt_section(&context) {
            print!("{}", section);
        }
    } else if !context.is_empty() {
        println!("{}", context);
    }
    Ok(())
}

async fn show_memory(config: &AuraConfig, user_id: &str) -> Result<()> {
    let store = JsonFileStore::new(config.storage.base_dir.clone());
    match store.load(user_id).await? {
        Some(memory) => println!("{}", serde_json::to_string_pretty(&memory)?),
        None => {
            tracing::info!(
                user_id,
                path = %store.path_for(user_id).display(),
                "No memories stored"
            );
        }
    }
    Ok(())
}

fn show_config(config: Option<&AuraConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
