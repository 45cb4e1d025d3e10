use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ragchat::api::ApiClient;
use ragchat::chat::accumulator::NoopObserver;
use ragchat::chat::controller::ChatController;
use ragchat::chat::render::{TerminalRenderer, format_sources};
use ragchat::chat::{ChatMessage, Conversation, Role};
use ragchat::config::Config;

#[derive(Parser)]
#[command(name = "ragchat", version, about = "Streaming chat client for a RAG backend")]
struct Cli {
    /// Path to the JSON config file (default: ragchat.json)
    #[arg(short, long, global = true, default_value = "")]
    config: String,

    /// Backend origin; an empty value means same-origin behind the dev proxy
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask one question and stream the answer
    Ask {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
        /// Skip the source document lookup
        #[arg(long)]
        no_sources: bool,
        /// Print the final message as JSON instead of streaming it
        #[arg(long)]
        json: bool,
    },
    /// Interactive chat session
    Chat {
        #[arg(long)]
        no_sources: bool,
    },
    /// Backend health status
    Health,
    /// Backend name, version and models
    Info,
    /// Index statistics
    Stats,
    /// Documents most similar to a query
    Similar {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Documents available to the backend
    Documents,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // 1. Load config: file, then environment, then command line
    let config = Config::load(&cli.config)?
        .with_env_overrides()
        .with_api_url(cli.api_url.clone());
    config.validate().context("invalid configuration")?;
    if config.is_same_origin() {
        info!("No backend URL set, using the dev proxy at {}", config.origin());
    } else {
        info!("Backend origin: {}", config.origin());
    }

    // 2. Init API client
    let api = ApiClient::new(Arc::new(config))?;

    // 3. Dispatch
    match cli.command {
        Command::Ask {
            question,
            no_sources,
            json,
        } => run_ask(api, &question.join(" "), !no_sources, json).await,
        Command::Chat { no_sources } => run_chat(api, !no_sources).await,
        Command::Health => {
            let health = api.health().await?;
            println!("{}: {}", health.status, health.message);
            Ok(())
        }
        Command::Info => {
            let info = api.info().await?;
            println!("{} {}", info.name, info.version);
            if !info.description.is_empty() {
                println!("{}", info.description);
            }
            println!("Embedding model: {}", info.embedding_model);
            println!("LLM model:       {}", info.llm_model);
            Ok(())
        }
        Command::Stats => {
            let stats = api.stats().await?;
            println!("Documents:  {}", stats.total_documents);
            println!("Chunks:     {}", stats.total_chunks);
            println!("Index size: {:.2} MB", stats.index_size_mb);
            if let Some(updated) = stats.last_updated {
                println!("Updated:    {updated}");
            }
            Ok(())
        }
        Command::Similar { query, top_k } => {
            let top_k = top_k.unwrap_or(api.config().sources_top_k);
            let result = api.similarity(&query.join(" "), top_k).await?;
            print!("{}", format_sources(&result.documents));
            Ok(())
        }
        Command::Documents => {
            let docs = api.documents().await?;
            if let Some(message) = docs.message {
                println!("{message}");
            }
            for doc in &docs.documents {
                println!("{:>10}  {}", doc.size_bytes, doc.name);
            }
            println!(
                "{} document(s)",
                docs.total_count.unwrap_or(docs.documents.len() as u64)
            );
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_ask(api: ApiClient, question: &str, with_sources: bool, json: bool) -> Result<()> {
    let mut controller = ChatController::new(api);
    controller.set_return_sources(with_sources);

    let message = if json {
        let message = controller.ask(question, &mut NoopObserver).await?;
        println!("{}", serde_json::to_string_pretty(&message)?);
        message
    } else {
        let mut renderer = TerminalRenderer::new();
        let message = controller.ask(question, &mut renderer).await?;
        drop(renderer);
        if !message.sources.is_empty() {
            print!("\n{}", format_sources(&message.sources));
        }
        message
    };

    if message.is_error {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_chat(api: ApiClient, with_sources: bool) -> Result<()> {
    match api.health().await {
        Ok(health) if health.is_healthy() => {}
        Ok(health) => warn!("Backend is {}: {}", health.status, health.message),
        Err(e) => anyhow::bail!("backend unavailable, check that the server is running: {e}"),
    }

    let mut controller = ChatController::new(api);
    controller.set_return_sources(with_sources);
    let mut conversation = Conversation::default();

    println!("Ask a question. Commands: /sources, /history, /clear, /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();

        match input {
            "" => {
                eprintln!("Please enter a question.");
                continue;
            }
            "/quit" | "/exit" => break,
            "/clear" => {
                conversation.clear();
                println!("Conversation cleared.");
                continue;
            }
            "/history" => {
                print_history(&conversation);
                continue;
            }
            "/sources" => {
                print!("{}", format_sources(conversation.last_sources()));
                continue;
            }
            _ => {}
        }

        conversation.push(ChatMessage::user(input));
        let mut renderer = TerminalRenderer::new();
        let message = controller.ask(input, &mut renderer).await?;
        drop(renderer);

        if !message.sources.is_empty() {
            println!("({} sources, /sources to list them)", message.sources.len());
        }
        conversation.push(message);
    }

    Ok(())
}

fn print_history(conversation: &Conversation) {
    if conversation.is_empty() {
        println!("No messages yet.");
        return;
    }
    for message in conversation.messages() {
        let who = match (message.role, message.is_error) {
            (Role::User, _) => "you",
            (Role::Assistant, true) => "error",
            (Role::Assistant, false) => "bot",
        };
        println!(
            "[{}] {who}: {}",
            message.timestamp.format("%H:%M:%S"),
            message.text
        );
    }
    println!("({} messages)", conversation.len());
}
