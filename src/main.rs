use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use productivity_client::{
    api::dto::{
        CodeExplainRequest, CodeFixRequest, CodeGenerateRequest, CodeReviewRequest,
        ExplainLevel, ExportFormat, ResearchRequest, DEFAULT_LANGUAGE, DEFAULT_MAX_SOURCES,
    },
    services::export_with_fallback,
    ApiClient, AuthSession, ChatBackend, ChatState, ChatStore, Config, CredentialStore,
    FileCredentialStore, JobPoller, Role, SnapshotStore, StreamEnd, StreamingChatSession,
};

#[derive(Parser)]
#[command(name = "productivity-cli")]
#[command(version, about = "Command-line client for the AI Productivity Engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the issued tokens
    Login(LoginArgs),
    /// Create an account and sign in
    Register(RegisterArgs),
    /// Forget the stored tokens
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Conversation management
    Conversations {
        #[command(subcommand)]
        command: ConversationCommands,
    },
    /// Send a prompt and stream the reply
    Chat {
        conversation_id: String,
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },
    /// Send a prompt and wait for the full reply
    Send {
        conversation_id: String,
        #[arg(required = true, num_args = 1..)]
        content: Vec<String>,
    },
    /// Code assistant tools
    Code {
        #[command(subcommand)]
        command: CodeCommands,
    },
    /// Web research tools
    Research {
        #[command(subcommand)]
        command: ResearchCommands,
    },
    /// Extract structured data from a document
    Extract {
        file: PathBuf,
        /// Poll the processing job until it finishes
        #[arg(long)]
        wait: bool,
    },
    /// Export extracted data
    Export {
        /// JSON file with the extraction result
        data: PathBuf,
        #[arg(long, value_enum)]
        format: ExportFormat,
        /// Directory the file is written to
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Batch document processing
    Batch {
        #[command(subcommand)]
        command: BatchCommands,
    },
    /// Natural-language edits of extracted data
    Instruction {
        #[command(subcommand)]
        command: InstructionCommands,
    },
}

#[derive(Args)]
struct LoginArgs {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
}

#[derive(Args)]
struct RegisterArgs {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
    #[arg(long)]
    name: Option<String>,
}

#[derive(Subcommand)]
enum ConversationCommands {
    List,
    Create {
        #[arg(long)]
        title: Option<String>,
    },
    Show {
        id: String,
    },
    Delete {
        id: String,
    },
}

#[derive(Subcommand)]
enum CodeCommands {
    Generate {
        description: String,
        #[arg(long, default_value = DEFAULT_LANGUAGE)]
        language: String,
        #[arg(long)]
        context: Option<String>,
    },
    Review {
        file: PathBuf,
        #[arg(long, default_value = DEFAULT_LANGUAGE)]
        language: String,
        #[arg(long)]
        focus: Option<String>,
    },
    Explain {
        file: PathBuf,
        #[arg(long, default_value = DEFAULT_LANGUAGE)]
        language: String,
        #[arg(long, value_enum, default_value = "intermediate")]
        level: ExplainLevel,
    },
    Fix {
        file: PathBuf,
        #[arg(long)]
        error: String,
        #[arg(long, default_value = DEFAULT_LANGUAGE)]
        language: String,
    },
}

#[derive(Subcommand)]
enum ResearchCommands {
    Scrape {
        url: String,
    },
    Topic {
        query: String,
        /// Source URL to include (repeatable)
        #[arg(long = "url")]
        urls: Vec<String>,
        #[arg(long, default_value_t = DEFAULT_MAX_SOURCES)]
        max_sources: u32,
    },
    Upload {
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum BatchCommands {
    Upload {
        #[arg(long)]
        name: String,
        #[arg(required = true, num_args = 1..)]
        files: Vec<PathBuf>,
        #[arg(long)]
        wait: bool,
    },
    Status {
        id: String,
        #[arg(long)]
        wait: bool,
    },
}

#[derive(Subcommand)]
enum InstructionCommands {
    Process {
        instruction: String,
        /// JSON file with the extracted data
        #[arg(long)]
        data: PathBuf,
    },
    Preview {
        instruction: String,
        #[arg(long)]
        data: PathBuf,
    },
    Examples,
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("productivity_client={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn read_json_file(path: &Path) -> Result<Value> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn read_source(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load()?;
    init_tracing(if cli.verbose {
        "debug"
    } else {
        config.log_level.as_str()
    });

    let credentials: Arc<dyn CredentialStore> =
        Arc::new(FileCredentialStore::open(&config.state_dir).await?);
    let client = ApiClient::from_config(&config, credentials);
    let snapshots = SnapshotStore::new(&config.state_dir);

    tracing::debug!(
        "Using backend at {} with state in {}",
        client.base_url(),
        snapshots.dir().display()
    );

    match cli.command {
        Commands::Login(args) => {
            let session = AuthSession::new(client).with_snapshots(snapshots);
            let user = session.login(&args.email, &args.password).await?;
            println!("Signed in as {}", user.email);
        }
        Commands::Register(args) => {
            let session = AuthSession::new(client).with_snapshots(snapshots);
            let user = session
                .register(&args.email, &args.password, args.name.as_deref())
                .await?;
            println!("Registered {}", user.email);
        }
        Commands::Logout => {
            let session = AuthSession::new(client).with_snapshots(snapshots);
            session.logout().await?;
            println!("Signed out");
        }
        Commands::Whoami => {
            let session = AuthSession::new(client).with_snapshots(snapshots);
            if session.check_auth().await {
                if let Some(user) = session.current_user().await {
                    print_json(&user)?;
                }
            } else {
                bail!("Not signed in");
            }
        }
        Commands::Conversations { command } => {
            let store = chat_store(&config, client, snapshots).await;
            run_conversations(&store, command).await?;
        }
        Commands::Chat {
            conversation_id,
            prompt,
        } => {
            let backend: Arc<dyn ChatBackend> = Arc::new(client);
            let store = Arc::new(
                ChatStore::new(backend.clone())
                    .with_snapshots(snapshots)
                    .with_page_size(config.conversation_page_size),
            );
            store.select_conversation(&conversation_id).await?;
            let session = Arc::new(StreamingChatSession::new(backend, store));
            run_chat(session, &conversation_id, &prompt.join(" ")).await?;
        }
        Commands::Send {
            conversation_id,
            content,
        } => {
            let store = chat_store(&config, client, snapshots).await;
            store.select_conversation(&conversation_id).await?;
            let reply = store
                .send_message(&conversation_id, &content.join(" "))
                .await?;
            println!("{}", reply.content);
        }
        Commands::Code { command } => run_code(&client, command).await?,
        Commands::Research { command } => run_research(&client, command).await?,
        Commands::Extract { file, wait } => {
            let job = client.extract_file(&file).await?;
            println!("Extraction job {}", job.job_id);
            if wait {
                let poller = JobPoller::from_config(&config);
                let cancel = cancel_on_ctrl_c();
                let done = poller
                    .wait_for_processing(
                        &client,
                        &job.job_id,
                        |status| eprintln!("status: {}", status.status),
                        &cancel,
                    )
                    .await?;
                match done {
                    Some(status) => print_json(&status)?,
                    None => eprintln!("Stopped waiting"),
                }
            }
        }
        Commands::Export { data, format, out } => {
            let data = read_json_file(&data).await?;
            let exported = export_with_fallback(&client, &data, format).await?;
            let path = out.join(&exported.filename);
            tokio::fs::write(&path, &exported.bytes)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            if exported.fallback {
                eprintln!("Server export failed; wrote a locally rendered file");
            }
            println!("{}", path.display());
        }
        Commands::Batch { command } => run_batch(&client, &config, command).await?,
        Commands::Instruction { command } => run_instruction(&client, command).await?,
    }

    Ok(())
}

async fn chat_store(config: &Config, client: ApiClient, snapshots: SnapshotStore) -> ChatStore {
    let store = ChatStore::new(Arc::new(client))
        .with_snapshots(snapshots)
        .with_page_size(config.conversation_page_size);
    if let Err(e) = store.restore().await {
        tracing::warn!("Ignoring unreadable chat snapshot: {}", e);
    }
    store
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    cancel
}

async fn run_conversations(store: &ChatStore, command: ConversationCommands) -> Result<()> {
    match command {
        ConversationCommands::List => {
            store.load_conversations().await?;
            for conversation in store.state().conversations.iter() {
                println!(
                    "{}  {}  {}",
                    conversation.id,
                    conversation.updated_at.format("%Y-%m-%d %H:%M"),
                    conversation.title
                );
            }
        }
        ConversationCommands::Create { title } => {
            let created = store.create_conversation(title.as_deref()).await?;
            println!("{}", created.id);
        }
        ConversationCommands::Show { id } => {
            store.select_conversation(&id).await?;
            if let Some(detail) = store.current() {
                print_json(&*detail)?;
            }
        }
        ConversationCommands::Delete { id } => {
            store.delete_conversation(&id).await?;
            println!("Deleted {}", id);
        }
    }
    Ok(())
}

/// Text of the in-progress assistant reply, if one is on screen.
fn streaming_text(state: &ChatState) -> Option<String> {
    let current = state.current_conversation.as_ref()?;
    current
        .messages
        .iter()
        .rev()
        .find(|m| m.is_local() && m.role == Role::Assistant)
        .map(|m| m.content.clone())
}

async fn run_chat(
    session: Arc<StreamingChatSession>,
    conversation_id: &str,
    prompt: &str,
) -> Result<()> {
    let printed = Arc::new(AtomicUsize::new(0));
    let printer = tokio::spawn({
        let mut updates = session.store().subscribe();
        let printed = printed.clone();
        async move {
            while updates.changed().await.is_ok() {
                let text = streaming_text(&updates.borrow_and_update());
                let Some(text) = text else { continue };
                let from = printed.load(Ordering::SeqCst);
                if text.len() > from && text.is_char_boundary(from) {
                    print!("{}", &text[from..]);
                    if let Err(e) = std::io::stdout().flush() {
                        tracing::debug!("Failed to flush stdout: {}", e);
                    }
                    printed.store(text.len(), Ordering::SeqCst);
                }
            }
        }
    });

    let stopper = tokio::spawn({
        let session = session.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                session.stop();
            }
        }
    });

    let result = session.send(conversation_id, prompt).await;
    stopper.abort();
    printer.abort();
    let _ = printer.await;

    let outcome = result?;
    let from = printed.load(Ordering::SeqCst);
    if outcome.content.len() > from && outcome.content.is_char_boundary(from) {
        print!("{}", &outcome.content[from..]);
    }
    println!();

    if outcome.malformed_frames > 0 {
        eprintln!("({} malformed frames skipped)", outcome.malformed_frames);
    }
    match outcome.end {
        StreamEnd::Cancelled => eprintln!("(stopped)"),
        StreamEnd::Completed { reconciled: false } => {
            eprintln!("(reply shown but the conversation could not be refreshed)")
        }
        StreamEnd::Completed { reconciled: true } => {}
    }
    Ok(())
}

async fn run_code(client: &ApiClient, command: CodeCommands) -> Result<()> {
    let result = match command {
        CodeCommands::Generate {
            description,
            language,
            context,
        } => {
            client
                .generate_code(&CodeGenerateRequest {
                    description,
                    language,
                    context,
                })
                .await?
        }
        CodeCommands::Review {
            file,
            language,
            focus,
        } => {
            let code = read_source(&file).await?;
            client
                .review_code(&CodeReviewRequest {
                    code,
                    language,
                    focus,
                })
                .await?
        }
        CodeCommands::Explain {
            file,
            language,
            level,
        } => {
            let code = read_source(&file).await?;
            client
                .explain_code(&CodeExplainRequest {
                    code,
                    language,
                    level,
                })
                .await?
        }
        CodeCommands::Fix {
            file,
            error,
            language,
        } => {
            let code = read_source(&file).await?;
            client
                .fix_code(&CodeFixRequest {
                    code,
                    error,
                    language,
                })
                .await?
        }
    };
    print_json(&result)
}

async fn run_research(client: &ApiClient, command: ResearchCommands) -> Result<()> {
    let result = match command {
        ResearchCommands::Scrape { url } => client.scrape_url(&url).await?,
        ResearchCommands::Topic {
            query,
            urls,
            max_sources,
        } => {
            client
                .research_topic(&ResearchRequest {
                    query,
                    urls,
                    max_sources,
                })
                .await?
        }
        ResearchCommands::Upload { file } => client.upload_research_file(&file).await?,
    };
    print_json(&result)
}

async fn run_batch(client: &ApiClient, config: &Config, command: BatchCommands) -> Result<()> {
    let (batch_job_id, wait) = match command {
        BatchCommands::Upload { name, files, wait } => {
            let uploaded = client.batch_upload(&name, &files).await?;
            println!("Batch job {}", uploaded.batch_job_id);
            (uploaded.batch_job_id, wait)
        }
        BatchCommands::Status { id, wait } => (id, wait),
    };

    if !wait {
        return print_json(&client.batch_status(&batch_job_id).await?);
    }

    let poller = JobPoller::from_config(config);
    let cancel = cancel_on_ctrl_c();
    let done = poller
        .wait_for_batch(
            client,
            &batch_job_id,
            |status| {
                eprintln!(
                    "{}: {}/{} files",
                    status.status, status.processed_files, status.total_files
                )
            },
            &cancel,
        )
        .await?;
    match done {
        Some(status) => print_json(&status),
        None => {
            eprintln!("Stopped waiting");
            Ok(())
        }
    }
}

async fn run_instruction(client: &ApiClient, command: InstructionCommands) -> Result<()> {
    let result = match command {
        InstructionCommands::Process { instruction, data } => {
            let data = read_json_file(&data).await?;
            client.process_instruction(&instruction, &data).await?
        }
        InstructionCommands::Preview { instruction, data } => {
            let data = read_json_file(&data).await?;
            client.preview_instruction(&instruction, &data).await?
        }
        InstructionCommands::Examples => client.instruction_examples().await?,
    };
    print_json(&result)
}
