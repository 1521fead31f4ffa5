use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;
use std::time::Duration;
use study_buddy_core::index::DEFAULT_TOP_K;
use study_buddy_core::{
    discover_uploads, load_uploads, AuthEvent, AuthPanel, Feedback, IngestionOptions, Notice,
    Session, Settings, UiEvent, VectorStore,
};
use study_buddy_core::settings::{
    DEFAULT_FALLBACK_MODEL, DEFAULT_GROUNDED_MODEL, DEFAULT_TEMPERATURE, DEFAULT_VISION_MODEL,
};
use study_buddy_core::voice::{
    RecorderConfig, DEFAULT_LANGUAGE, DEFAULT_LISTEN_TIMEOUT, DEFAULT_SPEECH_URL, LISTENING_MESSAGE,
};
use tokio::io::{stdin, AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "study-buddy", version, about = "Ask questions about your PDFs and images")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Google API key for generation, embeddings and speech.
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Generative Language API base URL
    #[arg(long, env = "STUDY_BUDDY_API_URL", default_value = study_buddy_core::gemini::DEFAULT_BASE_URL)]
    api_url: String,

    /// Speech-to-text API base URL
    #[arg(long, env = "STUDY_BUDDY_SPEECH_URL", default_value = DEFAULT_SPEECH_URL)]
    speech_url: String,

    /// Directory holding the persisted index.
    #[arg(long, env = "STUDY_BUDDY_INDEX_DIR", default_value = study_buddy_core::DEFAULT_INDEX_DIR)]
    index_dir: PathBuf,

    #[arg(long, default_value = study_buddy_core::DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Use the local trigram embedder instead of the hosted embedding model.
    #[arg(long, default_value_t = false)]
    offline_embeddings: bool,

    #[arg(long, default_value = DEFAULT_GROUNDED_MODEL)]
    grounded_model: String,

    #[arg(long, default_value = DEFAULT_FALLBACK_MODEL)]
    fallback_model: String,

    #[arg(long, default_value = DEFAULT_VISION_MODEL)]
    vision_model: String,

    #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
    temperature: f32,

    /// Number of chunks used as context for a grounded answer.
    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Parallel extraction workers. Defaults to the number of CPUs.
    #[arg(long)]
    workers: Option<usize>,

    /// Seconds to wait for speech to start.
    #[arg(long, default_value_t = DEFAULT_LISTEN_TIMEOUT.as_secs())]
    listen_timeout: u64,

    /// Recorder program; it must write raw 16-bit mono PCM to stdout.
    #[arg(long, default_value = "rec")]
    recorder: String,

    #[arg(long, default_value = DEFAULT_LANGUAGE)]
    language: String,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and index uploaded files, replacing the previous index.
    Ingest {
        /// PDF, PNG or JPEG files.
        files: Vec<PathBuf>,
        /// Folder searched recursively for supported files.
        #[arg(long)]
        folder: Option<PathBuf>,
    },
    /// Answer a single question.
    Ask {
        question: String,
    },
    /// Capture one spoken question and print the transcript.
    Listen,
    /// Interactive session (default).
    Chat,
}

impl Cli {
    fn settings(&self) -> Settings {
        let defaults = Settings::default();
        Settings {
            api_key: self.api_key.clone(),
            api_base_url: self.api_url.clone(),
            speech_base_url: self.speech_url.clone(),
            embedding_model: self.embedding_model.clone(),
            offline_embeddings: self.offline_embeddings,
            grounded_model: self.grounded_model.clone(),
            fallback_model: self.fallback_model.clone(),
            vision_model: self.vision_model.clone(),
            temperature: self.temperature,
            index_dir: self.index_dir.clone(),
            top_k: self.top_k,
            ingestion: IngestionOptions {
                workers: self.workers.unwrap_or(defaults.ingestion.workers),
                ..defaults.ingestion
            },
            listen_timeout: Duration::from_secs(self.listen_timeout),
            recorder: RecorderConfig {
                program: self.recorder.clone(),
                ..RecorderConfig::default()
            },
            speech_language: self.language.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = cli.settings();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        index_dir = %settings.index_dir.display(),
        "study-buddy boot"
    );

    let services = settings.build().context("failed to set up services")?;
    let indexed = services.store.exists().await;
    info!(indexed, "index status");
    let mut session = services.session();

    match cli.command.unwrap_or(Command::Chat) {
        Command::Ingest { files, folder } => {
            let mut paths = files;
            if let Some(folder) = folder {
                let found = discover_uploads(&folder);
                if found.is_empty() {
                    warn!(folder = %folder.display(), "no supported files found");
                }
                paths.extend(found);
            }

            let uploads = load_uploads(&paths)?;
            let notices = session.dispatch(UiEvent::SubmitAndProcess(uploads)).await?;
            render(&notices);
        }
        Command::Ask { question } => {
            let notices = session.dispatch(UiEvent::Ask(question)).await?;
            render(&notices);
        }
        Command::Listen => {
            println!("{LISTENING_MESSAGE}");
            let outcome = services.voice.listen().await;
            println!("{}", outcome.message());
        }
        Command::Chat => {
            if !indexed {
                println!("No processed documents yet; answers come from the general model.");
            }
            chat(&mut session).await?
        }
    }

    Ok(())
}

async fn chat(session: &mut Session) -> anyhow::Result<()> {
    println!("Chat with your study material. Type a question, or :help for commands.");
    let mut lines = BufReader::new(stdin()).lines();

    loop {
        let Some(line) = prompt(&mut lines, "\n> ").await? else {
            break;
        };
        let line = line.trim();

        let event = match line.split_once(' ').map_or((line, ""), |(head, rest)| (head, rest.trim())) {
            (":quit" | ":exit", _) => break,
            (":help", _) => {
                println!("{HELP}");
                continue;
            }
            (":upload", rest) => {
                let paths: Vec<PathBuf> = rest.split_whitespace().map(PathBuf::from).collect();
                match load_uploads(&paths) {
                    Ok(files) => UiEvent::SubmitAndProcess(files),
                    Err(error) => {
                        println!("error: {error}");
                        continue;
                    }
                }
            }
            (":voice", _) => UiEvent::Speak,
            (":up", _) => UiEvent::Feedback(Feedback::Positive),
            (":down", _) => UiEvent::Feedback(Feedback::Negative),
            (":login", _) => {
                dispatch(session, UiEvent::Auth(AuthEvent::ToggleLogin)).await;
                if session.state().auth != AuthPanel::Login {
                    continue;
                }
                let Some(username) = prompt(&mut lines, "Username: ").await? else {
                    break;
                };
                // Collected for the form only; nothing checks it.
                let Some(_password) = prompt(&mut lines, "Password: ").await? else {
                    break;
                };
                UiEvent::Auth(AuthEvent::SubmitLogin { username })
            }
            (":signup", _) => {
                dispatch(session, UiEvent::Auth(AuthEvent::ToggleSignup)).await;
                if session.state().auth != AuthPanel::Signup {
                    continue;
                }
                let Some(username) = prompt(&mut lines, "Username: ").await? else {
                    break;
                };
                let Some(password) = prompt(&mut lines, "Password: ").await? else {
                    break;
                };
                let Some(confirm_password) = prompt(&mut lines, "Confirm Password: ").await? else {
                    break;
                };
                UiEvent::Auth(AuthEvent::SubmitSignup {
                    username,
                    password,
                    confirm_password,
                })
            }
            (command, _) if command.starts_with(':') => {
                println!("unknown command {command}; try :help");
                continue;
            }
            _ => UiEvent::Ask(line.to_string()),
        };

        dispatch(session, event).await;
    }

    println!("Goodbye!");
    Ok(())
}

const HELP: &str = "\
  <question>        ask about the processed material
  :upload <paths>   submit & process PDFs and images
  :voice            ask by speaking
  :up / :down       rate the last answer
  :login / :signup  toggle the account forms
  :quit             leave";

async fn prompt(lines: &mut Lines<BufReader<Stdin>>, label: &str) -> anyhow::Result<Option<String>> {
    use std::io::Write;

    print!("{label}");
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?.map(|line| line.trim().to_string()))
}

async fn dispatch(session: &mut Session, event: UiEvent) {
    if let Some(notice) = event.announcement() {
        render(&[notice]);
    }
    match session.dispatch(event).await {
        Ok(notices) => render(&notices),
        Err(error) => {
            warn!(error = %error, "event failed");
            println!("error: {error}");
        }
    }
}

fn render(notices: &[Notice]) {
    for notice in notices {
        match notice {
            Notice::Info(message) => println!("{message}"),
            Notice::Success(message) => println!("[ok] {message}"),
            Notice::Warning(message) => println!("[warn] {message}"),
            Notice::Error(message) => println!("[error] {message}"),
            Notice::Reply(text) => println!("Reply: {text}"),
        }
    }
}
