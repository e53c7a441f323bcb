mod render;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use ideasketch::chat::{ChatEngine, EngineOptions, SendOutcome};
use ideasketch::config::{self, Config};
use ideasketch::events::ChatEvent;
use ideasketch::llm::PredictionClient;
use ideasketch::pagination;
use ideasketch::session::Role;
use ideasketch::store::{self, FileStore, FontSize, KeyValueStore};
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "ideasketch")]
#[command(about = "IdeaSketch CLI: chat with the patent idea assistant", long_about = None)]
struct Cli {
    /// Config file path (default: IDEASKETCH_CONFIG_PATH or ~/.ideasketch/config.json)
    #[arg(long, short, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config, and the storage directory.
    Init,

    /// Send a test question to the prediction API and report connectivity.
    Probe,

    /// Start a new chat session and make it current.
    New,

    /// List sessions, newest first. The current one is marked with `*`.
    List,

    /// Make a session current.
    Select { id: String },

    /// Rename a session. Blank titles are ignored.
    Rename { id: String, title: String },

    /// Delete a session.
    Delete { id: String },

    /// Export a session as JSON.
    Export {
        id: String,
        /// Output directory (default: current directory)
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// Show messages of a session, newest first.
    Show {
        /// Session id (default: current session)
        #[arg(long, value_name = "ID")]
        session: Option<String>,
        /// Page number, 1 is the newest
        #[arg(long, default_value_t = 1)]
        page: usize,
    },

    /// Send one message to the current session and stream the reply.
    Send { text: String },

    /// Chat interactively. `/new` starts a new session, `/exit` or `/quit` leaves.
    Chat,

    /// Show or change display settings.
    Settings {
        /// small, medium or large
        #[arg(long, value_name = "SIZE")]
        font_size: Option<String>,
        #[arg(long, value_name = "BOOL")]
        dark_mode: Option<bool>,
        #[arg(long, value_name = "BOOL")]
        sound: Option<bool>,
        #[arg(long, value_name = "BOOL")]
        typing_indicator: Option<bool>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Run with --help for usage");
        return;
    };

    let result = match command {
        Commands::Version => {
            println!("ideasketch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Init => run_init(cli.config),
        other => match open(cli.config).await {
            Ok(app) => run(app, other).await,
            Err(e) => Err(e),
        },
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let storage = ideasketch::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", path.display());
    println!("sessions are stored in {}", storage.display());
    Ok(())
}

struct App {
    config: Config,
    store: Arc<dyn KeyValueStore>,
    engine: Arc<ChatEngine>,
}

async fn open(config_path: Option<PathBuf>) -> anyhow::Result<App> {
    let (config, path) = config::load_config(config_path)?;
    let storage = config::resolve_storage_dir(&config, &path);
    log::debug!("using storage directory {}", storage.display());
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(storage));
    let client = PredictionClient::new(
        config::resolve_api_url(&config),
        config::resolve_api_key(&config),
    );
    let engine = ChatEngine::load(store.clone(), client, EngineOptions::from_config(&config)).await;
    Ok(App {
        config,
        store,
        engine: Arc::new(engine),
    })
}

async fn run(app: App, command: Commands) -> anyhow::Result<()> {
    let engine = &app.engine;
    match command {
        Commands::Version | Commands::Init => Ok(()),
        Commands::Probe => {
            let mut events = engine.subscribe();
            let ok = engine.test_api_connection().await;
            drain_notices(&mut events);
            println!("status: {}", engine.status());
            if ok {
                Ok(())
            } else {
                anyhow::bail!("api probe failed")
            }
        }
        Commands::New => {
            let id = engine.create_session().await;
            println!("{}", id);
            Ok(())
        }
        Commands::List => {
            let current = engine.current_session_id().await;
            let sessions = engine.sessions().await;
            if sessions.is_empty() {
                println!("no sessions yet");
            }
            for session in &sessions {
                render::print_session_line(session, current.as_deref() == Some(session.id.as_str()));
            }
            Ok(())
        }
        Commands::Select { id } => {
            if engine.session(&id).await.is_none() {
                anyhow::bail!("no session with id {}", id);
            }
            engine.select_session(&id).await;
            Ok(())
        }
        Commands::Rename { id, title } => {
            if !engine.rename_session(&id, &title).await {
                anyhow::bail!("session {} not renamed (unknown id or blank title)", id);
            }
            Ok(())
        }
        Commands::Delete { id } => {
            if !engine.delete_session(&id).await {
                anyhow::bail!("no session with id {}", id);
            }
            match engine.current_session_id().await {
                Some(current) => println!("current session: {}", current),
                None => println!("no sessions left"),
            }
            Ok(())
        }
        Commands::Export { id, out } => {
            let dir = out.unwrap_or_else(|| PathBuf::from("."));
            let mut events = engine.subscribe();
            let path = engine.export_session(&id, &dir).await?;
            drain_notices(&mut events);
            match path {
                Some(path) => {
                    println!("{}", path.display());
                    Ok(())
                }
                None => anyhow::bail!("no session with id {}", id),
            }
        }
        Commands::Show { session, page } => {
            let session = match session {
                Some(id) => engine.session(&id).await,
                None => engine.current_session().await,
            };
            let Some(session) = session else {
                anyhow::bail!("no such session");
            };
            render::print_session_page(&session, page, app.config.ui.messages_per_page);
            Ok(())
        }
        Commands::Send { text } => {
            let settings = store::load_settings(app.store.as_ref()).await;
            match send_and_render(engine.clone(), text, settings.typing_indicator).await? {
                Some(SendOutcome::Failed) => anyhow::bail!("send failed"),
                Some(_) => Ok(()),
                None => anyhow::bail!("nothing to send"),
            }
        }
        Commands::Chat => run_chat(&app).await,
        Commands::Settings {
            font_size,
            dark_mode,
            sound,
            typing_indicator,
        } => {
            let mut settings = store::load_settings(app.store.as_ref()).await;
            let changed = font_size.is_some()
                || dark_mode.is_some()
                || sound.is_some()
                || typing_indicator.is_some();
            if let Some(size) = font_size {
                settings.font_size = parse_font_size(&size)?;
            }
            if let Some(v) = dark_mode {
                settings.dark_mode = v;
            }
            if let Some(v) = sound {
                settings.sound_enabled = v;
            }
            if let Some(v) = typing_indicator {
                settings.typing_indicator = v;
            }
            if changed {
                store::save_settings(app.store.as_ref(), &settings).await?;
            }
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

fn parse_font_size(s: &str) -> anyhow::Result<FontSize> {
    serde_json::from_value(serde_json::Value::String(s.trim().to_lowercase()))
        .map_err(|_| anyhow::anyhow!("unknown font size {:?} (expected small, medium or large)", s))
}

fn drain_notices(events: &mut broadcast::Receiver<ChatEvent>) {
    while let Ok(event) = events.try_recv() {
        if let ChatEvent::Notice(notice) = event {
            render::print_notice(&notice);
        }
    }
}

/// Send `text` and print the reply as it streams. Ctrl-C cancels the reply.
async fn send_and_render(
    engine: Arc<ChatEngine>,
    text: String,
    typing_indicator: bool,
) -> anyhow::Result<Option<SendOutcome>> {
    let mut events = engine.subscribe();
    let mut task = tokio::spawn({
        let engine = engine.clone();
        async move { engine.send_message(&text).await }
    });
    let mut renderer = render::Renderer::new(typing_indicator);
    let mut open = true;

    let receipt = loop {
        tokio::select! {
            joined = &mut task => break joined?,
            event = events.recv(), if open => match event {
                Ok(ChatEvent::MessageUpdated { session_id, message_id }) => {
                    if let Some(message) = engine.message(&session_id, &message_id).await {
                        if message.role == Role::Assistant {
                            renderer.update(&message)?;
                        }
                    }
                }
                Ok(ChatEvent::SlowResponse { .. }) => {
                    eprintln!("\n(the assistant is taking longer than usual)");
                }
                Ok(ChatEvent::Notice(notice)) => render::print_notice(&notice),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::debug!("renderer skipped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => open = false,
            },
            _ = tokio::signal::ctrl_c() => {
                if engine.cancel_in_flight().await {
                    log::info!("cancelling reply");
                }
            }
        }
    };
    drain_notices(&mut events);

    let Some(receipt) = receipt else {
        return Ok(None);
    };
    let exchange = &receipt.exchange;
    if let Some(message) = engine
        .message(&exchange.session_id, &exchange.assistant_message_id)
        .await
    {
        renderer.finish(&message)?;
    }
    Ok(Some(receipt.outcome))
}

async fn run_chat(app: &App) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let engine = &app.engine;
    let settings = store::load_settings(app.store.as_ref()).await;
    if let Some(session) = engine.current_session().await {
        println!("continuing \"{}\" ({})", session.title, session.id);
        for message in pagination::latest_window(&session.messages, app.config.ui.messages_per_page) {
            let label = match message.role {
                Role::User => ">",
                Role::Assistant => "<",
            };
            println!("{} {}", label, message.content.trim());
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        if input.eq_ignore_ascii_case("/new") {
            let id = engine.create_session().await;
            println!("started session {}", id);
            continue;
        }

        write!(stdout, "< ")?;
        stdout.flush()?;
        if let Err(e) = send_and_render(engine.clone(), input.to_string(), settings.typing_indicator).await {
            eprintln!("chat error: {}", e);
        }
    }

    Ok(())
}
