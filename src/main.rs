use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loqa_bridge::{
    check_api_key, create_router, AppState, AudioSource, BridgeController, Collaborators, Config,
    ConfigProvider, EnvConfigProvider, StatusReceiver, StatusSink, WavFileSource,
    WebSocketTransport,
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loqa-bridge")]
#[command(version, about = "Stream meeting audio to the OpenAI Realtime API")]
struct Cli {
    /// Configuration file, without extension
    #[arg(short, long, default_value = "config/loqa-bridge")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a session in the foreground, printing responses as they arrive
    Run,

    /// Serve the HTTP control API
    Serve {
        /// Override the configured bind address
        #[arg(long)]
        bind: Option<String>,

        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List audio input devices
    Devices,

    /// Check the OpenAI API key against the REST API
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before anything reads OPENAI_* variables
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Loqa Bridge v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run => run_console(cfg).await,
        Command::Serve { bind, port } => serve(cfg, bind, port).await,
        Command::Devices => list_devices(&cfg),
        Command::Check => check_key(&cfg).await,
    }
}

fn audio_source(cfg: &Config) -> Result<Arc<dyn AudioSource>> {
    if let Some(path) = &cfg.audio.wav_path {
        info!("Using WAV file input: {}", path);
        return Ok(Arc::new(WavFileSource::new(path, cfg.audio.wav_loop)));
    }

    #[cfg(feature = "cpal")]
    {
        Ok(Arc::new(loqa_bridge::CpalAudioSource::new(
            cfg.audio.read_timeout(),
        )))
    }

    #[cfg(not(feature = "cpal"))]
    {
        anyhow::bail!(
            "no audio input available: set audio.wav_path or build with --features cpal"
        )
    }
}

fn controller(cfg: &Config) -> Result<(Arc<BridgeController>, StatusReceiver)> {
    let collaborators = Collaborators {
        config: Arc::new(EnvConfigProvider::new(&cfg.prompt.path)),
        audio: audio_source(cfg)?,
        transport: Arc::new(WebSocketTransport::new(&cfg.transport)),
    };
    let (status, messages) = StatusSink::channel();
    let controller = BridgeController::new(collaborators, cfg.clone(), status);
    Ok((Arc::new(controller), messages))
}

async fn run_console(cfg: Config) -> Result<()> {
    let (controller, mut messages) = controller(&cfg)?;

    let starter = controller.clone();
    if !tokio::task::spawn_blocking(move || starter.start()).await? {
        print_messages(&mut messages);
        anyhow::bail!("session did not start");
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut poll = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, stopping session");
                break;
            }
            _ = poll.tick() => {
                print_messages(&mut messages);
                if !controller.is_running() {
                    warn!("Session ended on its own");
                    break;
                }
            }
        }
    }

    if controller.is_running() {
        let stopper = controller.clone();
        tokio::task::spawn_blocking(move || stopper.stop()).await?;
    }
    print_messages(&mut messages);
    Ok(())
}

fn print_messages(messages: &mut StatusReceiver) {
    let mut stdout = std::io::stdout().lock();
    for entry in messages.drain_all() {
        let _ = write!(stdout, "{}", entry);
    }
    let _ = stdout.flush();
}

async fn serve(cfg: Config, bind: Option<String>, port: Option<u16>) -> Result<()> {
    let addr = format!(
        "{}:{}",
        bind.unwrap_or_else(|| cfg.http.bind.clone()),
        port.unwrap_or(cfg.http.port)
    );
    let (controller, messages) = controller(&cfg)?;
    let app = create_router(AppState::new(controller.clone(), messages));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP control API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down HTTP server");
        })
        .await?;

    if controller.is_running() {
        tokio::task::spawn_blocking(move || controller.stop()).await?;
    }
    Ok(())
}

fn list_devices(cfg: &Config) -> Result<()> {
    let source = audio_source(cfg)?;
    let devices = source.list_devices()?;

    println!("Audio devices ({}):", source.name());
    for device in &devices {
        println!("  {}", device.describe());
    }
    match source.default_input_device()? {
        Some(device) => println!("Default input: {}", device.name),
        None => println!("No default input device"),
    }
    Ok(())
}

async fn check_key(cfg: &Config) -> Result<()> {
    let endpoint = EnvConfigProvider::new(&cfg.prompt.path).load_endpoint_params()?;
    endpoint.validate()?;

    match check_api_key(&endpoint, &cfg.transport).await {
        Ok(models) => {
            println!("✅ OpenAI API connection test successful. API key is valid.");
            println!("{} models available", models);
            Ok(())
        }
        Err(e) => {
            println!("❌ OpenAI API connection test failed: {}", e);
            if let Some(hint) = e.hint() {
                println!("{}", hint);
            }
            Err(e.into())
        }
    }
}
