use clap::Parser;
use livecap::audio::capture::{CpalAudioSource, list_devices};
use livecap::config::Config;
use livecap::stt::engine::MockEngine;
use livecap::supervisor::Supervisor;
use livecap::vad::EnergyDetector;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

fn version() -> &'static str {
    option_env!("GIT_HASH").unwrap_or(env!("CARGO_PKG_VERSION"))
}

#[derive(Parser, Debug)]
#[command(name = "livecap", version = version(), about = "Live transcription pipeline with a loopback broadcast socket")]
struct Cli {
    /// Configuration file (defaults to ~/.config/livecap/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the capture → transcribe → broadcast session (default)
    Run {
        /// Audio input device name (see `livecap devices`)
        #[arg(short, long)]
        device: Option<String>,
    },
    /// List available audio input devices
    Devices,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path)?.with_env_overrides();

    match cli.command.unwrap_or(Commands::Run { device: None }) {
        Commands::Devices => {
            for device in list_devices()? {
                println!("{}", device);
            }
            Ok(())
        }
        Commands::Run { device } => {
            let device = device
                .filter(|d| !d.is_empty())
                .or_else(|| config.audio.device.clone());
            run(config, device)
        }
    }
}

fn run(config: Config, device: Option<String>) -> anyhow::Result<()> {
    let source = CpalAudioSource::new(device.as_deref(), config.audio.sample_rate)?;

    // The speech model is an external collaborator; this build wires the
    // stub engine so the pipeline can be exercised end to end.
    // TODO: load a real engine behind the SpeechEngine seam once the model
    // crate lands.
    warn!("no speech model linked in this build, using the stub engine");
    let engine = Arc::new(MockEngine::new("stub"));

    let handle = Supervisor::new(config).start(
        Box::new(source),
        Box::new(EnergyDetector::default()),
        engine,
    )?;

    info!(
        session = %handle.session().session_id,
        hub = %handle.hub_addr(),
        "session running, press Ctrl+C to stop"
    );

    // Ctrl+C clears the cancel flag; wait() also returns on escalation.
    let cancel = handle.cancel_flag();
    let signal_runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    std::thread::spawn(move || {
        if signal_runtime
            .block_on(tokio::signal::ctrl_c())
            .is_ok()
        {
            cancel.store(false, Ordering::SeqCst);
        }
    });

    handle.wait();
    handle.shutdown();
    Ok(())
}
