//! CLI host for fortune.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use fortune::conversation::{Collaborators, Orchestrator};
use fortune::playback::{AudioOutput, SilentOutput};
use fortune::transport::{HttpChatTransport, HttpSpeechTransport, SpeechTransport};
use fortune::{FortuneConfig, FortuneError, ReadingUi, UiEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Fortune: a spoken, choose-your-path fortune reading.
#[derive(Parser)]
#[command(name = "fortune", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the default configuration to the default path and exit.
    #[arg(long)]
    write_default_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fortune=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.write_default_config {
        let path = FortuneConfig::default_config_path();
        FortuneConfig::default().save_to_file(&path)?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    let config = load_config(cli.config.as_ref())?;
    run_reading(config).await
}

fn load_config(explicit: Option<&PathBuf>) -> anyhow::Result<FortuneConfig> {
    if let Some(path) = explicit {
        return Ok(FortuneConfig::from_file(path)?);
    }
    let path = FortuneConfig::default_config_path();
    if path.exists() {
        info!(path = %path.display(), "loading config");
        Ok(FortuneConfig::from_file(&path)?)
    } else {
        Ok(FortuneConfig::default())
    }
}

async fn run_reading(config: FortuneConfig) -> anyhow::Result<()> {
    println!("Fortune v{}", env!("CARGO_PKG_VERSION"));

    let chat = Arc::new(HttpChatTransport::from_config(&config.chat)?);
    let speech: Option<Arc<dyn SpeechTransport>> =
        match HttpSpeechTransport::from_config(&config.speech) {
            Ok(transport) => Some(Arc::new(transport)),
            Err(FortuneError::ConfigurationGap(_)) => None,
            Err(e) => return Err(e.into()),
        };

    let skip_key = config.ui.skip_key.clone();
    let mut collaborators =
        Collaborators::new(chat, Arc::new(TerminalUi)).with_output(audio_output());
    if let Some(speech) = speech {
        collaborators = collaborators.with_speech(speech);
    }
    let orchestrator = Orchestrator::new(config, collaborators);

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            ctrl_c.cancel();
        }
    });

    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(read_stdin(tx, skip_key, shutdown.clone()));

    println!("Type 1-3 to choose, anything else to ask freely. Press Ctrl+C to quit.\n");
    orchestrator.run(rx, shutdown).await?;
    Ok(())
}

#[cfg(feature = "device-audio")]
fn audio_output() -> Arc<dyn AudioOutput> {
    match fortune::audio::DeviceOutput::new(None) {
        Ok(output) => Arc::new(output),
        Err(e) => {
            warn!(error = %e, "no audio device; speech will be silent");
            Arc::new(SilentOutput)
        }
    }
}

#[cfg(not(feature = "device-audio"))]
fn audio_output() -> Arc<dyn AudioOutput> {
    warn!("built without device-audio; speech will be silent");
    Arc::new(SilentOutput)
}

/// Turn stdin lines into UI events.
async fn read_stdin(tx: mpsc::Sender<UiEvent>, skip_key: String, shutdown: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                break;
            }
        };
        let Some(event) = parse_input(&line, &skip_key) else {
            continue;
        };
        if tx.send(event).await.is_err() {
            break;
        }
    }
}

fn parse_input(line: &str, skip_key: &str) -> Option<UiEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.eq_ignore_ascii_case(skip_key) {
        return Some(UiEvent::SkipRequested);
    }
    match line.parse::<usize>() {
        Ok(n @ 1..=3) => Some(UiEvent::ChoiceSelected(n - 1)),
        _ => Some(UiEvent::TextSubmitted(line.to_owned())),
    }
}

/// Prints the reading to stdout.
struct TerminalUi;

impl ReadingUi for TerminalUi {
    fn display_text(&self, text: &str) {
        println!("\n  {text}\n");
    }

    fn present_choices(&self, choices: &[String; 3]) {
        for (i, choice) in choices.iter().enumerate() {
            println!("  {}) {choice}", i + 1);
        }
    }

    fn set_interactable(&self, interactable: bool) {
        if interactable {
            println!();
        } else {
            println!("  ...");
        }
    }

    fn set_visible(&self, visible: bool) {
        if visible {
            println!("~ The cards are shuffled ~");
        }
    }
}
