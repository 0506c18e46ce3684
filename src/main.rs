use std::io::BufRead;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use voicetask::audio::{CpalOutput, PlaybackFragment, pcm};
use voicetask::credentials::{CommandKeySelector, KeySelector};
use voicetask::voice::{CapturePipeline, PlaybackScheduler};
use voicetask::{
    Config, CredentialResolver, Error, KeyStore, SessionController, SessionEvent, SessionState,
    TaskList, TaskSurface, ToolBridge, UserCommand, db,
};

/// voicetask - Talk to a realtime voice assistant that manages your tasks
#[derive(Parser)]
#[command(name = "voicetask", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Prompt for an API key and store it
    SetKey,
    /// Remove the stored API key
    ClearKey,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voicetask=info",
        1 => "info,voicetask=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::SetKey => set_key(),
            Command::ClearKey => clear_key(),
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
        };
    }

    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let credentials = build_resolver(&config)?;
    ensure_key(&credentials).await?;

    let tasks = Arc::new(TaskList::new());
    let tools = ToolBridge::new(tasks.clone());

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    tokio::spawn(print_events(event_rx));

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    spawn_stdin_reader(command_tx.clone(), tasks, build_resolver(&config)?);

    let ctrl_c_tx = command_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted");
            let _ = ctrl_c_tx.send(UserCommand::Quit);
        }
    });

    println!("Commands: connect, disconnect, tasks, quit");
    let _ = command_tx.send(UserCommand::Connect);

    let mut controller =
        SessionController::new(config.session_config(), credentials, tools, event_tx);
    controller.run(command_rx).await;

    Ok(())
}

/// Open the settings database under the configured data directory
fn open_store(config: &Config) -> anyhow::Result<KeyStore> {
    let pool = db::init(config.db_path())?;
    Ok(KeyStore::new(pool))
}

fn build_resolver(config: &Config) -> anyhow::Result<CredentialResolver> {
    let selector = match &config.key_command {
        Some(command) => {
            Some(Box::new(CommandKeySelector::parse(command)?) as Box<dyn KeySelector>)
        }
        None => None,
    };

    Ok(CredentialResolver::new(
        selector,
        Some(open_store(config)?),
        CredentialResolver::env_key(),
    ))
}

/// Prompt for a key when no source has one, and persist it
async fn ensure_key(credentials: &CredentialResolver) -> anyhow::Result<()> {
    match credentials.resolve().await {
        Ok(key) => {
            tracing::debug!(source = ?key.source, "API key available");
            Ok(())
        }
        Err(Error::MissingCredential) => {
            prompt_and_remember(credentials)?;
            credentials.resolve().await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn prompt_and_remember(credentials: &CredentialResolver) -> anyhow::Result<()> {
    println!("No API key found. It will be stored for future sessions.");
    let key = prompt_key()?;
    credentials.remember(&key)?;
    Ok(())
}

fn prompt_key() -> anyhow::Result<SecretString> {
    let key: String = dialoguer::Password::new()
        .with_prompt("Gemini API key")
        .interact()?;
    Ok(SecretString::from(key.trim().to_string()))
}

/// Read line commands on a dedicated thread so shutdown never waits on stdin
///
/// `connect` prompts for a key first when no source has one, e.g. after
/// `clear-key` ran while the session was up.
fn spawn_stdin_reader(
    commands: mpsc::UnboundedSender<UserCommand>,
    tasks: Arc<TaskList>,
    credentials: CredentialResolver,
) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let command = match line.trim() {
                "" => continue,
                "connect" | "c" => {
                    if !credentials.has_key_source()
                        && let Err(e) = prompt_and_remember(&credentials)
                    {
                        println!("Could not store API key: {e}");
                        continue;
                    }
                    UserCommand::Connect
                }
                "disconnect" | "d" => UserCommand::Disconnect,
                "quit" | "q" | "exit" => UserCommand::Quit,
                "tasks" | "t" => {
                    print_tasks(tasks.as_ref());
                    continue;
                }
                other => {
                    println!("Unknown command {other:?}. Try: connect, disconnect, tasks, quit");
                    continue;
                }
            };
            if commands.send(command).is_err() || command == UserCommand::Quit {
                return;
            }
        }
        let _ = commands.send(UserCommand::Quit);
    });
}

fn print_tasks(tasks: &dyn TaskSurface) {
    let tasks = tasks.list_all();
    if tasks.is_empty() {
        println!("(no tasks)");
        return;
    }
    for (i, task) in tasks.iter().enumerate() {
        let mark = if task.completed { "x" } else { " " };
        println!("{:2}. [{mark}] {}", i + 1, task.text);
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::State(SessionState::Closed { reason: Some(reason) }) => {
                println!("[session] closed: {reason}");
            }
            SessionEvent::State(state) => println!("[session] {state}"),
            SessionEvent::Speaking(true) => println!("[assistant] speaking..."),
            SessionEvent::Speaking(false) => println!("[assistant] done"),
            SessionEvent::Status(status) => println!("{status}"),
        }
    }
}

fn set_key() -> anyhow::Result<()> {
    let config = Config::load()?;
    let store = open_store(&config)?;
    store.set(&prompt_key()?)?;
    println!("API key stored in {}", config.db_path().display());
    Ok(())
}

fn clear_key() -> anyhow::Result<()> {
    let config = Config::load()?;
    open_store(&config)?.remove()?;
    println!("Stored API key removed");
    Ok(())
}

/// Test microphone input through the capture pipeline
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (mut capture, mut chunks) = CapturePipeline::start()?;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);

    println!("Sample rate: {} Hz", pcm::INPUT_SAMPLE_RATE);
    println!("---");

    let mut count = 0_usize;
    loop {
        let chunk = match tokio::time::timeout_at(deadline, chunks.recv()).await {
            Err(_) | Ok(None) => break,
            Ok(Some(chunk)) => chunk?,
        };
        count += 1;

        let energy = calculate_rms(chunk.samples());
        let peak = chunk.samples().iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{count:3}] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]");
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output by scheduling two tones back to back
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone followed by a 660Hz tone, with no gap\n");

    let (output, mut ended) = CpalOutput::open()?;
    let mut scheduler = PlaybackScheduler::new(output);
    let sample_rate = scheduler.sample_rate();

    for frequency in [440.0_f32, 660.0] {
        scheduler.schedule(tone(frequency, sample_rate, 1.0)?)?;
    }
    println!("Scheduled 2 tones at {sample_rate} Hz, ending at {:.2}s", scheduler.cursor());

    let wait = async {
        while scheduler.is_speaking() {
            match ended.recv().await {
                Some(id) => {
                    scheduler.on_source_ended(id);
                }
                None => break,
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(5), wait).await.is_err() {
        tracing::warn!("playback did not report completion");
    }
    scheduler.shutdown();

    println!("\n---");
    println!("If you heard both tones, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Sine tone at 30% volume
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn tone(frequency: f32, sample_rate: u32, seconds: f32) -> voicetask::Result<PlaybackFragment> {
    let num_samples = (sample_rate as f32 * seconds) as usize;
    let samples = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();
    PlaybackFragment::new(samples, sample_rate)
}
