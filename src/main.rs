use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use focusup::live::{HostProbe, WebSocketConnector};
use focusup::tasks::{JsonFilePersistence, today_local};
use focusup::voice::{
    AudioDevices, CpalDevices, INPUT_SAMPLE_RATE, InputStream, OUTPUT_SAMPLE_RATE, PcmBuffer,
    PlaybackScheduler, samples_to_wav,
};
use focusup::{
    Collaborators, Config, SessionEvent, SessionManager, SessionState, TaskStatus, TaskStore,
    ToolDispatcher,
};

/// FocusUp - talk to your task list
#[derive(Parser)]
#[command(name = "focusup", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start a voice session (default)
    Run,
    /// Inspect or edit the task list
    Tasks {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Save the captured audio as WAV
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
    /// Interactive first-run setup
    Setup,
}

#[derive(Subcommand)]
enum TaskAction {
    /// List tasks
    List {
        /// Only tasks for this local date (`YYYY-MM-DD`), or "today"
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Add a task
    Add {
        content: String,
        /// Local date the task belongs to (`YYYY-MM-DD`)
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Flip a task between pending and done
    Toggle { id: String },
    /// Delete a task
    Remove { id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,focusup=info",
        1 => "info,focusup=debug",
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

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_session().await,
        Command::Tasks { action } => run_tasks(action),
        Command::TestMic { duration, output } => test_mic(duration, output).await,
        Command::TestSpeaker => test_speaker().await,
        Command::Setup => focusup::setup::run_setup(),
    }
}

fn open_store(config: &Config) -> anyhow::Result<TaskStore> {
    let persistence = JsonFilePersistence::in_dir(&config.data_dir);
    tracing::debug!(path = %persistence.path().display(), "opening task store");
    Ok(TaskStore::new(Arc::new(persistence))?)
}

/// Run a live session until Ctrl-C or a terminal error
async fn run_session() -> anyhow::Result<()> {
    let config = Config::load();
    tracing::debug!(?config, "loaded configuration");

    let store = open_store(&config)?;
    let session_config = config.session_config();
    let collaborators = Collaborators {
        connector: Arc::new(WebSocketConnector::new(config.endpoint.clone())),
        devices: Arc::new(CpalDevices),
        reachability: Arc::new(HostProbe::new(config.probe_host.clone())),
        credentials: Arc::new(config),
    };

    let manager = SessionManager::new(session_config, ToolDispatcher::new(store), collaborators);
    let mut events = manager.subscribe();

    if let Err(e) = manager.start().await {
        let status = manager.status();
        println!("{}: {}", status.headline, status.detail);
        return Err(e.into());
    }
    tracing::info!("focusup ready - press Ctrl-C to stop");

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            event = events.recv() => match event {
                Ok(SessionEvent::Status(status)) => {
                    println!("[{}] {} {}", status.state, status.headline, status.detail);
                    if status.state == SessionState::Error {
                        break Err(anyhow::anyhow!(
                            "session failed: {}",
                            status.last_error.map_or("unknown", |k| k.as_str())
                        ));
                    }
                }
                Ok(SessionEvent::Transcript(text)) => {
                    if !text.is_empty() {
                        println!("  > {text}");
                    }
                }
                Ok(SessionEvent::TasksChanged) => print_tasks(&manager.dispatcher().store().list()),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "event listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break Ok(()),
            },
        }
    };

    manager.stop().await;
    outcome
}

fn run_tasks(action: TaskAction) -> anyhow::Result<()> {
    let config = Config::load();
    let store = open_store(&config)?;

    match action {
        TaskAction::List { date } => {
            let date = date.map(|d| if d == "today" { today_local() } else { d });
            match date {
                Some(d) => print_tasks(&store.list_for_date(&d)),
                None => print_tasks(&store.list()),
            }
        }
        TaskAction::Add { content, date } => {
            let task = store.add(&content, date.as_deref())?;
            println!("Added {} ({})", task.id(), task.local_date());
        }
        TaskAction::Toggle { id } => {
            if !store.toggle_status(&id)? {
                anyhow::bail!("no task with id {id}");
            }
            println!("Toggled {id}");
        }
        TaskAction::Remove { id } => {
            if !store.remove(&id)? {
                anyhow::bail!("no task with id {id}");
            }
            println!("Removed {id}");
        }
    }
    Ok(())
}

fn print_tasks(tasks: &[focusup::Task]) {
    if tasks.is_empty() {
        println!("No tasks.");
        return;
    }
    for task in tasks {
        let mark = if task.status == TaskStatus::Done { "x" } else { " " };
        println!(
            "[{mark}] {:<6} {}  {}  ({})",
            task.priority.as_str(),
            task.content,
            task.local_date(),
            task.id()
        );
    }
}

/// Test microphone input
async fn test_mic(duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (frames_tx, mut frames) = mpsc::channel(64);
    let mut input = tokio::task::spawn_blocking(move || CpalDevices.open_input(frames_tx)).await??;

    println!("Sample rate: {INPUT_SAMPLE_RATE} Hz");
    println!("---");

    let mut recorded = Vec::new();
    for i in 0..duration {
        let mut second = Vec::new();
        let deadline = tokio::time::sleep(Duration::from_secs(1));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                () = &mut deadline => break,
                Some(frame) = frames.recv() => second.extend(frame),
            }
        }

        let energy = calculate_rms(&second);
        let peak = second.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);

        if output.is_some() {
            recorded.extend(second);
        }
    }

    input.close();

    if let Some(path) = output {
        let wav = samples_to_wav(&recorded, INPUT_SAMPLE_RATE)?;
        std::fs::write(&path, wav)?;
        println!("\nSaved {} samples to {}", recorded.len(), path.display());
    }

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

/// Test speaker output with two back-to-back tones through the scheduler
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear 440 Hz then 660 Hz, one second each, with no gap\n");

    let (ended_tx, mut ended) = mpsc::unbounded_channel();
    let output = tokio::task::spawn_blocking(move || CpalDevices.open_output(ended_tx)).await??;
    let mut scheduler = PlaybackScheduler::new(output);

    for frequency in [440.0_f32, 660.0] {
        let buffer = PcmBuffer::new(tone(frequency, 1.0), OUTPUT_SAMPLE_RATE);
        if let Some(segment) = scheduler.schedule(buffer)? {
            println!(
                "Segment {} at {:.2}s for {:.2}s",
                segment.id, segment.start_time, segment.duration
            );
        }
    }

    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(id) = ended.recv().await {
            if scheduler.complete(id) {
                break;
            }
        }
    })
    .await;
    scheduler.shutdown();

    println!("\n---");
    if drained.is_err() {
        println!("Playback never reported completion; the output device may be stalled.");
    }
    println!("If you heard the tones, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn tone(frequency: f32, seconds: f32) -> Vec<f32> {
    let rate = OUTPUT_SAMPLE_RATE as f32;
    let count = (rate * seconds) as usize;
    (0..count)
        .map(|i| (2.0 * std::f32::consts::PI * frequency * i as f32 / rate).sin() * 0.3)
        .collect()
}
