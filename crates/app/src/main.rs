use std::{
    io::{self, BufRead},
    path::PathBuf,
    thread,
};

use clap::{Parser, Subcommand};
use color_hustler_core::{
    assemble, remote, Clock, ControlChannel, DmxSink, RotatorProfile, ShowConfig, TracingDmx,
    TracingMidi,
};
use tracing_subscriber::EnvFilter;

fn main() -> color_hustler_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, framerate } => run_show(config.as_ref(), framerate),
        Commands::Calibrate { profile } => print_calibration(&profile),
        Commands::Config => print_default_config(),
    }
}

fn run_show(
    config_path: Option<&PathBuf>,
    framerate: Option<f64>,
) -> color_hustler_core::Result<()> {
    let mut config = match config_path {
        Some(path) => ShowConfig::load(path)?,
        None => ShowConfig::default(),
    };
    if let Some(framerate) = framerate {
        config.framerate = framerate;
    }
    tracing::info!(?config_path, framerate = config.framerate, "starting show");

    let dmx = config
        .has_fixtures()
        .then(|| Box::new(TracingDmx::default()) as Box<dyn DmxSink>);
    let mut show = assemble(&config, Clock::monotonic(), Box::new(TracingMidi), dmx)?;

    let (control, endpoint) = remote::channel();
    spawn_stdin_reader(control.clone());
    let printer = thread::spawn(move || print_responses(&control));

    show.run(&endpoint);
    drop(endpoint);

    if printer.join().is_err() {
        tracing::error!("response printer panicked");
    }
    tracing::info!(frames = show.frames_rendered(), "show finished");
    Ok(())
}

/// Stdin stands in for the network transport: one JSON command per line.
fn spawn_stdin_reader(control: ControlChannel) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    tracing::warn!(%err, "stdin read failed");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            if let Err(err) = control.send_text(&line) {
                tracing::debug!(%err, "show no longer accepting commands");
                break;
            }
        }
    });
}

/// Prints responses as JSON lines until the show drops its end.
fn print_responses(control: &ControlChannel) {
    for response in control.responses().iter() {
        match response.encode() {
            Ok(line) => println!("{line}"),
            Err(err) => tracing::error!(%err, "could not encode response"),
        }
    }
}

fn print_calibration(profile: &str) -> color_hustler_core::Result<()> {
    let profile: RotatorProfile = serde_json::from_value(serde_json::Value::from(profile))?;
    let table = profile.build_table()?;
    tracing::info!(?profile, entries = table.len(), "built calibration table");
    let pairs: Vec<(f64, u8)> = table.iter().collect();
    println!("{}", serde_json::to_string(&pairs)?);
    Ok(())
}

fn print_default_config() -> color_hustler_core::Result<()> {
    println!("{}", serde_json::to_string_pretty(&ShowConfig::default())?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Lighting and color organ show controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the show, reading JSON commands from stdin.
    Run {
        /// Show configuration file (JSON).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the render rate in frames per second.
        #[arg(short, long)]
        framerate: Option<f64>,
    },
    /// Print the calibration table for a rotator profile as `[[signal, code], ...]`.
    Calibrate {
        /// One of `roto_q`, `smart_move` or `gobo_spinna`.
        profile: String,
    },
    /// Print the default show configuration.
    Config,
}
