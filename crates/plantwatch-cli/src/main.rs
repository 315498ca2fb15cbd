//! plantwatch command line
//!
//! Drives a phased loader against a seeded simulated plant.

mod output;
mod sim;

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use plantwatch_loader::prelude::*;
use sim::SimulationSettings;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let config = Arg::new("config")
        .long("config")
        .short('c')
        .value_parser(value_parser!(PathBuf))
        .help("Loader config file (.toml, .yaml, .yml)");

    Command::new("plantwatch")
        .version(plantwatch_loader::VERSION)
        .about("Phased plant telemetry loader")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run recurring loads against a simulated plant")
                .arg(config.clone())
                .arg(
                    Arg::new("plant")
                        .long("plant")
                        .default_value("plant-1")
                        .help("Plant identifier"),
                )
                .arg(
                    Arg::new("cycles")
                        .long("cycles")
                        .default_value("3")
                        .value_parser(value_parser!(u64))
                        .help("Completed cycles before exiting (0 runs until interrupted)"),
                )
                .arg(
                    Arg::new("interval-ms")
                        .long("interval-ms")
                        .value_parser(value_parser!(u64))
                        .help("Refresh interval in milliseconds (overrides config)"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("failure-rate")
                        .long("failure-rate")
                        .default_value("0.1")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a single fetch fails"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print snapshots as JSON lines"),
                ),
        )
        .subcommand(
            Command::new("layout")
                .about("Print the effective tier layout")
                .arg(config)
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &ArgMatches) -> Result<LoaderConfig> {
    match args.get_one::<PathBuf>("config") {
        Some(path) => LoaderConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(LoaderConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("simulate", args)) => simulate(args).await,
        Some(("layout", args)) => layout(args),
        _ => Ok(()),
    }
}

async fn simulate(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let plant = EntityId::new(
        args.get_one::<String>("plant")
            .cloned()
            .unwrap_or_default(),
    )?;
    let cycles = args.get_one::<u64>("cycles").copied().unwrap_or(3);
    let interval = args
        .get_one::<u64>("interval-ms")
        .map_or_else(|| config.refresh_interval(), |ms| Duration::from_millis(*ms));
    let json = args.get_flag("json");

    let settings = SimulationSettings {
        seed: args.get_one::<u64>("seed").copied().unwrap_or(42),
        failure_rate: args.get_one::<f64>("failure-rate").copied().unwrap_or(0.1),
        ..SimulationSettings::default()
    };
    if !(0.0..=1.0).contains(&settings.failure_rate) {
        bail!("--failure-rate must be between 0 and 1");
    }

    let fetchers = sim::plant_source(config.layout.tiers.iter().flatten(), &settings);
    let loader = PhasedLoader::from_config(&config, &fetchers)?;
    let mut events = loader.events();

    info!(
        plant = %plant,
        cycles,
        interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        seed = settings.seed,
        "starting simulation"
    );
    let refresh = loader.schedule_recurring(&plant, interval)?;

    let mut finished = 0;
    while cycles == 0 || finished < cycles {
        tokio::select! {
            event = events.recv() => match event {
                Ok(LoaderEvent::CycleCompleted { .. }) => {
                    finished += 1;
                    let snapshot = loader.snapshot();
                    if json {
                        println!("{}", serde_json::to_string(&snapshot)?);
                    } else {
                        println!("{}", output::snapshot_text(&snapshot, &config.layout));
                    }
                }
                Ok(LoaderEvent::CycleSkipped { entity }) => {
                    debug!(%entity, "tick skipped, previous cycle still running");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!(missed, "event receiver lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    refresh.shutdown().await;

    let stats = loader.stats();
    if json {
        println!("{}", serde_json::to_string(&stats)?);
    } else {
        println!("{}", output::stats_text(&stats));
    }
    Ok(())
}

fn layout(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&config.layout)?);
    } else {
        println!("{}", output::layout_text(&config.layout));
    }
    Ok(())
}
