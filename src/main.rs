// src/main.rs - Dashboard entry point: poll loop and operator commands
use clap::{Parser, Subcommand};
use kiln_dash::api::{HttpControllerApi, PidSaveRequest};
use kiln_dash::chart::BitmapSurface;
use kiln_dash::config::{self, Config};
use kiln_dash::pins::{self, PinRole};
use kiln_dash::sync::{CycleOutcome, StateSynchronizer, ViewMode};
use kiln_dash::view::{Field, StepRow};
use std::path::PathBuf;
use std::sync::Arc;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dashboard for a single kiln temperature controller.
#[derive(Parser, Debug)]
#[command(name = "kiln-dash", about = "Rolling chart, profile editor and pin/PID configuration for a kiln controller.")]
struct Cli {
    /// Path to a TOML config file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured view (live or config)
    #[arg(long)]
    view: Option<ViewMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Poll the controller until interrupted (default)
    Watch,
    /// Run a single synchronization cycle and print the bound fields
    Once,
    /// Start the heating run
    Start,
    /// Stop the heating run
    Stop,
    /// Switch control mode (0 = manual, other values = profile)
    Mode {
        mode: i64,
        /// Setpoint for manual mode; the controller's current setpoint when omitted
        #[arg(long)]
        setpoint: Option<f64>,
    },
    /// Edit the heating profile
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Save PID gains and safety limits
    Pid {
        #[arg(long)]
        kp: f64,
        #[arg(long)]
        ki: f64,
        #[arg(long)]
        kd: f64,
        #[arg(long, default_value_t = 1000)]
        window_ms: u64,
        #[arg(long, default_value_t = 5)]
        sample_sec: u64,
        #[arg(long, default_value_t = 950.0)]
        max_temp: f64,
    },
    /// Reassign pins (e.g. `pins SSR=16 BUZZ=-1`); other roles keep their current pin.
    /// A pin held by another role must be freed first.
    Pins {
        #[arg(value_parser = parse_assignment, required = true)]
        assignments: Vec<(PinRole, i32)>,
    },
}

#[derive(Subcommand, Debug)]
enum ProfileAction {
    /// Append a step on the controller
    Add,
    /// Load a stored profile by name
    Load { name: String },
    /// Replace the profile with `TEMP:MINUTES` steps
    Save {
        #[arg(value_parser = parse_step, required = true)]
        steps: Vec<StepRow>,
    },
}

fn parse_assignment(s: &str) -> Result<(PinRole, i32), String> {
    let (role, pin) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid ROLE=PIN: no `=` found in '{}'.", s))?;
    let role: PinRole = role.parse().map_err(|e| format!("{}", e))?;
    let pin: i32 = pin.trim().parse().map_err(|e| format!("Invalid pin '{}': {}", pin, e))?;
    Ok((role, pin))
}

fn parse_step(s: &str) -> Result<StepRow, String> {
    let (temp, minutes) = s
        .split_once(':')
        .ok_or_else(|| format!("Invalid TEMP:MINUTES: no `:` found in '{}'.", s))?;
    let temp_c: f64 = temp.trim().parse().map_err(|e| format!("Invalid temperature '{}': {}", temp, e))?;
    let minutes: u64 = minutes.trim().parse().map_err(|e| format!("Invalid minutes '{}': {}", minutes, e))?;
    Ok(StepRow { temp_c, minutes })
}

fn report(outcome: CycleOutcome) {
    match outcome {
        CycleOutcome::Applied => tracing::info!("Dashboard synchronized"),
        other => tracing::warn!("Synchronization did not apply: {:?}", other),
    }
}

async fn print_view(sync: &StateSynchronizer) {
    let view = sync.view().await;
    for (field, value) in view.fields.iter() {
        println!("{:?}: {:?}", field, value);
    }
    for (i, row) in view.steps.iter().enumerate() {
        println!("Step {}: {:.0} °C for {} min", i + 1, row.temp_c, row.minutes);
    }
    for selector in &view.pin_selectors {
        let current = selector.selected().map(|o| o.label.as_str()).unwrap_or("-");
        println!("{}: {}{}", selector.role, current, if selector.read_only { " (fixed)" } else { "" });
    }
    let history = sync.history().await;
    println!("Samples in window: {}", history.len());
}

async fn watch(sync: Arc<StateSynchronizer>, config: &Config) {
    if let Some(path) = config.chart.snapshot_path.clone() {
        let events = sync.subscribe();
        let writer = Arc::clone(&sync);
        tokio::spawn(async move { writer.write_snapshots(events, &path).await });
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };
    Arc::clone(&sync).run(config.sync.poll_interval(), shutdown).await;
    let stats = sync.stats().await;
    tracing::info!(
        "Cycles: {} ({} applied, {} failed fetches, {} stale)",
        stats.cycles,
        stats.applied,
        stats.fetch_failures,
        stats.stale_dropped
    );
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    let config = match cli.config.as_ref() {
        Some(path) => config::load_config(&path.to_string_lossy())?,
        None => Config::default(),
    };

    tracing_subscriber::fmt()
        .with_max_level(config.tracing_level())
        .init();

    tracing::info!("Starting kiln dashboard");
    tracing::info!("Controller: {}", config.controller.base_url);

    let view_mode = cli.view.unwrap_or(config.sync.view);
    let api = Arc::new(HttpControllerApi::new(&config.controller)?);
    let sync = Arc::new(StateSynchronizer::new(api, view_mode));
    sync.attach_surface(Box::new(BitmapSurface::new(config.chart.width, config.chart.pixel_ratio)))
        .await;

    match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => watch(sync, &config).await,
        Commands::Once => {
            report(sync.poll().await);
            print_view(&sync).await;
            if let (ViewMode::Live, Some(path)) = (view_mode, config.chart.snapshot_path.as_ref()) {
                sync.export_chart(path).await?;
            }
        }
        Commands::Start => report(sync.start().await?),
        Commands::Stop => report(sync.stop().await?),
        Commands::Mode { mode, setpoint } => {
            let setpoint = match setpoint {
                Some(value) => value,
                None => {
                    sync.sync_live().await;
                    sync.view()
                        .await
                        .fields
                        .text(Field::Setpoint)
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0.0)
                }
            };
            report(sync.set_mode(mode, setpoint).await?);
        }
        Commands::Profile { action } => match action {
            ProfileAction::Add => report(sync.add_profile_step().await?),
            ProfileAction::Load { name } => match sync.load_profile(&name).await? {
                Some(outcome) => report(outcome),
                None => tracing::warn!("Profile name is empty; nothing loaded"),
            },
            ProfileAction::Save { steps } => {
                sync.set_step_rows(steps).await;
                report(sync.save_profile().await?);
            }
        },
        Commands::Pid { kp, ki, kd, window_ms, sample_sec, max_temp } => {
            let request = PidSaveRequest { kp, ki, kd, window_ms, sample_sec, max_temp_c: max_temp };
            report(sync.save_pid(request).await?);
        }
        Commands::Pins { assignments } => {
            let outcome = sync.sync_config().await;
            if outcome != CycleOutcome::Applied {
                return Err(format!("Cannot edit pins without the controller's pin map ({:?})", outcome).into());
            }
            let selectors = sync.view().await.pin_selectors;
            let mut pin_map = pins::pins_from_selectors(&selectors);
            for (role, pin) in assignments {
                pins::choose(&selectors, role, pin)?;
                pin_map.set(role, pin);
            }
            report(sync.save_pins(&pin_map).await?);
            print_view(&sync).await;
        }
    }

    Ok(())
}
