use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{ControlPanel, Operation, Store};
use shared::domain::TargetId;
use storage::FileSessionStorage;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Settings};

#[derive(Parser, Debug)]
#[command(name = "fleet-panel", about = "Headless control panel for the emulator fleet")]
struct Args {
    /// Backend origin, e.g. http://127.0.0.1:8000.
    #[arg(long)]
    origin: Option<String>,
    #[arg(long)]
    session: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the event channel, mount a view and log until Ctrl-C.
    Watch {
        #[arg(long, default_value = "dashboard")]
        view: String,
        #[arg(long, default_value_t = 5)]
        print_every_secs: u64,
    },
    /// Dispatch one operation to the given targets.
    Run {
        #[arg(long)]
        operation: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_delimiter = ',')]
        targets: Vec<i64>,
        /// Return right after the fan-out instead of waiting for completion.
        #[arg(long)]
        no_wait: bool,
    },
    /// Print the persisted panel state as JSON.
    State,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = load_settings();
    if let Some(origin) = args.origin {
        settings.origin = origin;
    }
    if let Some(session) = args.session {
        settings.session_id = session;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let storage = FileSessionStorage::open(&settings.session_dir, &settings.session_id)
        .with_context(|| {
            format!(
                "failed to open session storage under '{}'",
                settings.session_dir.display()
            )
        })?;
    info!(session = %storage.dir().display(), "panel: session storage ready");
    let store = Store::init(Arc::new(storage));

    match args.command {
        Command::Watch {
            view,
            print_every_secs,
        } => watch(store, &settings, &view, print_every_secs).await,
        Command::Run {
            operation,
            name,
            targets,
            no_wait,
        } => run(store, &settings, operation, name, targets, no_wait).await,
        Command::State => {
            println!("{}", serde_json::to_string_pretty(&store.snapshot())?);
            Ok(())
        }
    }
}

async fn watch(store: Store, settings: &Settings, view: &str, print_every_secs: u64) -> Result<()> {
    let mut panel = ControlPanel::over_http(store, &settings.origin, &settings.panel_options())?;
    panel.start();
    panel.navigate(view)?;
    println!("{}", panel.frame());

    let mut ticker = tokio::time::interval(Duration::from_secs(print_every_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                println!(
                    "[{}] {}",
                    panel.panels().connectivity.label(),
                    panel.live_region().unwrap_or_default()
                );
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!("panel: ctrl-c handler failed: {err}");
                }
                break;
            }
        }
    }

    panel.shutdown();
    info!("panel: stopped");
    Ok(())
}

async fn run(
    store: Store,
    settings: &Settings,
    operation: String,
    name: Option<String>,
    targets: Vec<i64>,
    no_wait: bool,
) -> Result<()> {
    let panel = ControlPanel::over_http(store, &settings.origin, &settings.panel_options())?;
    if !targets.is_empty() {
        panel.store().clear_selected_targets();
        for target in targets {
            panel.store().toggle_target(TargetId(target), true);
        }
    }

    let operation = match name {
        Some(name) => Operation::new(operation, name),
        None => Operation::keyed(operation),
    };
    let summary = panel.run_operation(&operation).await?;
    for (target, outcome) in &summary.outcomes {
        println!("target #{target}: {outcome:?}");
    }
    if let Some(notification) = panel.panels().notifications.latest() {
        println!("{}: {}", notification.title, notification.body);
    }

    if let (Some(wait), false) = (summary.reconcile_after, no_wait) {
        info!(wait_ms = wait.as_millis() as u64, "panel: waiting for completion");
        tokio::time::sleep(wait + Duration::from_millis(100)).await;
    }
    Ok(())
}
