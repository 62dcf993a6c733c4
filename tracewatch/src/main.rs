//! tracewatch - live request tracing console
//!
//! Connects to a monitored server's diagnostic feeds, runs a sampling
//! session and prints the reconstructed request tree as it grows. Rendering
//! is line-oriented: new requests append, and a batch that restructures the
//! tree re-prints it under a fresh header.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Logs: $XDG_STATE_HOME/tracewatch/tracewatch.log
//! - Config: $XDG_CONFIG_HOME/tracewatch/config.toml

mod render;

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracewatch_core::{
    ChannelEvent, Config, DuplexChannel, FilterSpec, SessionController, SessionUpdate,
    TaskTracker, TraceCategory, WsConnector,
};

#[derive(Parser)]
#[command(name = "tracewatch")]
#[command(about = "Live request tracing console")]
#[command(version)]
struct Args {
    /// WebSocket base URL of the monitored server (overrides config)
    #[arg(short, long)]
    server: Option<String>,

    /// Path to a config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep only one request category:
    /// page, component, service, asset, image, ws or other
    #[arg(long, value_parser = parse_category)]
    category: Option<TraceCategory>,

    /// Keep only requests whose path contains this text (case-sensitive)
    #[arg(long)]
    search: Option<String>,

    /// Follow the task feed alongside the sampling session
    #[arg(long)]
    tasks: bool,
}

fn parse_category(value: &str) -> Result<TraceCategory, String> {
    TraceCategory::from_str(value)
}

/// The optional task feed: its channel, events and reconciled state.
struct TaskFeed {
    _channel: DuplexChannel,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    tracker: TaskTracker,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    if let Some(server) = &args.server {
        config.server.base_url = Some(server.clone());
    }
    config
        .server
        .validate()
        .context("invalid server configuration")?;

    let _log_guard = tracewatch_core::logging::init(&config.logging)
        .context("failed to initialize logging")?;
    tracing::info!("tracewatch starting");

    let filter = FilterSpec {
        category: args.category,
        search_text: args.search.clone().unwrap_or_default(),
    };

    let connector = WsConnector::new(
        config
            .server
            .sampling_url()
            .context("cannot resolve sampling feed URL")?,
    )
    .with_subprotocol(config.server.subprotocol.clone());
    let mut session = SessionController::new(connector, config.channel.timing());

    let mut task_feed = if args.tasks {
        let connector = WsConnector::new(
            config
                .server
                .tasks_url()
                .context("cannot resolve task feed URL")?,
        )
        .with_subprotocol(config.server.subprotocol.clone());
        let (channel, events) = DuplexChannel::new(connector, config.channel.timing());
        channel.connect();
        Some(TaskFeed {
            _channel: channel,
            events,
            tracker: TaskTracker::new(),
        })
    } else {
        None
    };

    session.start().context("failed to start sampling")?;
    println!("Sampling... press Ctrl-C to stop");

    run(&mut session, &mut task_feed, &filter).await;

    tracing::info!("tracewatch shutting down");
    Ok(())
}

/// Main loop: fold session updates and task events, print as we go.
async fn run(
    session: &mut SessionController,
    task_feed: &mut Option<TaskFeed>,
    filter: &FilterSpec,
) {
    // Roots already printed; reset whenever the tree is restructured or the
    // filter makes append-only output impossible to keep correct.
    let mut printed = 0usize;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping sampling...");
                session.stop();
            }
            update = session.next_update() => match update {
                None => break,
                Some(update) => {
                    if handle_update(session, update, filter, &mut printed) {
                        break;
                    }
                }
            },
            event = next_task_event(task_feed) => match event {
                Some(ChannelEvent::Message(msg)) => {
                    if let Some(feed) = task_feed {
                        if feed.tracker.apply_message(&msg) {
                            print_tasks(&feed.tracker);
                        }
                    }
                }
                Some(_) => {}
                None => {
                    // Task channel driver is gone; stop polling it.
                    *task_feed = None;
                }
            },
        }
    }
}

/// React to one session update. Returns true when the loop should end.
fn handle_update(
    session: &SessionController,
    update: SessionUpdate,
    filter: &FilterSpec,
    printed: &mut usize,
) -> bool {
    match update {
        SessionUpdate::Connected => {
            println!("Connected, waiting for the sampling id...");
        }
        SessionUpdate::Started { sampling_id } => {
            println!("Sampling session {sampling_id}");
        }
        SessionUpdate::Batch(outcome) => {
            let result = session.filtered(filter);
            let effective_max = result.effective_max(session.max_duration());
            if outcome.structure_changed || *printed > result.traces.len() {
                // Invalidate: re-print the whole visible tree.
                render::render_tree(&result.traces, effective_max);
                *printed = result.traces.len();
            } else {
                let scale = tracewatch_core::duration_scale(effective_max);
                for root in &result.traces[*printed..] {
                    render::render_root(root, scale);
                }
                *printed = result.traces.len();
            }
        }
        SessionUpdate::ConnectionError(error) => {
            println!("Connection error: {error} (captured traces kept, retrying)");
        }
        SessionUpdate::Stopped => {
            println!(
                "Sampling stopped, {} request(s) captured",
                session.roots().len()
            );
            return true;
        }
    }
    false
}

async fn next_task_event(feed: &mut Option<TaskFeed>) -> Option<ChannelEvent> {
    match feed {
        Some(feed) => feed.events.recv().await,
        None => std::future::pending().await,
    }
}

fn print_tasks(tracker: &TaskTracker) {
    println!("-- tasks ({}) --", tracker.len());
    for task in tracker.iter() {
        let progress = if task.progress.is_indeterminate() {
            task.progress.info.clone()
        } else {
            format!(
                "{}/{} {}",
                task.progress.current, task.progress.total, task.progress.info
            )
        };
        let finished = task
            .end_time
            .map(tracewatch_core::format::format_datetime_with_millis)
            .unwrap_or_default();
        println!(
            "  {:<10} {:<28} {:<24} {} {}",
            task.state.as_str(),
            task.name,
            task.application,
            progress,
            finished
        );
    }
}
