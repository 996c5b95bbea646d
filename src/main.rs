use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio::sync::{watch, RwLock};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use logbook::api;
use logbook::config::Config;
use logbook::scheduler::{CycleContext, ProjectStatus, StatusMap, Supervisor};
use logbook::store::StateStore;
use logbook::summarizer::GeminiClient;

#[derive(Parser)]
#[command(name = "logbook")]
#[command(about = "Living session notes for AI-assisted development")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the watcher in the foreground (put it under a supervisor to
    /// keep it alive past the terminal)
    Run {
        /// Port for the local status API
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Query a running daemon for project status
    Status {
        /// Project name; all projects when omitted
        project: Option<String>,

        /// Port the daemon's status API listens on
        #[arg(short, long)]
        port: Option<u16>,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "logbook=info,tower_http=warn".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Status { project, port }) => show_status(project, port).await,
        Some(Commands::Run { port }) => run_daemon(port).await,
        None => run_daemon(None).await,
    }
}

async fn run_daemon(port: Option<u16>) -> anyhow::Result<()> {
    let config = Arc::new(Config::load());
    if config.api_key.is_empty() {
        tracing::warn!("No summarizer API key configured; extraction will fail until one is set");
    }
    if config.projects.is_empty() {
        tracing::warn!("No projects configured; add entries to the config file");
    }

    let store = Arc::new(StateStore::open_default()?);
    let status: StatusMap = Arc::new(RwLock::new(HashMap::new()));
    let summarizer = Arc::new(GeminiClient::new(
        config.api_base.clone(),
        config.api_key.clone(),
        config.model.clone(),
        Duration::from_secs(config.min_extract_interval_seconds),
    ));

    let ctx = CycleContext {
        config: config.clone(),
        store,
        summarizer,
        status: status.clone(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let port = port.unwrap_or(config.api_port);
    let app = api::create_router(status);
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{port}")).await?;
    tracing::info!("Status API listening on http://127.0.0.1:{port}");

    let mut api_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = api_shutdown.changed().await;
            })
            .await
    });

    Supervisor::new(ctx).run(shutdown_rx).await;

    if let Ok(Err(e)) = server.await {
        tracing::warn!("Status API exited with error: {}", e);
    }
    Ok(())
}

/// Resolves on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

async fn show_status(project: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or_else(|| Config::load().api_port);
    let base = format!("http://127.0.0.1:{port}/api/v1");
    let client = reqwest::Client::new();

    match project {
        Some(name) => {
            let response = client
                .get(format!("{base}/projects/{name}"))
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Daemon not reachable on port {port}: {e}"))?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                anyhow::bail!("Project not tracked: {name}");
            }
            let status: ProjectStatus = response.error_for_status()?.json().await?;

            println!("{}", status.name);
            println!("  Path: {}", status.root.display());
            println!("  State: {}", status.phase);
            println!(
                "  Current task: {}",
                status.current_task.as_deref().unwrap_or("-")
            );
            println!("  Last active: {}", format_time_ago(status.last_activity));
            println!(
                "  Last extraction: {}",
                format_time_ago(status.last_extract_time)
            );
            if !status.loose_threads.is_empty() {
                println!("\n  Loose threads:");
                for thread in &status.loose_threads {
                    println!("    - {thread}");
                }
            }
        }
        None => {
            let all: Vec<ProjectStatus> = client
                .get(format!("{base}/status"))
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Daemon not reachable on port {port}: {e}"))?
                .error_for_status()?
                .json()
                .await?;

            if all.is_empty() {
                println!("No projects tracked yet");
                return Ok(());
            }
            for status in all {
                let task = status.current_task.as_deref().unwrap_or("-");
                let task = if task.chars().count() > 40 {
                    let cut: String = task.chars().take(40).collect();
                    format!("{cut}...")
                } else {
                    task.to_string()
                };
                println!(
                    "  {:<25} {:<45} {}",
                    status.name,
                    task,
                    format_time_ago(status.last_activity)
                );
            }
        }
    }

    Ok(())
}

fn format_time_ago(at: Option<DateTime<Utc>>) -> String {
    let Some(at) = at else {
        return "never".to_string();
    };

    let seconds = (Utc::now() - at).num_seconds();
    if seconds < 60 {
        "just now".to_string()
    } else if seconds < 3600 {
        format!("{}m ago", seconds / 60)
    } else if seconds < 86_400 {
        format!("{}h ago", seconds / 3600)
    } else if seconds < 604_800 {
        format!("{}d ago", seconds / 86_400)
    } else {
        format!("{}w ago", seconds / 604_800)
    }
}
