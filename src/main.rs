use std::fs::File;
use std::path::Path;
use std::process;
use std::sync::Mutex;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use matchmaker::cli::{format_dry_run, Args};
use matchmaker::config::{load_or_init_config, LOG_DIRECTORY};
use matchmaker::protocol::ControlListener;
use matchmaker::registry::new_shared_registry;
use matchmaker::server::{create_router, AppState};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        if tracing::dispatcher::has_been_set() {
            error!("{:#}", e);
        } else {
            eprintln!("matchmaker: {:#}", e);
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        dotenvy::from_path(env_file)
            .with_context(|| format!("Failed to load env file {}", env_file.display()))?;
    }

    let config = load_or_init_config(&args.config_file)
        .with_context(|| format!("Failed to load config file {}", args.config_file.display()))?
        .with_overrides(args.http_port, args.matchmaker_port);

    // Dry-run mode: print effective settings and exit
    if args.dry_run {
        println!("{}", format_dry_run(&config, &args));
        return Ok(());
    }

    init_logging(args.verbose, config.log_to_file)?;
    info!("Config: {:?}", config);

    let registry = new_shared_registry();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let control_addr = format!("{}:{}", args.bind_addr, config.matchmaker_port);
    let control_listener = TcpListener::bind(&control_addr)
        .await
        .with_context(|| format!("Failed to bind control port {}", control_addr))?;
    let control = ControlListener::new(registry.clone());
    let control_task = tokio::spawn(async move {
        control.run(control_listener, shutdown_rx).await;
    });

    let http_addr = format!("{}:{}", args.bind_addr, config.http_port);
    let http_listener = TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP port {}", http_addr))?;

    info!("HTTP listening on {}", http_addr);
    if config.use_https {
        info!(
            "Redirecting http->https (public HTTPS port {})",
            config.https_port
        );
    }
    info!("Endpoints:");
    if config.enable_rest_api {
        info!("  GET  /signallingserver     - Allocate a render node (JSON)");
    }
    if config.enable_redirection_links {
        info!("  GET  /                     - Redirect to a render node");
        info!("  GET  /custom_html/{{file}}  - Redirect to a render node's custom page");
    }
    info!("  GET  /health               - Health check");
    info!("  GET  /status               - Registry status");

    let app = create_router(AppState::new(registry, config));

    axum::serve(http_listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("HTTP server error")?;

    control_task.await.context("Control listener task failed")?;
    info!("Matchmaker stopped");
    Ok(())
}

fn init_logging(verbose: u8, log_to_file: bool) -> anyhow::Result<()> {
    let filter = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let file_layer = if log_to_file {
        std::fs::create_dir_all(LOG_DIRECTORY)
            .with_context(|| format!("Failed to create log directory {}", LOG_DIRECTORY))?;
        let path = Path::new(LOG_DIRECTORY).join(format!(
            "matchmaker-{}.log",
            Utc::now().format("%Y%m%d-%H%M%S")
        ));
        let file = File::create(&path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(())
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    if shutdown_tx.send(true).is_err() {
        info!("Control listener already stopped");
    }
}
