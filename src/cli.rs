use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "matchmaker")]
#[command(about = "Hand out idle render nodes to streaming clients")]
#[command(version)]
pub struct Args {
    /// Path to the JSON config file (created with defaults if missing)
    #[arg(long, value_name = "FILE", default_value = "config.json")]
    pub config_file: PathBuf,

    /// Enable verbose logging output (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Dry-run mode: load config and show the effective settings without serving
    #[arg(long)]
    pub dry_run: bool,

    /// Address both listeners bind to
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0")]
    pub bind_addr: String,

    /// Override the client HTTP port from the config file
    #[arg(long, value_name = "PORT", env = "MATCHMAKER_HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Override the render node control port from the config file
    #[arg(long, value_name = "PORT", env = "MATCHMAKER_PORT")]
    pub matchmaker_port: Option<u16>,

    /// Path to a .env file loaded before logging starts (e.g. RUST_LOG)
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,
}

// ============================================================================
// SBIO: Pure display logic (no I/O - returns formatted strings)
// ============================================================================

use crate::config::{MatchmakerConfig, LOG_DIRECTORY};
use crate::registry::AllocationSelector;

/// Format the effective settings for `--dry-run`.
/// Pure function - returns a formatted string.
pub fn format_dry_run(config: &MatchmakerConfig, args: &Args) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "matchmaker v{} - Dry Run Mode\n\n",
        env!("CARGO_PKG_VERSION")
    ));
    output.push_str(&format!("Config: {}\n\n", args.config_file.display()));

    output.push_str("Listeners:\n");
    output.push_str(&format!(
        "  Render nodes (control): {}:{}\n",
        args.bind_addr, config.matchmaker_port
    ));
    output.push_str(&format!(
        "  Clients (HTTP):         {}:{}\n",
        args.bind_addr, config.http_port
    ));
    if config.use_https {
        output.push_str(&format!(
            "  Redirecting http->https on port {}\n",
            config.https_port
        ));
    }
    output.push('\n');

    output.push_str("Endpoints:\n");
    if config.enable_rest_api {
        output.push_str("  GET  /signallingserver\n");
    }
    if config.enable_redirection_links {
        output.push_str("  GET  /\n");
        output.push_str("  GET  /custom_html/{file}\n");
    }
    output.push_str("  GET  /health\n");
    output.push_str("  GET  /status\n\n");

    output.push_str(&format!(
        "Redirect cooldown: {}s\n",
        AllocationSelector::default().cooldown().num_seconds()
    ));
    if config.log_to_file {
        output.push_str(&format!("Logging to: {}\n", LOG_DIRECTORY));
    }

    output.push_str("\nReady to start. Remove --dry-run to serve.\n");

    output
}
