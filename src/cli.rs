use std::time::Duration;

use clap::Parser;

use crate::config::StreamConfig;
use crate::error::RestreamError;

#[derive(Parser)]
#[command(name = "restream")]
#[command(version = "0.3.2")]
#[command(about = "A resilient streaming chat client with stall detection and response recovery")]
pub struct Args {
    /// Prompt to send to the chat server
    pub prompt: String,

    /// Base URL of the chat server
    #[arg(long, env = "RESTREAM_URL")]
    pub url: Option<String>,

    /// Path to a TOML config file
    #[arg(long)]
    pub config: Option<String>,

    /// Declare the connection dead after this much silence (ms)
    #[arg(long)]
    pub stall_timeout_ms: Option<u64>,

    /// Out-of-band liveness probe interval (ms)
    #[arg(long)]
    pub heartbeat_interval_ms: Option<u64>,

    /// Reconnect attempts before the exchange fails terminally
    #[arg(long)]
    pub max_reconnects: Option<u32>,

    /// Pause before each reconnect attempt (ms)
    #[arg(long)]
    pub backoff_ms: Option<u64>,

    /// After a terminal failure, automatically fetch the server's complete answer
    #[arg(long)]
    pub recover: bool,

    /// Disable colored status banners
    #[arg(long)]
    pub plain: bool,
}

/// Build the effective config: flags override the config file, which
/// overrides the defaults.
pub fn resolve_config(args: &Args) -> Result<StreamConfig, RestreamError> {
    let mut config = match &args.config {
        Some(path) => StreamConfig::load(path)?,
        None => StreamConfig::default(),
    };
    if let Some(url) = &args.url {
        config.base_url = url.clone();
    }
    if let Some(ms) = args.stall_timeout_ms {
        config.stall_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = args.heartbeat_interval_ms {
        config.heartbeat_interval = Duration::from_millis(ms);
    }
    if let Some(max) = args.max_reconnects {
        config.max_reconnects = max;
    }
    if let Some(ms) = args.backoff_ms {
        config.reconnect_backoff = Duration::from_millis(ms);
    }
    config.validate()?;
    Ok(config)
}
