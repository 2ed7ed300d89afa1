use std::io::{self, Write};

use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use restream::cli::{resolve_config, Args};
use restream::{SessionStatus, SessionUpdate, StreamManager};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    if args.plain {
        colored::control::set_override(false);
    }

    let config = resolve_config(&args)?;
    print_header(&config.base_url, &args.prompt);

    let (manager, mut updates) = StreamManager::new(config)?;
    manager.submit(&args.prompt)?;

    let mut last_status = SessionStatus::Connecting;
    let mut failed_error: Option<String> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "[stopping]".bright_yellow());
                manager.cancel();
            }
            update = updates.recv() => {
                let Some(update) = update else { break };
                render_update(&update, &mut last_status);
                if update.status.is_terminal() {
                    failed_error = update.error.clone();
                    break;
                }
            }
        }
    }

    if manager.status() == SessionStatus::Failed {
        if let Some(error) = &failed_error {
            eprintln!("\n{} {}", "[failed]".bright_red().bold(), error.bright_red());
        }
        if args.recover {
            eprintln!("{}", "[recovering full response]".bright_magenta());
            match manager.recover_full_response().await {
                Ok(text) => {
                    println!("\n{text}");
                    print_footer(&manager);
                    return Ok(());
                }
                Err(e) => {
                    eprintln!("{} {}", "[recovery failed]".bright_red(), e);
                    print_footer(&manager);
                    return Err(e.into());
                }
            }
        }
        print_footer(&manager);
        return Err(failed_error.unwrap_or_else(|| "stream failed".to_string()).into());
    }

    println!();
    print_footer(&manager);
    Ok(())
}

fn render_update(update: &SessionUpdate, last_status: &mut SessionStatus) {
    if let Some(delta) = &update.delta {
        print!("{delta}");
        let _ = io::stdout().flush();
    }
    if update.status != *last_status {
        match update.status {
            SessionStatus::Streaming => {}
            SessionStatus::Reconnecting => {
                eprintln!("\n{}", "[connection lost, reconnecting]".bright_yellow());
            }
            SessionStatus::Connecting => {
                eprintln!("{}", "[connecting]".bright_blue());
            }
            _ => {}
        }
        *last_status = update.status;
    }
}

fn print_header(base_url: &str, prompt: &str) {
    eprintln!("{}", "RESTREAM".bright_cyan().bold());
    eprintln!("{}: {}", "Server".bright_yellow(), base_url.bright_white());
    eprintln!("{}: {}", "Prompt".bright_yellow(), prompt);
    eprintln!("{}", "=".repeat(50).bright_blue());
}

fn print_footer(manager: &StreamManager) {
    let session = manager.session_snapshot();
    let stats = manager.recovery_stats();
    eprintln!("{}", "=".repeat(50).bright_blue());
    eprintln!(
        "Status: {} | reconnects: {} | recovery rate: {:.0}% ({}/{})",
        session.status,
        session.reconnects,
        stats.recovery_rate(),
        stats.successes(),
        stats.attempts()
    );
}
