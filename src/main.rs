mod auth;
mod calc;
mod catalog;
mod config;
mod db;
mod ipc;

use clap::Parser;
use simple_logger::SimpleLogger;
use std::io::{self, BufRead, Write};

fn main() {
    let cli = config::Cli::parse();
    if let Err(e) = SimpleLogger::new().with_level(cli.level_filter()).init() {
        eprintln!("failed to initialise logger: {e}");
    }

    let config = cli.config();
    log::info!(
        "carbond {} starting (access ttl {}s, refresh ttl {}s, seed catalog: {})",
        env!("CARGO_PKG_VERSION"),
        config.access_ttl_secs,
        config.refresh_ttl_secs,
        config.seed_catalog
    );
    let mut state = ipc::AppState::new(config);

    if let Some(path) = cli.workspace.as_ref() {
        if let Err(e) = ipc::open_workspace(&mut state, path) {
            log::error!("failed to open workspace {}: {:?}", path.to_string_lossy(), e);
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                log::error!("stdin read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => {
                log::debug!("request {} {}", req.id, req.method);
                ipc::handle_request(&mut state, req)
            }
            Err(e) => {
                log::warn!("unparseable request line: {e}");
                ipc::bad_json(e.to_string())
            }
        };

        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    log::info!("stdin closed, shutting down");
}
