//! nvecd - in-memory vector and event similarity service
//!
//! This binary stays deliberately thin: real YAML configuration parsing and
//! CLI argument handling are out of scope for the core (§1), so `main`
//! accepts a single optional config-file path and deserializes it with
//! `serde_json` as a stand-in transport for the typed [`nvecd::Config`] an
//! external loader would otherwise produce. Everything else lives in
//! `nvecd::Engine` / `nvecd::Server`.

use std::panic;
use std::process::ExitCode;

use nvecd::{Config, Server};

fn main() -> ExitCode {
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("nvecd fatal error:");
        eprintln!("{panic_info}");
        if let Some(location) = panic_info.location() {
            eprintln!("location: {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::info!("nvecd {} starting", nvecd::VERSION);
    log::info!("platform: {} / {}", std::env::consts::OS, std::env::consts::ARCH);

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("startup failed: {e}");
            return ExitCode::from(1);
        }
    };

    let server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            log::error!("startup failed: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = server.install_signal_handler() {
        log::error!("startup failed: {e}");
        return ExitCode::from(1);
    }

    let bound = server.engine().config_snapshot().api.tcp.clone();
    log::info!("listening on {}:{}", bound.bind, bound.port);

    match server.run() {
        Ok(()) => {
            log::info!("nvecd shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("server error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads `Config` from the path given as the first CLI argument, or falls
/// back to `Config::default()` when no path is given. JSON stands in for
/// the YAML document an external loader would normally hand the core.
fn load_config() -> nvecd::Result<Config> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| nvecd::Error::ConfigFileNotFound(format!("{path}: {e}")))?;
            serde_json::from_str(&text)
                .map_err(|e| nvecd::Error::ConfigParseError(format!("{path}: {e}")))?
        }
        None => Config::default(),
    };
    config.validate()?;
    Ok(config)
}
