//! Routes parsed commands to [`Engine`] operations and formats wire
//! responses (§4.16).

use std::fmt::Write as _;

use crate::engine::Engine;
use crate::error::Error;
use crate::net::connection::ConnectionContext;
use crate::protocol::parser::{self, CacheSub, Command, ConfigSub, DumpSub};
use crate::similarity::SimilarityResult;
use crate::stats::MUTABLE_VARIABLES;

pub struct Dispatcher {
    engine: std::sync::Arc<Engine>,
}

impl Dispatcher {
    pub fn new(engine: std::sync::Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Parses and executes one protocol line, returning the single- or
    /// multi-line response body (without the trailing `\r\n`, which the I/O
    /// loop appends).
    pub fn dispatch(&self, line: &str, ctx: &mut ConnectionContext) -> String {
        let command = match parser::parse_command(line) {
            Ok(cmd) => cmd,
            Err(e) => {
                self.engine.stats.command_executed("UNKNOWN", true);
                return format_error(&e);
            }
        };
        let name = command_name(&command);
        let result = self.execute(command, ctx);
        match result {
            Ok(response) => {
                self.engine.stats.command_executed(name, false);
                response
            }
            Err(e) => {
                self.engine.stats.command_executed(name, true);
                format_error(&e)
            }
        }
    }

    fn execute(&self, command: Command, ctx: &mut ConnectionContext) -> Result<String, Error> {
        match command {
            Command::Event { ctx: event_ctx, item_id, score } => {
                self.engine.record_event(&event_ctx, &item_id, score)?;
                Ok("OK".to_string())
            }
            Command::VecSet { id, values } => {
                self.engine.set_vector(&id, &values)?;
                Ok("OK".to_string())
            }
            Command::Sim { id, k, mode } => {
                let results = self.engine.similarity_by_id(&id, k, mode)?;
                Ok(format_results(&results))
            }
            Command::SimV { k, values } => {
                let results = self.engine.similarity_by_vector(&values, k)?;
                Ok(format_results(&results))
            }
            Command::Info => Ok(self.format_info()),
            Command::Config(sub) => self.execute_config(sub, ctx),
            Command::Dump(sub) => self.execute_dump(sub),
            Command::DebugOn => {
                ctx.debug_mode = true;
                Ok("OK".to_string())
            }
            Command::DebugOff => {
                ctx.debug_mode = false;
                Ok("OK".to_string())
            }
            Command::Cache(sub) => self.execute_cache(sub),
        }
    }

    fn execute_config(&self, sub: ConfigSub, _ctx: &mut ConnectionContext) -> Result<String, Error> {
        match sub {
            ConfigSub::Help => Ok(format!(
                "OK mutable variables: {}",
                MUTABLE_VARIABLES.join(", ")
            )),
            ConfigSub::Show => {
                let vars = self.engine.runtime_vars.show("");
                let mut out = format!("OK RESULTS {}", vars.len());
                for (name, value) in vars {
                    let _ = write!(out, "\r\n{name}: {value}");
                }
                Ok(out)
            }
            ConfigSub::Verify(path) => {
                self.engine.dump_verify(path.as_deref())?;
                Ok("OK CONFIG_VALID".to_string())
            }
        }
    }

    fn execute_dump(&self, sub: DumpSub) -> Result<String, Error> {
        match sub {
            DumpSub::Save(path) => {
                let saved = self.engine.dump_save(path.as_deref())?;
                Ok(format!("OK DUMP_SAVED {}", saved.display()))
            }
            DumpSub::Load(path) => {
                let loaded = self.engine.dump_load(path.as_deref())?;
                Ok(format!("OK DUMP_LOADED {}", loaded.display()))
            }
            DumpSub::Verify(path) => {
                self.engine.dump_verify(path.as_deref())?;
                Ok("OK DUMP_VALID".to_string())
            }
            DumpSub::Info(path) => {
                let info = self.engine.dump_info(path.as_deref())?;
                Ok(format!(
                    "OK version={} stores={} flags={} file_size={} timestamp={} has_statistics={}",
                    info.version, info.store_count, info.flags, info.file_size, info.timestamp, info.has_statistics
                ))
            }
        }
    }

    fn execute_cache(&self, sub: CacheSub) -> Result<String, Error> {
        match sub {
            CacheSub::Stats => {
                let Some(stats) = self.engine.cache_stats() else {
                    return Ok("OK cache disabled".to_string());
                };
                let mut out = String::from("OK");
                let _ = write!(out, "\r\ntotal_queries: {}", stats.total_queries);
                let _ = write!(out, "\r\nhits: {}", stats.cache_hits);
                let _ = write!(out, "\r\nmisses: {}", stats.cache_misses);
                let _ = write!(out, "\r\nentries: {}", stats.current_entries);
                let _ = write!(out, "\r\nmemory_bytes: {}", stats.current_memory_bytes);
                let _ = write!(out, "\r\nevictions: {}", stats.evictions);
                Ok(out)
            }
            CacheSub::Clear => {
                self.engine.cache_clear();
                Ok("OK".to_string())
            }
            CacheSub::Enable => {
                self.engine.runtime_vars.set("cache.enabled", "true")?;
                Ok("OK".to_string())
            }
            CacheSub::Disable => {
                self.engine.runtime_vars.set("cache.enabled", "false")?;
                Ok("OK".to_string())
            }
        }
    }

    fn format_info(&self) -> String {
        let stats = self.engine.stats_snapshot();
        let cache = self.engine.cache_stats();
        let mut out = format!(
            "OK uptime_sec={} total_connections={} active_connections={} total_commands={} failed_commands={} cache_enabled={}",
            self.engine.uptime_secs(),
            stats.total_connections,
            stats.active_connections,
            stats.total_commands,
            stats.failed_commands,
            self.engine.cache_enabled(),
        );
        if let Some(cache) = cache {
            let _ = write!(out, " cache_entries={} cache_hits={}", cache.current_entries, cache.cache_hits);
        }
        out
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Event { .. } => "EVENT",
        Command::VecSet { .. } => "VECSET",
        Command::Sim { .. } => "SIM",
        Command::SimV { .. } => "SIMV",
        Command::Info => "INFO",
        Command::Config(_) => "CONFIG",
        Command::Dump(_) => "DUMP",
        Command::DebugOn | Command::DebugOff => "DEBUG",
        Command::Cache(_) => "CACHE",
    }
}

fn format_results(results: &[SimilarityResult]) -> String {
    let mut out = format!("OK RESULTS {}", results.len());
    for r in results {
        let _ = write!(out, "\r\n{} {}", r.id, r.score);
    }
    out
}

fn format_error(e: &Error) -> String {
    format!("ERROR {e}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::Arc;

    fn dispatcher() -> (Dispatcher, ConnectionContext) {
        let mut cfg = Config::default();
        cfg.snapshot.dir = std::env::temp_dir()
            .join(format!("nvecd-dispatch-test-{:?}", std::thread::current().id()))
            .to_string_lossy()
            .to_string();
        let engine = Arc::new(Engine::new(cfg).unwrap());
        (Dispatcher::new(engine), ConnectionContext::new("test".to_string()))
    }

    #[test]
    fn unknown_command_yields_error_line() {
        let (d, mut ctx) = dispatcher();
        let resp = d.dispatch("BOGUS", &mut ctx);
        assert!(resp.starts_with("ERROR"));
    }

    #[test]
    fn vecset_then_sim_round_trips_over_the_wire() {
        let (d, mut ctx) = dispatcher();
        assert_eq!(d.dispatch("VECSET a 1 0 0", &mut ctx), "OK");
        assert_eq!(d.dispatch("VECSET b 0 1 0", &mut ctx), "OK");
        let resp = d.dispatch("SIM a 5 using=vectors", &mut ctx);
        assert!(resp.starts_with("OK RESULTS"));
        assert!(resp.contains('b'));
    }

    #[test]
    fn debug_toggles_connection_context() {
        let (d, mut ctx) = dispatcher();
        assert!(!ctx.debug_mode);
        d.dispatch("DEBUG ON", &mut ctx);
        assert!(ctx.debug_mode);
        d.dispatch("DEBUG OFF", &mut ctx);
        assert!(!ctx.debug_mode);
    }

    #[test]
    fn info_reports_connection_counters() {
        let (d, mut ctx) = dispatcher();
        let resp = d.dispatch("INFO", &mut ctx);
        assert!(resp.starts_with("OK uptime_sec="));
    }

    #[test]
    fn failed_command_increments_stats() {
        let (d, mut ctx) = dispatcher();
        d.dispatch("SIM missing 5", &mut ctx);
        let snap = d.engine.stats_snapshot();
        assert_eq!(snap.failed_commands, 1);
    }

    #[test]
    fn dump_save_then_verify_round_trip() {
        let (d, mut ctx) = dispatcher();
        d.dispatch("VECSET a 1 2 3", &mut ctx);
        let saved = d.dispatch("DUMP SAVE t1.dmp", &mut ctx);
        assert!(saved.starts_with("OK DUMP_SAVED"));
        let verified = d.dispatch("DUMP VERIFY t1.dmp", &mut ctx);
        assert_eq!(verified, "OK DUMP_VALID");
    }

    #[test]
    fn cache_stats_reports_disabled_when_cache_off() {
        let mut cfg = Config::default();
        cfg.cache.enabled = false;
        cfg.snapshot.dir = std::env::temp_dir()
            .join("nvecd-dispatch-test-cache-off")
            .to_string_lossy()
            .to_string();
        let engine = Arc::new(Engine::new(cfg).unwrap());
        let d = Dispatcher::new(engine);
        let mut ctx = ConnectionContext::new("test".to_string());
        assert_eq!(d.dispatch("CACHE STATS", &mut ctx), "OK cache disabled");
    }
}
