//! Connection/command counters and the runtime-variable registry (§4.17).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct StatsSnapshot {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_commands: u64,
    pub failed_commands: u64,
}

/// Atomic counters for the observables in §4.17. Updated from the
/// connection acceptor and the request dispatcher.
#[derive(Default)]
pub struct Stats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_commands: AtomicU64,
    failed_commands: AtomicU64,
    per_command: Mutex<HashMap<String, u64>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_executed(&self, command: &str, failed: bool) {
        self.total_commands.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed_commands.fetch_add(1, Ordering::Relaxed);
        }
        *self.per_command.lock().entry(command.to_uppercase()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_commands: self.total_commands.load(Ordering::Relaxed),
            failed_commands: self.failed_commands.load(Ordering::Relaxed),
        }
    }

    pub fn per_command_counts(&self) -> HashMap<String, u64> {
        self.per_command.lock().clone()
    }
}

#[derive(Debug, Clone)]
struct Variable {
    value: String,
    mutable: bool,
}

/// Registry of `dotted.name -> (value, mutable?)`. Only a whitelisted
/// subset accepts SET; everything is readable via SHOW.
pub struct RuntimeVariableManager {
    variables: RwLock<HashMap<String, Variable>>,
    callbacks: Mutex<HashMap<String, Box<dyn Fn(&str) + Send + Sync>>>,
}

/// The names a `CONFIG SET` may target at runtime, per §4.17.
pub const MUTABLE_VARIABLES: &[&str] = &[
    "logging.level",
    "logging.format_json",
    "cache.enabled",
    "cache.min_query_cost_ms",
    "cache.ttl_seconds",
];

impl RuntimeVariableManager {
    pub fn new() -> Self {
        let mut variables = HashMap::new();
        for name in MUTABLE_VARIABLES {
            variables.insert(
                name.to_string(),
                Variable {
                    value: String::new(),
                    mutable: true,
                },
            );
        }
        Self {
            variables: RwLock::new(variables),
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    /// Registers an immutable, read-only observable (e.g. `server.start_time`).
    pub fn register_readonly(&self, name: &str, value: impl Into<String>) {
        self.variables.write().insert(
            name.to_string(),
            Variable {
                value: value.into(),
                mutable: false,
            },
        );
    }

    /// Registers a callback invoked with the new value whenever `name` is
    /// set successfully (e.g. toggling `CacheConfig::enabled` live).
    pub fn on_set(&self, name: &str, callback: Box<dyn Fn(&str) + Send + Sync>) {
        self.callbacks.lock().insert(name.to_string(), callback);
    }

    pub fn set(&self, name: &str, value: &str) -> Result<()> {
        let mut variables = self.variables.write();
        let var = variables
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("unknown runtime variable: {name}")))?;
        if !var.mutable {
            return Err(Error::InvalidArgument(format!(
                "runtime variable {name} is not mutable"
            )));
        }
        var.value = value.to_string();
        drop(variables);

        if let Some(cb) = self.callbacks.lock().get(name) {
            cb(value);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.variables.read().get(name).map(|v| v.value.clone())
    }

    /// Names and values of every variable whose dotted name starts with
    /// `prefix` (empty prefix matches everything), sorted for stable output.
    pub fn show(&self, prefix: &str) -> Vec<(String, String)> {
        let variables = self.variables.read();
        let mut matches: Vec<(String, String)> = variables
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, var)| (name.clone(), var.value.clone()))
            .collect();
        matches.sort();
        matches
    }
}

impl Default for RuntimeVariableManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_counters_track_open_and_close() {
        let stats = Stats::new();
        stats.connection_opened();
        stats.connection_opened();
        stats.connection_closed();
        let snap = stats.snapshot();
        assert_eq!(snap.total_connections, 2);
        assert_eq!(snap.active_connections, 1);
    }

    #[test]
    fn failed_commands_counted_alongside_total() {
        let stats = Stats::new();
        stats.command_executed("sim", false);
        stats.command_executed("sim", true);
        let snap = stats.snapshot();
        assert_eq!(snap.total_commands, 2);
        assert_eq!(snap.failed_commands, 1);
        assert_eq!(*stats.per_command_counts().get("SIM").unwrap(), 2);
    }

    #[test]
    fn set_on_immutable_variable_fails() {
        let manager = RuntimeVariableManager::new();
        manager.register_readonly("server.start_time", "0");
        assert!(manager.set("server.start_time", "1").is_err());
    }

    #[test]
    fn set_on_mutable_variable_invokes_callback() {
        let manager = RuntimeVariableManager::new();
        let seen = std::sync::Arc::new(Mutex::new(String::new()));
        let seen_cb = seen.clone();
        manager.on_set("cache.enabled", Box::new(move |v| *seen_cb.lock() = v.to_string()));
        manager.set("cache.enabled", "false").unwrap();
        assert_eq!(manager.get("cache.enabled").unwrap(), "false");
        assert_eq!(*seen.lock(), "false");
    }

    #[test]
    fn set_on_unknown_variable_fails() {
        let manager = RuntimeVariableManager::new();
        assert!(manager.set("does.not.exist", "x").is_err());
    }

    #[test]
    fn show_filters_by_dotted_prefix() {
        let manager = RuntimeVariableManager::new();
        let cache_vars = manager.show("cache.");
        assert!(cache_vars.iter().all(|(name, _)| name.starts_with("cache.")));
        assert!(!cache_vars.is_empty());
    }
}
