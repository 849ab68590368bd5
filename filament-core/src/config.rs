//! Runtime Configuration
//!
//! Knobs that apply to every primitive on the current thread. The runtime is
//! single-threaded, so configuration is stored thread-locally alongside the
//! dependency graph.

use std::cell::Cell;

/// Tunables for the reactive runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Upper bound on microtask rounds processed by a single `flush()`.
    ///
    /// Each round drains the jobs queued by the previous one. A callback
    /// that keeps writing to a signal it also observes would otherwise spin
    /// forever; once the limit is hit the remaining jobs stay queued and a
    /// warning is logged.
    pub max_flush_rounds: usize,

    /// Log a warning when a computed value reads no signals on its first
    /// evaluation (it will never update).
    pub warn_on_static_computed: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_rounds: 100,
            warn_on_static_computed: true,
        }
    }
}

thread_local! {
    static CONFIG: Cell<RuntimeConfig> = Cell::new(RuntimeConfig::default());
}

/// Install a new configuration, returning the previous one.
pub fn configure(config: RuntimeConfig) -> RuntimeConfig {
    CONFIG.with(|c| c.replace(config))
}

/// The configuration in effect on the current thread.
pub fn config() -> RuntimeConfig {
    CONFIG.with(Cell::get)
}
