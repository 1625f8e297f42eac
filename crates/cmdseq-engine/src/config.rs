use std::time::Duration;

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Tunable timing and capacity knobs for the engine.
///
/// Deserializable so deployments can override individual fields from a
/// config file; every field has a default.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EngineConfig {
    /// Scheduler poll interval for due records, in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Bound on how long one dispatched command may stay unanswered before
    /// the gateway synthesizes a timeout result, in milliseconds.
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,
    /// Capacity of the command and status channels.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_tick_ms() -> u64 {
    25
}

fn default_dispatch_timeout_ms() -> u64 {
    5_000
}

fn default_channel_capacity() -> usize {
    32
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tick_ms: default_tick_ms(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
