//! Server configuration

use shared::TICK_RATE;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address the UDP socket binds to
    pub bind: String,
    /// Simulation and broadcast rate in Hz
    pub tick_rate: u32,
    pub max_peers: usize,
    /// Silence after which a peer's controllers are ignored
    pub stale_after: Duration,
    /// Silence after which a peer is forgotten
    pub evict_after: Duration,
    /// Warm-start from and save to this file
    pub snapshot: Option<PathBuf>,
    /// How long shutdown waits for an in-flight broadcast
    pub shutdown_grace: Duration,
    /// Simulation time between rule replays
    pub rule_step: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            tick_rate: TICK_RATE,
            max_peers: 16,
            stale_after: Duration::from_secs(2),
            evict_after: Duration::from_secs(30),
            snapshot: None,
            shutdown_grace: Duration::from_millis(250),
            rule_step: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    /// Seconds of simulation per tick.
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }
}
