//! Application configuration loaded from environment variables.

use std::env;
use std::fs;
use std::io;

use tollgate_core::GateConfig;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Path to the YAML gate configuration (identifier rules + store).
    pub gate_config_path: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            gate_config_path: env::var("GATE_CONFIG").unwrap_or_else(|_| "gate.yaml".to_string()),
        }
    }

    /// Read and parse the gate configuration file.
    pub fn load_gate_config(&self) -> io::Result<GateConfig> {
        let raw = fs::read_to_string(&self.gate_config_path)?;
        serde_yaml::from_str(&raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }
}
