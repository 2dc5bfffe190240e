//! Layered settings: defaults, then a config file, then `FLEETWATCH_*`
//! environment variables, then command-line overrides.
//!
//! ```toml
//! endpoint = "http://lb.internal:5000"
//! push_addr = "lb.internal:5001"
//! poll_interval = "5s"
//! traffic_interval = "500ms"
//! cpu_warning = 75
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::data::duration;
use crate::data::{StoreOptions, Thresholds};
use crate::session::SessionOptions;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "FLEETWATCH";

/// Resolved settings for a session.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Backend base URL.
    pub endpoint: String,
    /// `host:port` of the push stream.
    pub push_addr: Option<String>,
    /// Read `/stats` documents from this file instead of the backend.
    pub file: Option<PathBuf>,
    #[serde(deserialize_with = "duration::deserialize")]
    pub poll_interval: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub stats_interval: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub traffic_interval: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub traffic_ttl: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub request_timeout: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub offline_after: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub max_backoff: Duration,
    pub history_capacity: usize,
    pub stats_window: usize,
    pub traffic_log_capacity: usize,
    pub stale_after_polls: u32,
    pub merge_servers: bool,
    pub cpu_warning: f64,
    pub memory_warning: f64,
    pub seed: Option<u64>,
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub endpoint: Option<String>,
    pub push_addr: Option<String>,
    pub file: Option<PathBuf>,
    pub poll_interval: Option<String>,
    pub seed: Option<u64>,
}

impl Settings {
    /// Load settings from every layer.
    pub fn load(config_path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        Self::load_with_env(config_path, overrides, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_with_env(
        config_path: Option<&Path>,
        overrides: &Overrides,
        env: Environment,
    ) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("endpoint", "http://localhost:5000")?
            .set_default("poll_interval", "5s")?
            .set_default("stats_interval", "1s")?
            .set_default("traffic_interval", "500ms")?
            .set_default("traffic_ttl", "2s")?
            .set_default("request_timeout", "2s")?
            .set_default("offline_after", "15s")?
            .set_default("max_backoff", "60s")?
            .set_default("history_capacity", 20)?
            .set_default("stats_window", 30)?
            .set_default("traffic_log_capacity", 50)?
            .set_default("stale_after_polls", 3)?
            .set_default("merge_servers", true)?
            .set_default("cpu_warning", 80.0)?
            .set_default("memory_warning", 85.0)?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder
            .add_source(env.prefix_separator("_").separator("__").try_parsing(true))
            .set_override_option("endpoint", overrides.endpoint.clone())?
            .set_override_option("push_addr", overrides.push_addr.clone())?
            .set_override_option(
                "file",
                overrides.file.as_ref().map(|p| p.display().to_string()),
            )?
            .set_override_option("poll_interval", overrides.poll_interval.clone())?
            .set_override_option("seed", overrides.seed)?;

        let settings: Settings = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings a session cannot run with.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("poll_interval", self.poll_interval),
            ("stats_interval", self.stats_interval),
            ("traffic_interval", self.traffic_interval),
            ("traffic_ttl", self.traffic_ttl),
            ("request_timeout", self.request_timeout),
            ("offline_after", self.offline_after),
            ("max_backoff", self.max_backoff),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                bail!("{} must be greater than zero", name);
            }
        }

        let capacities = [
            ("history_capacity", self.history_capacity),
            ("stats_window", self.stats_window),
            ("traffic_log_capacity", self.traffic_log_capacity),
            ("stale_after_polls", self.stale_after_polls as usize),
        ];
        for (name, value) in capacities {
            if value == 0 {
                bail!("{} must be at least 1", name);
            }
        }

        for (name, value) in [
            ("cpu_warning", self.cpu_warning),
            ("memory_warning", self.memory_warning),
        ] {
            if !(0.0..=100.0).contains(&value) {
                bail!("{} must be between 0 and 100, got {}", name, value);
            }
        }

        if self.file.is_none() && self.endpoint.trim().is_empty() {
            bail!("endpoint must not be empty");
        }

        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            cpu_warning: self.cpu_warning,
            memory_warning: self.memory_warning,
        }
    }

    /// Session cadences and capacities.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            poll_interval: self.poll_interval,
            stats_interval: self.stats_interval,
            traffic_interval: self.traffic_interval,
            traffic_ttl: self.traffic_ttl,
            max_backoff: self.max_backoff,
            stats_window: self.stats_window,
            traffic_log_capacity: self.traffic_log_capacity,
            seed: self.seed,
            store: StoreOptions {
                history_capacity: self.history_capacity,
                stale_after_polls: self.stale_after_polls,
                thresholds: self.thresholds(),
                offline_after: self.offline_after,
            },
        }
    }
}
