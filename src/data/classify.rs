//! Health classification of servers.
//!
//! The backend's probe result is authoritative: an explicit failure is
//! `Unhealthy` no matter what the resource metrics say. Only then are the
//! locally observed CPU and memory figures compared against thresholds.

use serde::{Deserialize, Serialize};

use super::entity::Entity;

/// Resource thresholds above which a server is flagged as `Warning`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// CPU usage percentage that must be exceeded to warn.
    pub cpu_warning: f64,
    /// Memory usage percentage that must be exceeded to warn.
    pub memory_warning: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_warning: 80.0,
            memory_warning: 85.0,
        }
    }
}

/// Health category shown for a server.
///
/// Ordered so that `max()` picks the worst status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Unhealthy,
}

impl HealthStatus {
    /// Returns a short symbol for display.
    pub fn symbol(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "OK",
            HealthStatus::Warning => "WARN",
            HealthStatus::Unhealthy => "DOWN",
        }
    }
}

/// Classify a server with the default thresholds.
pub fn classify(entity: &Entity) -> HealthStatus {
    classify_with(entity, &Thresholds::default())
}

/// Classify a server. First match wins:
///
/// 1. probe explicitly failed → `Unhealthy`
/// 2. CPU or memory above threshold → `Warning`
/// 3. otherwise → `Healthy`
pub fn classify_with(entity: &Entity, thresholds: &Thresholds) -> HealthStatus {
    if entity.healthy.is_down() {
        HealthStatus::Unhealthy
    } else if entity.cpu_usage > thresholds.cpu_warning
        || entity.memory_usage > thresholds.memory_warning
    {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}
