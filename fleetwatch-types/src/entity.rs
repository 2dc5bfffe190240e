//! Entity snapshots - the per-server records reported by the backend.

use std::fmt;

/// Health signal reported by the backend's own probe.
///
/// The backend may omit the field entirely, which is not the same as
/// reporting a failure: an absent signal is [`HealthSignal::Unknown`].
/// On the wire it is the nullable boolean `healthy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "Option<bool>", into = "Option<bool>"))]
pub enum HealthSignal {
    /// The probe succeeded.
    Up,
    /// The probe failed.
    Down,
    /// No probe result was reported.
    #[default]
    Unknown,
}

impl HealthSignal {
    /// Returns true only for an explicit probe failure.
    pub fn is_down(self) -> bool {
        matches!(self, HealthSignal::Down)
    }

    /// The wire representation (`true`, `false` or `null`).
    pub fn as_bool(self) -> Option<bool> {
        match self {
            HealthSignal::Up => Some(true),
            HealthSignal::Down => Some(false),
            HealthSignal::Unknown => None,
        }
    }
}

impl From<Option<bool>> for HealthSignal {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => HealthSignal::Up,
            Some(false) => HealthSignal::Down,
            None => HealthSignal::Unknown,
        }
    }
}

impl From<HealthSignal> for Option<bool> {
    fn from(signal: HealthSignal) -> Self {
        signal.as_bool()
    }
}

impl From<bool> for HealthSignal {
    fn from(value: bool) -> Self {
        Some(value).into()
    }
}

impl fmt::Display for HealthSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthSignal::Up => f.write_str("up"),
            HealthSignal::Down => f.write_str("down"),
            HealthSignal::Unknown => f.write_str("unknown"),
        }
    }
}

/// A state report for one backend server, as found in `/stats`,
/// `/servers` and push payloads.
///
/// Only `name` is required. Every other field is optional on the wire so
/// that consumers can tell "absent" apart from "zero": a full poll snapshot
/// treats absent numbers as `0`, a push delta leaves them untouched.
///
/// # Example
///
/// ```rust
/// use fleetwatch_types::EntitySnapshot;
///
/// let snapshot = EntitySnapshot::new("web-server-1")
///     .cpu_usage(42.0)
///     .memory_usage(61.5)
///     .healthy(true);
///
/// assert_eq!(snapshot.name, "web-server-1");
/// assert_eq!(snapshot.connections, None);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntitySnapshot {
    /// Stable identity of the server within the fleet.
    pub name: String,

    /// CPU usage percentage (0-100).
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub cpu_usage: Option<f64>,

    /// Memory usage percentage (0-100).
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub memory_usage: Option<f64>,

    /// Active connection count.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub connections: Option<u64>,

    /// Uptime in seconds.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub uptime: Option<f64>,

    /// Average response time in milliseconds.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub avg_response_time: Option<f64>,

    /// Cumulative request counter. May reset when the server restarts.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub total_requests: Option<u64>,

    /// Probe result; `null` and absent both mean unknown.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub healthy: Option<bool>,

    /// Host the server runs on.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub hostname: Option<String>,

    /// Unix timestamp (seconds) of the backend's last probe.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub last_check: Option<f64>,

    /// Routing weight, at least 1.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub weight: Option<u32>,
}

impl EntitySnapshot {
    /// Create a snapshot carrying only the server name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set CPU usage.
    pub fn cpu_usage(mut self, value: f64) -> Self {
        self.cpu_usage = Some(value);
        self
    }

    /// Set memory usage.
    pub fn memory_usage(mut self, value: f64) -> Self {
        self.memory_usage = Some(value);
        self
    }

    /// Set active connections.
    pub fn connections(mut self, value: u64) -> Self {
        self.connections = Some(value);
        self
    }

    /// Set uptime in seconds.
    pub fn uptime(mut self, value: f64) -> Self {
        self.uptime = Some(value);
        self
    }

    /// Set average response time in milliseconds.
    pub fn avg_response_time(mut self, value: f64) -> Self {
        self.avg_response_time = Some(value);
        self
    }

    /// Set the cumulative request counter.
    pub fn total_requests(mut self, value: u64) -> Self {
        self.total_requests = Some(value);
        self
    }

    /// Set the probe result.
    pub fn healthy(mut self, value: bool) -> Self {
        self.healthy = Some(value);
        self
    }

    /// Set the hostname.
    pub fn hostname(mut self, value: impl Into<String>) -> Self {
        self.hostname = Some(value.into());
        self
    }

    /// Set the last probe timestamp.
    pub fn last_check(mut self, value: f64) -> Self {
        self.last_check = Some(value);
        self
    }

    /// Set the routing weight.
    pub fn weight(mut self, value: u32) -> Self {
        self.weight = Some(value);
        self
    }

    /// The probe result as a tri-state signal.
    pub fn health_signal(&self) -> HealthSignal {
        self.healthy.into()
    }

    /// Fill fields that are absent here from `other`.
    ///
    /// Used to combine two reports about the same server where one endpoint
    /// carries fields the other lacks. Fields already present win.
    pub fn fill_from(&mut self, other: &EntitySnapshot) {
        self.cpu_usage = self.cpu_usage.or(other.cpu_usage);
        self.memory_usage = self.memory_usage.or(other.memory_usage);
        self.connections = self.connections.or(other.connections);
        self.uptime = self.uptime.or(other.uptime);
        self.avg_response_time = self.avg_response_time.or(other.avg_response_time);
        self.total_requests = self.total_requests.or(other.total_requests);
        self.healthy = self.healthy.or(other.healthy);
        if self.hostname.is_none() {
            self.hostname = other.hostname.clone();
        }
        self.last_check = self.last_check.or(other.last_check);
        self.weight = self.weight.or(other.weight);
    }
}
