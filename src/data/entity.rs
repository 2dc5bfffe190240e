//! The client-side model of a backend server and its history samples.

use std::time::Instant;

use fleetwatch_types::{EntitySnapshot, HealthSignal};
use serde::Serialize;

/// A backend server as currently known to the client.
///
/// `name` is the identity and never changes once observed. Every other
/// field is overwritten by snapshots and push deltas.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    pub name: String,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub connections: u64,
    pub uptime_secs: f64,
    pub avg_response_time_ms: f64,
    pub total_requests: u64,
    pub healthy: HealthSignal,
    pub weight: u32,
    pub hostname: Option<String>,
    pub last_check: Option<f64>,
}

impl Entity {
    /// A freshly observed server: zero metrics, unknown health, weight 1.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cpu_usage: 0.0,
            memory_usage: 0.0,
            connections: 0,
            uptime_secs: 0.0,
            avg_response_time_ms: 0.0,
            total_requests: 0,
            healthy: HealthSignal::Unknown,
            weight: 1,
            hostname: None,
            last_check: None,
        }
    }

    /// Overwrite every field from a full snapshot; absent numbers become 0
    /// and an absent health signal becomes unknown.
    pub fn replace_with(&mut self, snapshot: &EntitySnapshot) {
        self.cpu_usage = percent(snapshot.cpu_usage.unwrap_or(0.0));
        self.memory_usage = percent(snapshot.memory_usage.unwrap_or(0.0));
        self.connections = snapshot.connections.unwrap_or(0);
        self.uptime_secs = non_negative(snapshot.uptime.unwrap_or(0.0));
        self.avg_response_time_ms = non_negative(snapshot.avg_response_time.unwrap_or(0.0));
        self.total_requests = snapshot.total_requests.unwrap_or(0);
        self.healthy = snapshot.health_signal();
        self.weight = snapshot.weight.unwrap_or(1).max(1);
        self.hostname = snapshot.hostname.clone();
        self.last_check = snapshot.last_check;
    }

    /// Overwrite only the fields present in a partial delta.
    pub fn merge(&mut self, delta: &EntitySnapshot) {
        if let Some(cpu) = delta.cpu_usage {
            self.cpu_usage = percent(cpu);
        }
        if let Some(memory) = delta.memory_usage {
            self.memory_usage = percent(memory);
        }
        if let Some(connections) = delta.connections {
            self.connections = connections;
        }
        if let Some(uptime) = delta.uptime {
            self.uptime_secs = non_negative(uptime);
        }
        if let Some(response) = delta.avg_response_time {
            self.avg_response_time_ms = non_negative(response);
        }
        if let Some(total) = delta.total_requests {
            self.total_requests = total;
        }
        if delta.healthy.is_some() {
            self.healthy = delta.health_signal();
        }
        if let Some(weight) = delta.weight {
            self.weight = weight.max(1);
        }
        if let Some(ref hostname) = delta.hostname {
            self.hostname = Some(hostname.clone());
        }
        if delta.last_check.is_some() {
            self.last_check = delta.last_check;
        }
    }

    /// Capture the current resource metrics as a history sample.
    pub fn sample(&self, at: Instant) -> Sample {
        Sample {
            at,
            cpu_usage: self.cpu_usage,
            memory_usage: self.memory_usage,
            connections: self.connections,
        }
    }
}

fn percent(value: f64) -> f64 {
    non_negative(value).min(100.0)
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

/// Resource metrics tracked in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Cpu,
    Memory,
    Connections,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Cpu, Metric::Memory, Metric::Connections];

    pub fn label(&self) -> &'static str {
        match self {
            Metric::Cpu => "cpu",
            Metric::Memory => "memory",
            Metric::Connections => "connections",
        }
    }
}

/// One immutable observation in an entity's history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub at: Instant,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub connections: u64,
}

impl Sample {
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Cpu => self.cpu_usage,
            Metric::Memory => self.memory_usage,
            Metric::Connections => self.connections as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entity_defaults() {
        let entity = Entity::new("s9");
        assert_eq!(entity.cpu_usage, 0.0);
        assert_eq!(entity.connections, 0);
        assert_eq!(entity.weight, 1);
        assert_eq!(entity.healthy, HealthSignal::Unknown);
    }

    #[test]
    fn replace_resets_absent_fields() {
        let mut entity = Entity::new("s1");
        entity.replace_with(&EntitySnapshot::new("s1").cpu_usage(50.0).connections(7).healthy(false));
        entity.replace_with(&EntitySnapshot::new("s1").memory_usage(20.0));

        assert_eq!(entity.cpu_usage, 0.0);
        assert_eq!(entity.memory_usage, 20.0);
        assert_eq!(entity.connections, 0);
        assert_eq!(entity.healthy, HealthSignal::Unknown);
    }

    #[test]
    fn merge_keeps_absent_fields() {
        let mut entity = Entity::new("s1");
        entity.replace_with(&EntitySnapshot::new("s1").cpu_usage(50.0).connections(7).healthy(true));
        entity.merge(&EntitySnapshot::new("s1").memory_usage(30.0));

        assert_eq!(entity.cpu_usage, 50.0);
        assert_eq!(entity.memory_usage, 30.0);
        assert_eq!(entity.connections, 7);
        assert_eq!(entity.healthy, HealthSignal::Up);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let mut entity = Entity::new("s1");
        entity.replace_with(
            &EntitySnapshot::new("s1")
                .cpu_usage(140.0)
                .memory_usage(-3.0)
                .avg_response_time(f64::NAN)
                .weight(0),
        );

        assert_eq!(entity.cpu_usage, 100.0);
        assert_eq!(entity.memory_usage, 0.0);
        assert_eq!(entity.avg_response_time_ms, 0.0);
        assert_eq!(entity.weight, 1);
    }

    #[test]
    fn sample_reads_metrics() {
        let mut entity = Entity::new("s1");
        entity.merge(&EntitySnapshot::new("s1").cpu_usage(12.0).connections(3));
        let sample = entity.sample(Instant::now());

        assert_eq!(sample.value(Metric::Cpu), 12.0);
        assert_eq!(sample.value(Metric::Connections), 3.0);
    }
}
