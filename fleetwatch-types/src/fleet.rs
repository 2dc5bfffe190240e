//! Fleet-level responses from the backend's REST endpoints.

use crate::EntitySnapshot;

/// Aggregate counters carried by `GET /stats` and `stats_update` pushes.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FleetSummary {
    /// Requests routed by the load balancer since it started.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub total_requests: Option<u64>,

    /// Servers the backend currently considers healthy.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub healthy_servers: Option<u32>,

    /// Servers registered with the backend.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub total_servers: Option<u32>,

    /// Name of the active routing algorithm.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub algorithm: Option<String>,
}

/// Body of `GET /stats`.
///
/// ```json
/// {"total_requests": 1200, "healthy_servers": 3, "total_servers": 3,
///  "algorithm": "round_robin", "server_stats": [{"name": "web-server-1"}]}
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatsResponse {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub summary: FleetSummary,

    #[cfg_attr(feature = "serde", serde(default))]
    pub server_stats: Vec<EntitySnapshot>,
}

/// Body of `GET /servers`.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServersResponse {
    #[cfg_attr(feature = "serde", serde(default))]
    pub servers: Vec<EntitySnapshot>,
}

/// Body of `GET /algorithm/{name}`.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlgorithmResponse {
    pub success: bool,

    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub current_algorithm: Option<String>,

    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub message: Option<String>,

    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub error: Option<String>,
}
