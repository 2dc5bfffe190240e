//! Transport adapters feeding the telemetry store.
//!
//! Two kinds of input exist:
//!
//! - **Poll sources** ([`PollSource`]) answer a request with a full fleet
//!   snapshot: [`HttpSource`] against the backend's REST API, or
//!   [`FileSource`] reading a saved `/stats` document.
//! - **Push streams** ([`PushStream`]) deliver `stats_update` and
//!   `traffic_update` messages as newline-delimited JSON.
//!
//! Documents are decoded into the typed [`StatsResponse`]/[`ServersResponse`]
//! first. When that fails, decoding falls back to the record level: a
//! record without a usable `name` is dropped and counted, and the rest of
//! the batch still applies.

mod file;
mod http;
mod push;

pub use file::FileSource;
pub use http::{HttpSource, HttpSourceBuilder};
pub use push::{PushEvent, PushMessage, PushStream};

use std::fmt::Debug;

use async_trait::async_trait;
use fleetwatch_types::{
    Algorithm, EntitySnapshot, FleetSummary, ServersResponse, StatsResponse, TrafficRecord,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::SyncError;

/// One decoded poll response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollBatch {
    /// Fleet-level counters and the active algorithm.
    pub summary: FleetSummary,
    /// Server records that decoded, in response order.
    pub entities: Vec<EntitySnapshot>,
    /// Records dropped because they were malformed or unnamed.
    pub dropped: usize,
}

/// A source of full fleet snapshots.
///
/// # Example
///
/// ```no_run
/// use fleetwatch::{HttpSource, PollSource};
///
/// # tokio_test::block_on(async {
/// let source = HttpSource::builder("http://localhost:5000").build()?;
/// let batch = source.fetch().await?;
/// println!("{} servers", batch.entities.len());
/// # Ok::<(), fleetwatch::SyncError>(())
/// # });
/// ```
#[async_trait]
pub trait PollSource: Send + Sync + Debug {
    /// Fetch the current fleet state.
    async fn fetch(&self) -> Result<PollBatch, SyncError>;

    /// Ask the backend to switch routing algorithm.
    ///
    /// Returns the algorithm name the backend reports as active.
    async fn set_algorithm(&self, algorithm: Algorithm) -> Result<String, SyncError> {
        Err(SyncError::Rejected(format!(
            "{} cannot switch to {}",
            self.description(),
            algorithm
        )))
    }

    /// Returns a human-readable description of the source.
    fn description(&self) -> &str;
}

/// Decode a list of server records, dropping the ones that are malformed.
///
/// Returns the decoded records and the number dropped.
pub fn decode_entities(values: Vec<Value>) -> (Vec<EntitySnapshot>, usize) {
    let mut dropped = 0;
    let mut entities = Vec::with_capacity(values.len());

    for value in values {
        match serde_json::from_value::<EntitySnapshot>(value) {
            Ok(snapshot) if !snapshot.name.trim().is_empty() => entities.push(snapshot),
            Ok(_) => {
                debug!("Dropping server record with empty name");
                dropped += 1;
            }
            Err(e) => {
                debug!("Dropping malformed server record: {}", e);
                dropped += 1;
            }
        }
    }

    (entities, dropped)
}

/// Drop records whose name is blank. Returns the kept records and the
/// number dropped.
fn keep_named(records: Vec<EntitySnapshot>) -> (Vec<EntitySnapshot>, usize) {
    let total = records.len();
    let kept: Vec<_> = records
        .into_iter()
        .filter(|r| !r.name.trim().is_empty())
        .collect();
    let dropped = total - kept.len();
    (kept, dropped)
}

/// Decode a `/stats`-shaped document.
///
/// The document itself must be a JSON object. A summary with badly typed
/// fields falls back to an empty summary instead of failing the batch.
pub fn decode_stats(value: Value) -> Result<PollBatch, SyncError> {
    if let Ok(response) = StatsResponse::deserialize(&value) {
        let (entities, dropped) = keep_named(response.server_stats);
        return Ok(PollBatch {
            summary: response.summary,
            entities,
            dropped,
        });
    }

    let Value::Object(mut object) = value else {
        return Err(SyncError::Parse("expected a JSON object".to_string()));
    };

    let records = match object.remove("server_stats") {
        Some(Value::Array(records)) => records,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(SyncError::Parse(format!(
                "server_stats must be an array, got {}",
                json_kind(&other)
            )))
        }
    };

    let summary = serde_json::from_value::<FleetSummary>(Value::Object(object)).unwrap_or_else(|e| {
        debug!("Ignoring malformed fleet summary: {}", e);
        FleetSummary::default()
    });
    let (entities, dropped) = decode_entities(records);

    Ok(PollBatch {
        summary,
        entities,
        dropped,
    })
}

/// Decode a `/servers` document into its records.
pub fn decode_servers(value: Value) -> Result<(Vec<EntitySnapshot>, usize), SyncError> {
    if value.is_object() {
        if let Ok(response) = ServersResponse::deserialize(&value) {
            return Ok(keep_named(response.servers));
        }
    }

    match value {
        Value::Object(mut object) => match object.remove("servers") {
            Some(Value::Array(records)) => Ok(decode_entities(records)),
            Some(Value::Null) | None => Ok((Vec::new(), 0)),
            Some(other) => Err(SyncError::Parse(format!(
                "servers must be an array, got {}",
                json_kind(&other)
            ))),
        },
        // Some backends answer with the bare list
        Value::Array(records) => Ok(decode_entities(records)),
        other => Err(SyncError::Parse(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

/// Decode a `traffic_update` payload: one record or a list of them.
pub fn decode_traffic(value: Value) -> (Vec<TrafficRecord>, usize) {
    let values = match value {
        Value::Array(values) => values,
        other => vec![other],
    };

    let mut dropped = 0;
    let records = values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<TrafficRecord>(value) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Dropping malformed traffic record: {}", e);
                dropped += 1;
                None
            }
        })
        .collect();

    (records, dropped)
}

/// Fold `/servers` records into `/stats` records.
///
/// Same-named records only gain the fields they lack; servers missing from
/// `/stats` are appended.
pub fn merge_listing(stats: &mut Vec<EntitySnapshot>, listing: Vec<EntitySnapshot>) {
    for server in listing {
        match stats.iter_mut().find(|s| s.name == server.name) {
            Some(existing) => existing.fill_from(&server),
            None => stats.push(server),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
