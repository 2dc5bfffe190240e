//! Push-channel messages.

/// The kind of a push message, taken from its `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PushKind {
    /// Payload is a `/stats`-shaped document.
    StatsUpdate,
    /// Payload is a single [`TrafficRecord`].
    TrafficUpdate,
    /// Any type this schema version does not know about.
    #[cfg_attr(feature = "serde", serde(other))]
    Unknown,
}

/// A push message: `{"type": ..., "payload": ...}`.
///
/// The payload type is left to the consumer so that it can decode
/// partially valid payloads record by record.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PushEnvelope<P> {
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: PushKind,
    pub payload: P,
}

/// One routed request, as reported by a `traffic_update` push.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrafficRecord {
    /// Server the request was routed to.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub server: Option<String>,

    /// Observed response time in milliseconds.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub response_time: Option<f64>,

    /// Whether the request succeeded. Absent means success.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub success: Option<bool>,

    /// HTTP status returned to the client.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub status_code: Option<u16>,

    /// Unix timestamp (seconds) of the request.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub timestamp: Option<f64>,
}

impl TrafficRecord {
    /// A request counts as an error when it is flagged unsuccessful or
    /// answered with a 5xx status.
    pub fn is_error(&self) -> bool {
        self.success == Some(false) || self.status_code.is_some_and(|code| code >= 500)
    }
}
