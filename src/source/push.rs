//! Push-channel reader.
//!
//! The backend pushes newline-delimited JSON envelopes:
//!
//! ```text
//! {"type": "stats_update", "payload": {"total_requests": 90, "server_stats": [...]}}
//! {"type": "traffic_update", "payload": {"server": "web-server-2", "success": true}}
//! ```
//!
//! A background task reads the stream and forwards decoded messages over a
//! channel. Lines that fail to decode, are not UTF-8 or exceed
//! [`MAX_LINE_BYTES`] are logged and skipped; the stream stays open.

use std::time::Duration;

use fleetwatch_types::{PushEnvelope, PushKind, TrafficRecord};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{decode_stats, decode_traffic, PollBatch};
use crate::backoff::Backoff;
use crate::error::SyncError;

/// First delay before reconnecting a dropped push connection.
pub const RECONNECT_BASE: Duration = Duration::from_secs(1);

/// Longest push line accepted; longer lines are discarded up to their newline.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// A decoded push message.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// Aggregate counters and partial server records.
    Stats(PollBatch),
    /// Routed requests for the traffic log.
    Traffic {
        records: Vec<TrafficRecord>,
        dropped: usize,
    },
    /// A message type this client does not handle.
    Ignored,
}

impl PushMessage {
    /// Decode one line of the push stream.
    pub fn decode(line: &str) -> Result<Self, SyncError> {
        let envelope: PushEnvelope<Value> = serde_json::from_str(line)?;
        match envelope.kind {
            PushKind::StatsUpdate => decode_stats(envelope.payload).map(PushMessage::Stats),
            PushKind::TrafficUpdate => {
                let (records, dropped) = decode_traffic(envelope.payload);
                Ok(PushMessage::Traffic { records, dropped })
            }
            PushKind::Unknown => Ok(PushMessage::Ignored),
        }
    }
}

/// What the push reader reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// The underlying connection is up.
    Connected,
    /// A decoded message.
    Message(PushMessage),
    /// The connection dropped; carries the reason.
    Disconnected(String),
}

/// Receiving end of a push channel.
///
/// Dropping the stream aborts the reader task, which closes the connection.
#[derive(Debug)]
pub struct PushStream {
    receiver: mpsc::Receiver<PushEvent>,
    description: String,
    task: JoinHandle<()>,
}

impl PushStream {
    /// Spawn a background task that reads from the given async reader.
    ///
    /// The reader is treated as already connected. When it reaches EOF a
    /// single [`PushEvent::Disconnected`] is emitted and the stream ends.
    pub fn spawn<R>(reader: R, description: &str) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(async move {
            if tx.send(PushEvent::Connected).await.is_err() {
                return;
            }
            let reason = forward_lines(reader, &tx, MAX_LINE_BYTES).await;
            let _ = tx.send(PushEvent::Disconnected(reason)).await;
        });

        Self {
            receiver: rx,
            description: format!("push: {}", description),
            task,
        }
    }

    /// Create a push stream from a channel of raw JSON messages.
    ///
    /// Useful when messages arrive from another transport (a websocket
    /// bridge, a test harness) without an `AsyncRead`.
    pub fn from_bytes_channel(mut rx: mpsc::Receiver<Vec<u8>>, description: &str) -> Self {
        let (tx, event_rx) = mpsc::channel(64);
        let task = tokio::spawn(async move {
            if tx.send(PushEvent::Connected).await.is_err() {
                return;
            }
            while let Some(bytes) = rx.recv().await {
                let text = String::from_utf8_lossy(&bytes);
                if !forward_line(&text, &tx).await {
                    return;
                }
            }
            let _ = tx
                .send(PushEvent::Disconnected("channel closed".to_string()))
                .await;
        });

        Self {
            receiver: event_rx,
            description: format!("push: {}", description),
            task,
        }
    }

    /// Connect to `addr` over TCP, reconnecting with bounded backoff.
    ///
    /// Each successful connection emits [`PushEvent::Connected`] and each
    /// drop emits [`PushEvent::Disconnected`]. The task runs until the
    /// stream is dropped.
    pub fn connect_tcp(addr: impl Into<String>, max_backoff: Duration) -> Self {
        let addr = addr.into();
        let description = format!("push: tcp://{}", addr);
        let (tx, rx) = mpsc::channel(64);

        let task = tokio::spawn(async move {
            let mut backoff = Backoff::new(RECONNECT_BASE, max_backoff);
            loop {
                match TcpStream::connect(&addr).await {
                    Ok(stream) => {
                        info!("Push channel connected to {}", addr);
                        backoff.reset();
                        if tx.send(PushEvent::Connected).await.is_err() {
                            return;
                        }
                        let reason = forward_lines(stream, &tx, MAX_LINE_BYTES).await;
                        warn!("Push channel to {} dropped: {}", addr, reason);
                        if tx.send(PushEvent::Disconnected(reason)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        debug!("Push connect to {} failed: {}", addr, e);
                    }
                }

                if tx.is_closed() {
                    return;
                }
                let delay = backoff.fail();
                debug!("Reconnecting push channel in {:?}", delay);
                tokio::time::sleep(delay).await;
            }
        });

        Self {
            receiver: rx,
            description,
            task,
        }
    }

    /// Wait for the next event. `None` once the reader has finished.
    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.receiver.recv().await
    }

    /// Returns a human-readable description of the stream.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Stop reading and close the connection.
    pub fn close(&mut self) {
        self.task.abort();
        self.receiver.close();
    }
}

impl Drop for PushStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Forward every line of `reader` until EOF, a read error, or the consumer
/// going away. Returns the reason the loop ended.
///
/// Lines are read as raw bytes, so a line that is not UTF-8 or is longer
/// than `max_line` bytes is skipped without dropping the connection.
async fn forward_lines<R>(reader: R, tx: &mpsc::Sender<PushEvent>, max_line: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    // Set while discarding the rest of an oversized line
    let mut skipping = false;

    loop {
        line.clear();
        let limit = max_line as u64 + 1;
        match (&mut reader).take(limit).read_until(b'\n', &mut line).await {
            Ok(0) => return "connection closed".to_string(),
            Ok(_) => {
                let complete = line.last() == Some(&b'\n');
                if skipping {
                    skipping = !complete;
                    continue;
                }
                if !complete && line.len() > max_line {
                    warn!("Skipping push line longer than {} bytes", max_line);
                    skipping = true;
                    continue;
                }
                match std::str::from_utf8(&line) {
                    Ok(text) => {
                        if !forward_line(text, tx).await {
                            return "consumer dropped".to_string();
                        }
                    }
                    Err(e) => warn!("Skipping push line that is not UTF-8: {}", e),
                }
            }
            Err(e) => return format!("read error: {}", e),
        }
    }
}

/// Decode and forward one line. Returns `false` once the consumer is gone.
async fn forward_line(line: &str, tx: &mpsc::Sender<PushEvent>) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return true;
    }
    match PushMessage::decode(line) {
        Ok(PushMessage::Ignored) => {
            debug!("Ignoring push message of unknown type");
            true
        }
        Ok(message) => tx.send(PushEvent::Message(message)).await.is_ok(),
        Err(e) => {
            warn!("Skipping malformed push message: {}", e);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    const STATS_LINE: &str = r#"{"type":"stats_update","payload":{"total_requests":90,"server_stats":[{"name":"s1","cpu_usage":33.0},{"cpu_usage":1.0}]}}"#;
    const TRAFFIC_LINE: &str =
        r#"{"type":"traffic_update","payload":{"server":"s1","success":false}}"#;

    #[test]
    fn decode_stats_update() {
        match PushMessage::decode(STATS_LINE).unwrap() {
            PushMessage::Stats(batch) => {
                assert_eq!(batch.summary.total_requests, Some(90));
                assert_eq!(batch.entities.len(), 1);
                assert_eq!(batch.dropped, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn decode_traffic_update() {
        match PushMessage::decode(TRAFFIC_LINE).unwrap() {
            PushMessage::Traffic { records, dropped } => {
                assert_eq!(records.len(), 1);
                assert_eq!(dropped, 0);
                assert!(records[0].is_error());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn decode_unknown_and_garbage() {
        assert_eq!(
            PushMessage::decode(r#"{"type":"heartbeat","payload":null}"#).unwrap(),
            PushMessage::Ignored
        );
        assert!(PushMessage::decode("not json").is_err());
    }

    #[tokio::test]
    async fn test_spawn_reads_lines() {
        let data = format!("{}\nnot json\n\n{}\n", STATS_LINE, TRAFFIC_LINE);
        let mut stream = PushStream::spawn(Cursor::new(data), "test");

        assert_eq!(stream.recv().await, Some(PushEvent::Connected));
        assert!(matches!(
            stream.recv().await,
            Some(PushEvent::Message(PushMessage::Stats(_)))
        ));
        assert!(matches!(
            stream.recv().await,
            Some(PushEvent::Message(PushMessage::Traffic { .. }))
        ));
        assert!(matches!(
            stream.recv().await,
            Some(PushEvent::Disconnected(_))
        ));
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_skipped() {
        let mut data = b"\xff\xfe garbage\n".to_vec();
        data.extend_from_slice(format!("{}\n", TRAFFIC_LINE).as_bytes());
        let mut stream = PushStream::spawn(Cursor::new(data), "test");

        assert_eq!(stream.recv().await, Some(PushEvent::Connected));
        assert!(matches!(
            stream.recv().await,
            Some(PushEvent::Message(PushMessage::Traffic { .. }))
        ));
        assert_eq!(
            stream.recv().await,
            Some(PushEvent::Disconnected("connection closed".to_string()))
        );
    }

    #[tokio::test]
    async fn test_oversized_line_is_skipped() {
        let long = format!(r#"{{"type":"traffic_update","payload":"{}"}}"#, "x".repeat(300));
        let data = format!("{}\n{}\n{}\n", long, STATS_LINE, TRAFFIC_LINE);
        let (tx, mut rx) = mpsc::channel(8);

        let reason = forward_lines(Cursor::new(data), &tx, 256).await;
        drop(tx);

        assert_eq!(reason, "connection closed");
        assert!(matches!(
            rx.recv().await,
            Some(PushEvent::Message(PushMessage::Stats(_)))
        ));
        assert!(matches!(
            rx.recv().await,
            Some(PushEvent::Message(PushMessage::Traffic { .. }))
        ));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_description() {
        let stream = PushStream::spawn(Cursor::new(""), "tcp://localhost:5001");
        assert_eq!(stream.description(), "push: tcp://localhost:5001");
    }

    #[tokio::test]
    async fn test_from_bytes_channel() {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(16);
        let mut stream = PushStream::from_bytes_channel(rx, "test-channel");

        tx.send(TRAFFIC_LINE.as_bytes().to_vec()).await.unwrap();
        drop(tx);

        assert_eq!(stream.recv().await, Some(PushEvent::Connected));
        assert!(matches!(
            stream.recv().await,
            Some(PushEvent::Message(PushMessage::Traffic { .. }))
        ));
        assert_eq!(
            stream.recv().await,
            Some(PushEvent::Disconnected("channel closed".to_string()))
        );
    }

    #[tokio::test]
    async fn test_tcp_reconnects_after_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for _ in 0..2 {
                let (mut socket, _) = listener.accept().await.unwrap();
                socket
                    .write_all(format!("{}\n", TRAFFIC_LINE).as_bytes())
                    .await
                    .unwrap();
                socket.shutdown().await.unwrap();
            }
        });

        let mut stream = PushStream::connect_tcp(addr.to_string(), Duration::from_secs(2));

        for _ in 0..2 {
            assert_eq!(stream.recv().await, Some(PushEvent::Connected));
            assert!(matches!(
                stream.recv().await,
                Some(PushEvent::Message(PushMessage::Traffic { .. }))
            ));
            assert!(matches!(
                stream.recv().await,
                Some(PushEvent::Disconnected(_))
            ));
        }
        stream.close();
    }
}
