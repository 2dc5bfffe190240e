//! Handle for controlling a running session.

use std::sync::Arc;

use fleetwatch_types::Algorithm;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::data::{FleetView, TelemetryStore};
use crate::error::SyncError;

/// Requests sent from handles into the session loop.
#[derive(Debug)]
pub(crate) enum Command {
    /// Poll now unless a poll is already in flight.
    Refresh,
    /// Ask the backend to switch algorithm.
    SetAlgorithm {
        algorithm: Algorithm,
        reply: oneshot::Sender<Result<String, SyncError>>,
    },
    /// Outcome of a switch, routed back through the loop so the label
    /// changes before the caller hears about it.
    AlgorithmSwitched {
        result: Result<String, SyncError>,
        reply: oneshot::Sender<Result<String, SyncError>>,
    },
}

/// Handle to a running session.
///
/// Read the latest [`FleetView`] with [`view`](Self::view) or wait for
/// changes with [`subscribe`](Self::subscribe). Dropping the handle stops
/// the session; [`stop`](Self::stop) does so and hands back the store.
#[derive(Debug)]
pub struct SessionHandle {
    pub(crate) commands: mpsc::Sender<Command>,
    pub(crate) stop_tx: watch::Sender<bool>,
    pub(crate) views: watch::Receiver<Arc<FleetView>>,
    pub(crate) task: JoinHandle<TelemetryStore>,
    pub(crate) description: String,
}

impl SessionHandle {
    /// The most recently published view.
    pub fn view(&self) -> Arc<FleetView> {
        self.views.borrow().clone()
    }

    /// A receiver notified on every published view.
    pub fn subscribe(&self) -> watch::Receiver<Arc<FleetView>> {
        self.views.clone()
    }

    /// Description of the poll source driving this session.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Trigger a poll now.
    ///
    /// Ignored if a poll is already in flight.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.commands
            .send(Command::Refresh)
            .await
            .map_err(|_| SyncError::Closed)
    }

    /// Switch the backend's routing algorithm.
    ///
    /// The name is checked against the known catalogue before anything is
    /// sent. On success only the algorithm label of the store changes.
    pub async fn set_algorithm(&self, name: &str) -> Result<String, SyncError> {
        let algorithm: Algorithm = name.parse()?;
        let (reply, response) = oneshot::channel();

        self.commands
            .send(Command::SetAlgorithm { algorithm, reply })
            .await
            .map_err(|_| SyncError::Closed)?;

        response.await.map_err(|_| SyncError::Closed)?
    }

    /// Stop the session and return the store with its last-known state.
    ///
    /// Stops the poll timer, closes the push connection and cancels every
    /// pending traffic-event removal.
    pub async fn stop(self) -> Result<TelemetryStore, SyncError> {
        debug!("Stopping session for {}", self.description);
        let _ = self.stop_tx.send(true);
        self.task.await.map_err(|_| SyncError::Closed)
    }
}
