use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config_models::link_config::LinkConfig;
use crate::errors::WorkerError;
use crate::models::channel::ConnectOutcome;
use crate::models::channel::WorkerReport;
use crate::models::connection::Connection;
use crate::models::peer::PeerId;
use crate::models::peer::ServiceId;
use crate::platform::PlatformAdapter;
use crate::worker::LiveWorkers;
use crate::worker::WorkerHandle;
use crate::worker::WorkerId;
use crate::worker::WorkerKind;

/// One outbound connection attempt, running on its own task.
///
/// The task halts discovery, asks the platform for a stream to the peer and
/// reports the [`ConnectOutcome`] to the state machine. Failing to halt
/// discovery is logged and the attempt goes ahead. A cancelled attempt
/// reports nothing: the pending `open_stream` future is dropped, which
/// releases the half-open socket.
#[derive(Debug)]
pub struct ConnectWorker {
    peer: PeerId,
    handle: WorkerHandle,
}

impl ConnectWorker {
    pub(crate) fn spawn(
        peer: PeerId,
        adapter: Arc<dyn PlatformAdapter>,
        config: &LinkConfig,
        report_tx: mpsc::UnboundedSender<WorkerReport>,
        census: &LiveWorkers,
    ) -> Self {
        let service = config.service_id.clone();
        let timeout = config.connect_timeout;
        let task_peer = peer.clone();

        let handle = WorkerHandle::spawn(WorkerKind::Connect, census, |worker_id, cancel| {
            run_connect_worker(
                worker_id, task_peer, service, timeout, adapter, report_tx, cancel,
            )
        });

        Self { peer, handle }
    }

    pub fn id(&self) -> WorkerId {
        self.handle.id()
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Abandon the attempt. Safe to call any number of times.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Abandon the attempt and wait until the task has exited.
    pub async fn cancel_and_wait(self) -> Result<(), WorkerError> {
        self.handle.cancel_and_wait().await
    }
}

async fn run_connect_worker(
    worker_id: WorkerId,
    peer: PeerId,
    service: ServiceId,
    timeout: Option<Duration>,
    adapter: Arc<dyn PlatformAdapter>,
    report_tx: mpsc::UnboundedSender<WorkerReport>,
    cancel: CancellationToken,
) {
    info!("connect worker {worker_id}: connecting to {peer}");

    let outcome = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("connect worker {worker_id}: cancelled while connecting to {peer}");
            return;
        }

        result = attempt_connection(&peer, &service, timeout, adapter.as_ref()) => {
            match result {
                Ok(connection) => {
                    info!("connect worker {worker_id}: connected to {peer}");
                    ConnectOutcome::Connected(connection)
                }
                Err(e) => {
                    warn!("connect worker {worker_id}: unable to connect to {peer}: {e:#}");
                    ConnectOutcome::Failed(format!("{e:#}"))
                }
            }
        }
    };

    // If the state machine is gone the connection is dropped, and so closed.
    if report_tx
        .send(WorkerReport::Connect { worker_id, outcome })
        .is_err()
    {
        debug!("connect worker {worker_id}: state machine gone, discarding outcome");
    }
}

async fn attempt_connection(
    peer: &PeerId,
    service: &ServiceId,
    timeout: Option<Duration>,
    adapter: &dyn PlatformAdapter,
) -> anyhow::Result<Connection> {
    if let Err(e) = adapter.cancel_discovery().await {
        warn!("failed to halt discovery before connecting to {peer}: {e:#}");
    }

    let open = adapter.open_stream(peer, service);
    let stream = match timeout {
        Some(limit) => tokio::time::timeout(limit, open).await.map_err(|_| {
            anyhow!(
                "no answer within {}",
                humantime::format_duration(limit)
            )
        })??,
        None => open.await?,
    };

    Ok(Connection::from_boxed(peer.clone(), stream))
}
