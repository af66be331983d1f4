use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::errors::WorkerError;
use crate::models::channel::PumpOutcome;
use crate::models::channel::WorkerReport;
use crate::models::connection::Connection;
use crate::models::peer::PeerId;
use crate::models::record::Record;
use crate::worker::LiveWorkers;
use crate::worker::WorkerHandle;
use crate::worker::WorkerId;
use crate::worker::WorkerKind;

/// How long a closing stream may take to flush and shut down.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Owns an established [`Connection`] and moves bytes over it.
///
/// The task reads up to `read_chunk_size` bytes at a time, decodes exactly the
/// bytes returned into a [`Record`] and hands it to the record sink. Outbound
/// bytes queued with [`write`](Self::write) are written alongside, so a peer
/// that stops reading does not stop the reads, nor cancellation.
///
/// The task ends when the peer closes the stream, a read fails, or it is
/// cancelled. On every exit path the stream is shut down and dropped.
#[derive(Debug)]
pub struct DataPumpWorker {
    peer: PeerId,
    outbound_tx: mpsc::UnboundedSender<Bytes>,
    handle: WorkerHandle,
}

impl DataPumpWorker {
    pub(crate) fn spawn(
        connection: Connection,
        read_chunk_size: usize,
        record_tx: mpsc::Sender<Record>,
        report_tx: mpsc::UnboundedSender<WorkerReport>,
        census: &LiveWorkers,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let peer = connection.peer().clone();

        let handle = WorkerHandle::spawn(WorkerKind::Pump, census, |worker_id, cancel| {
            run_pump_worker(
                worker_id,
                connection,
                read_chunk_size.max(1),
                outbound_rx,
                record_tx,
                report_tx,
                cancel,
            )
        });

        Self {
            peer,
            outbound_tx,
            handle,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.handle.id()
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Queue `bytes` for the peer. Never blocks; if the pump has already
    /// exited the bytes are dropped with a warning.
    pub fn write(&self, bytes: Bytes) {
        let len = bytes.len();
        if self.outbound_tx.send(bytes).is_err() {
            warn!(
                "data pump {}: dropped {len} outbound bytes for {}, pump has exited",
                self.id(),
                self.peer
            );
        }
    }

    /// Close the stream. Safe to call any number of times.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Close the stream and wait until the task has exited.
    pub async fn cancel_and_wait(self) -> Result<(), WorkerError> {
        self.handle.cancel_and_wait().await
    }
}

async fn run_pump_worker(
    worker_id: WorkerId,
    connection: Connection,
    read_chunk_size: usize,
    mut outbound_rx: mpsc::UnboundedReceiver<Bytes>,
    record_tx: mpsc::Sender<Record>,
    report_tx: mpsc::UnboundedSender<WorkerReport>,
    cancel: CancellationToken,
) {
    let (peer, stream) = connection.into_parts();
    info!("data pump {worker_id}: pumping {peer}");

    // Reads and writes progress independently; either may block on the peer.
    let (mut reader, mut writer) = tokio::io::split(stream);
    let outcome = tokio::select! {
        _ = cancel.cancelled() => None,

        outcome = pump_inbound(worker_id, &peer, &mut reader, read_chunk_size, &record_tx) => {
            Some(outcome)
        }

        never = pump_outbound(worker_id, &peer, &mut writer, &mut outbound_rx) => match never {},
    };

    let mut stream = reader.unsplit(writer);
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, stream.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("data pump {worker_id}: shutdown of stream to {peer} failed: {e}"),
        Err(_) => debug!("data pump {worker_id}: shutdown of stream to {peer} timed out"),
    }
    drop(stream);

    match outcome {
        Some(outcome) => {
            if report_tx
                .send(WorkerReport::Pump { worker_id, outcome })
                .is_err()
            {
                debug!("data pump {worker_id}: state machine gone, discarding outcome");
            }
        }
        None => debug!("data pump {worker_id}: cancelled, stream to {peer} closed"),
    }
}

/// Turns reads into records until the peer closes the stream or a read fails.
async fn pump_inbound<R>(
    worker_id: WorkerId,
    peer: &PeerId,
    reader: &mut R,
    read_chunk_size: usize,
    record_tx: &mpsc::Sender<Record>,
) -> PumpOutcome
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; read_chunk_size];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => {
                info!("data pump {worker_id}: {peer} closed the stream");
                return PumpOutcome::Closed;
            }
            Ok(n) => {
                trace!("data pump {worker_id}: read {n} bytes from {peer}");
                let record = Record::decode(peer.clone(), &buffer[..n]);
                if record_tx.send(record).await.is_err() {
                    debug!("data pump {worker_id}: record sink closed, dropping record");
                }
            }
            Err(e) => {
                warn!("data pump {worker_id}: disconnected from {peer}: {e}");
                return PumpOutcome::Error(e.to_string());
            }
        }
    }
}

/// Drains the outbound queue in order. Never returns; once the queue is
/// closed there is nothing left to write and reading carries on alone.
async fn pump_outbound<W>(
    worker_id: WorkerId,
    peer: &PeerId,
    writer: &mut W,
    outbound_rx: &mut mpsc::UnboundedReceiver<Bytes>,
) -> Infallible
where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = outbound_rx.recv().await {
        write_to_peer(worker_id, peer, writer, &bytes).await;
    }
    std::future::pending().await
}

/// Write errors are logged and dropped; the read side decides when the
/// connection is over.
async fn write_to_peer<W>(worker_id: WorkerId, peer: &PeerId, writer: &mut W, bytes: &[u8])
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        writer.write_all(bytes).await?;
        writer.flush().await
    }
    .await;

    match written {
        Ok(()) => trace!("data pump {worker_id}: wrote {} bytes to {peer}", bytes.len()),
        Err(e) => warn!(
            "data pump {worker_id}: failed to write {} bytes to {peer}: {e}",
            bytes.len()
        ),
    }
}
