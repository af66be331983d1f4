//! Plumbing shared by the connect worker and the data pump: identifiers,
//! cancellable task handles, and a census of running worker tasks.

use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::Instrument;

use crate::errors::WorkerError;

/// A unique identifier for a worker task.
///
/// Identifiers increase monotonically for the lifetime of the process, so a
/// report carrying an identifier other than the current worker's comes from a
/// superseded worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl WorkerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum WorkerKind {
    #[strum(to_string = "connect worker")]
    Connect,
    #[strum(to_string = "data pump")]
    Pump,
}

/// Number of worker tasks currently running, per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerCounts {
    pub connect: usize,
    pub pump: usize,
}

/// Counts running worker tasks.
///
/// A task is counted from the moment it is spawned until its future
/// completes, including when it panics or is aborted.
#[derive(Debug, Clone, Default)]
pub struct LiveWorkers {
    connect: Arc<AtomicUsize>,
    pump: Arc<AtomicUsize>,
}

impl LiveWorkers {
    pub fn counts(&self) -> WorkerCounts {
        WorkerCounts {
            connect: self.connect.load(Ordering::SeqCst),
            pump: self.pump.load(Ordering::SeqCst),
        }
    }

    fn enter(&self, kind: WorkerKind) -> LiveGuard {
        let counter = match kind {
            WorkerKind::Connect => self.connect.clone(),
            WorkerKind::Pump => self.pump.clone(),
        };
        counter.fetch_add(1, Ordering::SeqCst);
        LiveGuard(counter)
    }
}

#[derive(Debug)]
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A worker-handle enables cancelling a worker task and awaiting its exit.
///
/// When the `WorkerHandle` is dropped a cancellation signal is sent to the
/// task.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    id: WorkerId,
    kind: WorkerKind,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn `body` on the tokio runtime. `body` receives the new worker's id
    /// and the token it must watch for cancellation.
    pub(crate) fn spawn<F, Fut>(kind: WorkerKind, census: &LiveWorkers, body: F) -> Self
    where
        F: FnOnce(WorkerId, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = WorkerId::next();
        let cancel = CancellationToken::new();
        let guard = census.enter(kind);
        let work = body(id, cancel.clone());
        let task = tokio::spawn(
            async move {
                let _guard = guard;
                work.await;
            }
            .in_current_span(),
        );
        debug!("spawned {kind} {id}");

        Self {
            id,
            kind,
            cancel,
            task: Some(task),
        }
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    /// sends cancel signal to the task and returns immediately.
    ///
    /// Safe to call any number of times.
    pub(crate) fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!("sent cancel signal to {} {}", self.kind, self.id);
            self.cancel.cancel();
        }
    }

    /// Cancel the task and wait until it has actually exited.
    pub(crate) async fn cancel_and_wait(mut self) -> Result<(), WorkerError> {
        self.cancel();
        match self.task.take() {
            Some(task) => task.await.map_err(WorkerError::from),
            None => Ok(()),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
