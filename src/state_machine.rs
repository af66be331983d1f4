//! The connection state machine: a single actor task that owns the state and
//! the worker slots, and a cloneable handle to talk to it.
//!
//! Every handle call and every worker report is one message on the actor's
//! queue, processed to completion before the next one. "Cancel old worker,
//! install new worker, update state" therefore never interleaves with another
//! such step, and no lock is needed.

use std::ops::ControlFlow;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;
use tracing::Instrument;

use crate::config_models::link_config::ConnectFailurePolicy;
use crate::config_models::link_config::LinkConfig;
use crate::connect_worker::ConnectWorker;
use crate::errors::StateMachineError;
use crate::models::channel::ConnectOutcome;
use crate::models::channel::PumpOutcome;
use crate::models::channel::StateMachineCommand;
use crate::models::channel::WorkerReport;
use crate::models::connection::Connection;
use crate::models::peer::PeerId;
use crate::models::record::Record;
use crate::models::state::ConnectionState;
use crate::models::state::StateTransition;
use crate::platform::PlatformAdapter;
use crate::pump_worker::DataPumpWorker;
use crate::worker::LiveWorkers;
use crate::worker::WorkerCounts;
use crate::worker::WorkerId;

const TRANSITION_CHANNEL_CAPACITY: usize = 64;

/// The actor. Constructed and driven by [`ConnectionStateMachine::start`];
/// everything else goes through [`StateMachineHandle`].
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    connect_worker: Option<ConnectWorker>,
    pump_worker: Option<DataPumpWorker>,

    adapter: Arc<dyn PlatformAdapter>,
    config: LinkConfig,
    record_tx: mpsc::Sender<Record>,
    report_tx: mpsc::UnboundedSender<WorkerReport>,
    transition_tx: broadcast::Sender<StateTransition>,
    census: LiveWorkers,
}

/// Cheap, cloneable access to a running [`ConnectionStateMachine`].
///
/// All methods are serialized by the actor. They fail only with
/// [`StateMachineError::ActorGone`] once the actor has shut down, or on caller
/// errors; transport failures show up as state transitions.
#[derive(Debug, Clone)]
pub struct StateMachineHandle {
    command_tx: mpsc::Sender<StateMachineCommand>,
    transition_tx: broadcast::Sender<StateTransition>,
    census: LiveWorkers,
}

impl ConnectionStateMachine {
    /// Spawn the actor. Decoded records are delivered on `record_tx`.
    ///
    /// The actor runs until [`StateMachineHandle::shutdown`] is called or every
    /// handle is dropped; either way all workers are stopped first.
    pub fn start(
        adapter: Arc<dyn PlatformAdapter>,
        config: LinkConfig,
        record_tx: mpsc::Sender<Record>,
    ) -> (StateMachineHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(config.command_channel_capacity.max(1));
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (transition_tx, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        let census = LiveWorkers::default();

        let actor = Self {
            state: ConnectionState::None,
            connect_worker: None,
            pump_worker: None,
            adapter,
            config,
            record_tx,
            report_tx,
            transition_tx: transition_tx.clone(),
            census: census.clone(),
        };
        let task = tokio::spawn(actor.run(command_rx, report_rx).in_current_span());

        let handle = StateMachineHandle {
            command_tx,
            transition_tx,
            census,
        };
        (handle, task)
    }

    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<StateMachineCommand>,
        mut report_rx: mpsc::UnboundedReceiver<WorkerReport>,
    ) {
        debug!("connection state machine running");
        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        debug!("all state machine handles dropped");
                        self.stop().await;
                        break;
                    };
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                }

                // never `None`: the actor holds a sender itself
                Some(report) = report_rx.recv() => self.handle_report(report).await,
            }
            self.check_invariant();
        }
        debug!("connection state machine stopped");
    }

    async fn handle_command(&mut self, command: StateMachineCommand) -> ControlFlow<()> {
        debug!("state machine command: {command}");
        match command {
            StateMachineCommand::Connect { peer, done } => {
                let result = self.connect(peer).await;
                let _ = done.send(result);
            }
            StateMachineCommand::Adopt { connection, done } => {
                self.adopt(connection).await;
                let _ = done.send(());
            }
            StateMachineCommand::Stop { done } => {
                self.stop().await;
                let _ = done.send(());
            }
            StateMachineCommand::GetState(reply) => {
                let _ = reply.send(self.state);
            }
            StateMachineCommand::SetState { state, done } => {
                let _ = done.send(self.set_state_checked(state));
            }
            StateMachineCommand::Write(bytes) => match &self.pump_worker {
                Some(pump) => pump.write(bytes),
                None => warn!(
                    "not connected; dropping {} outbound bytes (state {})",
                    bytes.len(),
                    self.state
                ),
            },
            StateMachineCommand::Shutdown { done } => {
                self.stop().await;
                let _ = done.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn handle_report(&mut self, report: WorkerReport) {
        match report {
            WorkerReport::Connect { worker_id, outcome } => {
                if !self.is_current_connect_worker(worker_id) {
                    match outcome {
                        ConnectOutcome::Connected(connection) => info!(
                            "discarding connection to {} from superseded attempt {worker_id}",
                            connection.peer()
                        ),
                        ConnectOutcome::Failed(_) => {
                            debug!("ignoring failure of superseded attempt {worker_id}")
                        }
                    }
                    return;
                }

                match outcome {
                    ConnectOutcome::Connected(connection) => self.adopt(connection).await,
                    ConnectOutcome::Failed(reason) => {
                        self.release_connect_worker().await;
                        match self.config.on_connect_failure {
                            ConnectFailurePolicy::ResetToNone => {
                                info!("connect attempt {worker_id} failed: {reason}");
                                self.set_state(ConnectionState::None);
                            }
                            ConnectFailurePolicy::StayConnecting => warn!(
                                "connect attempt {worker_id} failed: {reason}; \
                                 staying {} until the next connect, adopt or stop",
                                self.state
                            ),
                        }
                    }
                }
            }

            WorkerReport::Pump { worker_id, outcome } => {
                if !self.is_current_pump_worker(worker_id) {
                    debug!("ignoring end of superseded data pump {worker_id}");
                    return;
                }

                match &outcome {
                    PumpOutcome::Closed => info!("connection closed by peer"),
                    PumpOutcome::Error(reason) => info!("connection lost: {reason}"),
                }
                self.release_pump_worker().await;
                self.set_state(ConnectionState::None);
            }
        }
    }

    /// A new outbound attempt supersedes any attempt or session in progress.
    async fn connect(&mut self, peer: PeerId) -> Result<(), StateMachineError> {
        if !peer.is_valid() {
            return Err(StateMachineError::InvalidPeer);
        }
        info!("connecting to {peer}");

        self.release_connect_worker().await;
        self.release_pump_worker().await;

        self.connect_worker = Some(ConnectWorker::spawn(
            peer,
            self.adapter.clone(),
            &self.config,
            self.report_tx.clone(),
            &self.census,
        ));
        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    async fn adopt(&mut self, connection: Connection) {
        info!("connected to {}", connection.peer());

        self.release_connect_worker().await;
        self.release_pump_worker().await;

        self.pump_worker = Some(DataPumpWorker::spawn(
            connection,
            self.config.read_chunk_size,
            self.record_tx.clone(),
            self.report_tx.clone(),
            &self.census,
        ));
        self.set_state(ConnectionState::Connected);
    }

    async fn stop(&mut self) {
        info!("stopping connection workers");
        self.release_connect_worker().await;
        self.release_pump_worker().await;
        self.set_state(ConnectionState::None);
    }

    /// Cancel the connect worker, if any, and wait for its task to exit.
    /// Failures are logged; cancellation always counts as done.
    async fn release_connect_worker(&mut self) {
        if let Some(worker) = self.connect_worker.take() {
            let id = worker.id();
            debug!("abandoning attempt {id} to {}", worker.peer());
            if let Err(e) = worker.cancel_and_wait().await {
                warn!("connect worker {id} did not exit cleanly: {e}");
            }
        }
    }

    async fn release_pump_worker(&mut self) {
        if let Some(worker) = self.pump_worker.take() {
            let id = worker.id();
            debug!("closing connection to {} (data pump {id})", worker.peer());
            if let Err(e) = worker.cancel_and_wait().await {
                warn!("data pump {id} did not exit cleanly: {e}");
            }
        }
    }

    fn is_current_connect_worker(&self, worker_id: WorkerId) -> bool {
        self.connect_worker.as_ref().map(ConnectWorker::id) == Some(worker_id)
    }

    fn is_current_pump_worker(&self, worker_id: WorkerId) -> bool {
        self.pump_worker.as_ref().map(DataPumpWorker::id) == Some(worker_id)
    }

    fn set_state(&mut self, state: ConnectionState) {
        let from = self.state;
        self.state = state;

        if from == state {
            debug!("connection state stays {state}");
            return;
        }

        let transition = StateTransition { from, to: state };
        info!("connection state: {transition}");
        // no subscribers is fine
        let _ = self.transition_tx.send(transition);
    }

    /// `set_state` on behalf of a collaborator, who may not contradict the
    /// live workers.
    fn set_state_checked(&mut self, state: ConnectionState) -> Result<(), StateMachineError> {
        let connect_worker = self.connect_worker.is_some();
        let pump_worker = self.pump_worker.is_some();
        if !state.admits(connect_worker, pump_worker) {
            warn!("refusing to set state {state} (currently {})", self.state);
            return Err(StateMachineError::InconsistentState {
                requested: state,
                connect_worker,
                pump_worker,
            });
        }
        self.set_state(state);
        Ok(())
    }

    fn check_invariant(&self) {
        let connect_worker = self.connect_worker.is_some();
        let pump_worker = self.pump_worker.is_some();
        if self.state.admits(connect_worker, pump_worker) {
            return;
        }

        // expected after a failed attempt under `StayConnecting`
        let stranded = self.state == ConnectionState::Connecting
            && !connect_worker
            && !pump_worker
            && self.config.on_connect_failure == ConnectFailurePolicy::StayConnecting;
        if !stranded {
            warn!(
                "state {} does not match live workers (connect: {connect_worker}, pump: {pump_worker})",
                self.state
            );
        }
    }
}

impl StateMachineHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> StateMachineCommand,
    ) -> Result<T, StateMachineError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(command(tx))
            .await
            .map_err(|_| StateMachineError::ActorGone)?;
        rx.await.map_err(|_| StateMachineError::ActorGone)
    }

    /// Start an outbound attempt to `peer`, superseding any attempt or session
    /// in progress. Returns once the attempt has started (state
    /// `Connecting`); watch [`subscribe`](Self::subscribe) for the outcome.
    pub async fn connect(&self, peer: PeerId) -> Result<(), StateMachineError> {
        self.request(|done| StateMachineCommand::Connect { peer, done })
            .await?
    }

    /// Take over an already-open connection, superseding any attempt or
    /// session in progress. Returns once the state is `Connected`.
    pub async fn adopt(&self, connection: Connection) -> Result<(), StateMachineError> {
        self.request(|done| StateMachineCommand::Adopt { connection, done })
            .await
    }

    /// Stop all workers and close any connection. Returns once the workers
    /// have exited and the state is `None`.
    pub async fn stop(&self) -> Result<(), StateMachineError> {
        self.request(|done| StateMachineCommand::Stop { done }).await
    }

    pub async fn get_state(&self) -> Result<ConnectionState, StateMachineError> {
        self.request(StateMachineCommand::GetState).await
    }

    /// Set the state directly. Only values consistent with the live workers
    /// are accepted, e.g. `Listening` while idle.
    pub async fn set_state(&self, state: ConnectionState) -> Result<(), StateMachineError> {
        self.request(|done| StateMachineCommand::SetState { state, done })
            .await?
    }

    /// Queue `bytes` for the connected peer. If there is no connection, or
    /// writing fails, the bytes are dropped and a warning is logged.
    pub async fn write(&self, bytes: impl Into<Bytes>) -> Result<(), StateMachineError> {
        self.command_tx
            .send(StateMachineCommand::Write(bytes.into()))
            .await
            .map_err(|_| StateMachineError::ActorGone)
    }

    /// Receive every state transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StateTransition> {
        self.transition_tx.subscribe()
    }

    /// Worker tasks currently running.
    pub fn live_workers(&self) -> WorkerCounts {
        self.census.counts()
    }

    /// Stop all workers, then end the actor.
    pub async fn shutdown(&self) -> Result<(), StateMachineError> {
        self.request(|done| StateMachineCommand::Shutdown { done })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;
    use test_strategy::proptest;
    use tokio::io::AsyncReadExt;
    use tokio::io::AsyncWriteExt;
    use tracing_test::traced_test;

    use super::*;
    use crate::tests::shared::next_transition;
    use crate::tests::shared::DuplexAdapter;

    struct Setup {
        handle: StateMachineHandle,
        actor: JoinHandle<()>,
        adapter: Arc<DuplexAdapter>,
        record_rx: mpsc::Receiver<Record>,
        transitions: broadcast::Receiver<StateTransition>,
    }

    fn setup(config: LinkConfig) -> Setup {
        let adapter = Arc::new(DuplexAdapter::default());
        let (record_tx, record_rx) = mpsc::channel(16);
        let (handle, actor) = ConnectionStateMachine::start(adapter.clone(), config, record_tx);
        let transitions = handle.subscribe();
        Setup {
            handle,
            actor,
            adapter,
            record_rx,
            transitions,
        }
    }

    fn transition(from: ConnectionState, to: ConnectionState) -> StateTransition {
        StateTransition { from, to }
    }

    #[tokio::test]
    async fn connect_success_then_stop() -> anyhow::Result<()> {
        let mut s = setup(LinkConfig::default());
        assert_eq!(ConnectionState::None, s.handle.get_state().await?);

        let peer = PeerId::new("sensor");
        s.handle.connect(peer.clone()).await?;
        assert_eq!(
            transition(ConnectionState::None, ConnectionState::Connecting),
            next_transition(&mut s.transitions).await
        );
        assert_eq!(
            transition(ConnectionState::Connecting, ConnectionState::Connected),
            next_transition(&mut s.transitions).await
        );
        assert_eq!(1, s.adapter.discovery_cancellations());
        assert_eq!(WorkerCounts { connect: 0, pump: 1 }, s.handle.live_workers());

        s.handle.stop().await?;
        assert_eq!(
            transition(ConnectionState::Connected, ConnectionState::None),
            next_transition(&mut s.transitions).await
        );
        assert_eq!(ConnectionState::None, s.handle.get_state().await?);
        assert_eq!(WorkerCounts::default(), s.handle.live_workers());
        assert_eq!(1, s.adapter.closed_streams());

        // the peer sees the socket closed
        let mut far = s.adapter.take_far_end(&peer).expect("stream was opened");
        assert_eq!(0, far.read(&mut [0u8; 8]).await?);

        s.handle.shutdown().await?;
        s.actor.await?;
        assert_eq!(1, s.adapter.closed_streams());
        Ok(())
    }

    #[tokio::test]
    async fn failed_connect_resets_to_none_by_default() -> anyhow::Result<()> {
        let mut s = setup(LinkConfig::default());

        s.handle.connect(PeerId::new("refuse:sensor")).await?;
        assert_eq!(
            transition(ConnectionState::None, ConnectionState::Connecting),
            next_transition(&mut s.transitions).await
        );
        assert_eq!(
            transition(ConnectionState::Connecting, ConnectionState::None),
            next_transition(&mut s.transitions).await
        );
        assert_eq!(WorkerCounts::default(), s.handle.live_workers());
        Ok(())
    }

    #[traced_test]
    #[tokio::test]
    async fn failed_connect_can_stay_connecting() -> anyhow::Result<()> {
        let s = setup(LinkConfig {
            on_connect_failure: ConnectFailurePolicy::StayConnecting,
            ..LinkConfig::default()
        });

        s.handle.connect(PeerId::new("refuse:sensor")).await?;
        tokio::time::timeout(Duration::from_secs(5), async {
            while !logs_contain("staying Connecting") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;

        assert_eq!(ConnectionState::Connecting, s.handle.get_state().await?);
        assert_eq!(WorkerCounts::default(), s.handle.live_workers());

        // a later stop still clears it
        s.handle.stop().await?;
        assert_eq!(ConnectionState::None, s.handle.get_state().await?);
        Ok(())
    }

    #[tokio::test]
    async fn connect_rejects_invalid_peer() -> anyhow::Result<()> {
        let s = setup(LinkConfig::default());
        assert_eq!(
            Err(StateMachineError::InvalidPeer),
            s.handle.connect(PeerId::new("  ")).await
        );
        assert_eq!(ConnectionState::None, s.handle.get_state().await?);
        Ok(())
    }

    #[tokio::test]
    async fn connect_while_connected_closes_old_socket_first() -> anyhow::Result<()> {
        let mut s = setup(LinkConfig::default());
        let first = PeerId::new("first");

        s.handle.connect(first.clone()).await?;
        next_transition(&mut s.transitions).await;
        next_transition(&mut s.transitions).await;
        let mut first_far = s.adapter.take_far_end(&first).expect("first stream opened");

        // the second attempt hangs, so only the first socket could be open
        s.handle.connect(PeerId::new("hang:second")).await?;
        assert_eq!(
            transition(ConnectionState::Connected, ConnectionState::Connecting),
            next_transition(&mut s.transitions).await
        );
        assert_eq!(1, s.adapter.closed_streams());
        assert_eq!(0, first_far.read(&mut [0u8; 8]).await?);
        assert_eq!(WorkerCounts { connect: 1, pump: 0 }, s.handle.live_workers());
        Ok(())
    }

    #[tokio::test]
    async fn adopt_pumps_the_adopted_stream() -> anyhow::Result<()> {
        let mut s = setup(LinkConfig::default());
        let (near, mut far) = tokio::io::duplex(256);

        s.handle
            .adopt(Connection::new(PeerId::new("inbound"), near))
            .await?;
        assert_eq!(ConnectionState::Connected, s.handle.get_state().await?);
        assert_eq!(WorkerCounts { connect: 0, pump: 1 }, s.handle.live_workers());

        far.write_all(b"t=20.1\n").await?;
        let record = s.record_rx.recv().await.expect("record");
        assert_eq!("inbound", record.peer.as_str());
        assert_eq!("t=20.1\n", record.text);
        Ok(())
    }

    #[tokio::test]
    async fn adopt_supersedes_pending_attempt() -> anyhow::Result<()> {
        let mut s = setup(LinkConfig::default());
        s.handle.connect(PeerId::new("hang:sensor")).await?;
        assert_eq!(WorkerCounts { connect: 1, pump: 0 }, s.handle.live_workers());

        let (near, _far) = tokio::io::duplex(64);
        s.handle
            .adopt(Connection::new(PeerId::new("inbound"), near))
            .await?;
        assert_eq!(WorkerCounts { connect: 0, pump: 1 }, s.handle.live_workers());

        assert_eq!(
            transition(ConnectionState::None, ConnectionState::Connecting),
            next_transition(&mut s.transitions).await
        );
        assert_eq!(
            transition(ConnectionState::Connecting, ConnectionState::Connected),
            next_transition(&mut s.transitions).await
        );
        Ok(())
    }

    #[tokio::test]
    async fn written_bytes_arrive_in_order() -> anyhow::Result<()> {
        let mut s = setup(LinkConfig::default());
        let peer = PeerId::new("sensor");
        s.handle.connect(peer.clone()).await?;
        next_transition(&mut s.transitions).await;
        next_transition(&mut s.transitions).await;
        let mut far = s.adapter.take_far_end(&peer).expect("stream opened");

        let payload: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        for chunk in payload.chunks(700) {
            s.handle.write(chunk.to_vec()).await?;
        }

        let mut received = vec![0u8; payload.len()];
        far.read_exact(&mut received).await?;
        assert_eq!(payload, received);
        Ok(())
    }

    #[traced_test]
    #[tokio::test]
    async fn write_without_connection_is_dropped() -> anyhow::Result<()> {
        let s = setup(LinkConfig::default());
        s.handle.write(&b"nobody"[..]).await?;
        assert_eq!(ConnectionState::None, s.handle.get_state().await?);
        assert!(logs_contain("not connected; dropping 6 outbound bytes"));
        Ok(())
    }

    #[tokio::test]
    async fn stop_completes_while_peer_is_not_reading() -> anyhow::Result<()> {
        let s = setup(LinkConfig::default());
        let (near, _far) = tokio::io::duplex(64);
        s.handle
            .adopt(Connection::new(PeerId::new("stalled"), near))
            .await?;

        s.handle.write(vec![7u8; 4096]).await?;
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(3), s.handle.stop()).await??;
        let state = tokio::time::timeout(Duration::from_secs(1), s.handle.get_state()).await??;
        assert_eq!(ConnectionState::None, state);
        assert_eq!(WorkerCounts::default(), s.handle.live_workers());
        Ok(())
    }

    #[tokio::test]
    async fn peer_closing_stream_returns_to_none() -> anyhow::Result<()> {
        let mut s = setup(LinkConfig::default());
        let peer = PeerId::new("sensor");
        s.handle.connect(peer.clone()).await?;
        next_transition(&mut s.transitions).await;
        next_transition(&mut s.transitions).await;

        drop(s.adapter.take_far_end(&peer));
        assert_eq!(
            transition(ConnectionState::Connected, ConnectionState::None),
            next_transition(&mut s.transitions).await
        );
        assert_eq!(WorkerCounts::default(), s.handle.live_workers());
        Ok(())
    }

    #[tokio::test]
    async fn stop_is_idempotent() -> anyhow::Result<()> {
        let s = setup(LinkConfig::default());
        s.handle.stop().await?;
        s.handle.stop().await?;
        assert_eq!(ConnectionState::None, s.handle.get_state().await?);
        Ok(())
    }

    #[tokio::test]
    async fn set_state_refuses_contradicting_workers() -> anyhow::Result<()> {
        let s = setup(LinkConfig::default());

        s.handle.set_state(ConnectionState::Listening).await?;
        assert_eq!(ConnectionState::Listening, s.handle.get_state().await?);

        assert!(matches!(
            s.handle.set_state(ConnectionState::Connected).await,
            Err(StateMachineError::InconsistentState {
                requested: ConnectionState::Connected,
                ..
            })
        ));

        s.handle.connect(PeerId::new("hang:sensor")).await?;
        assert!(s.handle.set_state(ConnectionState::None).await.is_err());
        assert_eq!(ConnectionState::Connecting, s.handle.get_state().await?);
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_ends_actor_and_handles_report_it() -> anyhow::Result<()> {
        let s = setup(LinkConfig::default());
        s.handle.connect(PeerId::new("hang:sensor")).await?;

        s.handle.shutdown().await?;
        s.actor.await?;

        assert_eq!(WorkerCounts::default(), s.handle.live_workers());
        assert_eq!(Err(StateMachineError::ActorGone), s.handle.get_state().await);
        assert_eq!(
            Err(StateMachineError::ActorGone),
            s.handle.write(&b"late"[..]).await
        );
        Ok(())
    }

    #[tokio::test]
    async fn dropping_all_handles_stops_workers() -> anyhow::Result<()> {
        let s = setup(LinkConfig::default());
        let peer = PeerId::new("sensor");
        s.handle.connect(peer.clone()).await?;

        let census = s.handle.census.clone();
        drop(s.handle);
        s.actor.await?;

        assert_eq!(WorkerCounts::default(), census.counts());
        Ok(())
    }

    #[derive(Debug, Clone, test_strategy::Arbitrary)]
    enum Operation {
        ConnectOk,
        ConnectRefused,
        ConnectHanging,
        Adopt,
        Stop,
        PeerHangsUp,
        Write(#[strategy(proptest::collection::vec(any::<u8>(), 0..32))] Vec<u8>),
    }

    #[proptest(cases = 30)]
    fn at_most_one_worker_of_each_kind(
        #[strategy(proptest::collection::vec(any::<Operation>(), 1..24))] operations: Vec<
            Operation,
        >,
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async move {
            let mut s = setup(LinkConfig::default());
            let mut adopted_far_ends = vec![];

            for (i, operation) in operations.into_iter().enumerate() {
                let peer = |kind: &str| PeerId::new(format!("{kind}:{i}"));
                let result = match operation {
                    Operation::ConnectOk => s.handle.connect(PeerId::new(format!("{i}"))).await,
                    Operation::ConnectRefused => s.handle.connect(peer("refuse")).await,
                    Operation::ConnectHanging => s.handle.connect(peer("hang")).await,
                    Operation::Adopt => {
                        let (near, far) = tokio::io::duplex(64);
                        adopted_far_ends.push(far);
                        s.handle.adopt(Connection::new(peer("inbound"), near)).await
                    }
                    Operation::Stop => s.handle.stop().await,
                    Operation::PeerHangsUp => {
                        adopted_far_ends.clear();
                        s.adapter.drop_far_ends();
                        Ok(())
                    }
                    Operation::Write(bytes) => s.handle.write(bytes).await,
                };
                result.unwrap();

                let state = s.handle.get_state().await.unwrap();
                let counts = s.handle.live_workers();
                assert!(counts.connect <= 1, "{counts:?} after step {i}");
                assert!(counts.pump <= 1, "{counts:?} after step {i}");
                if state == ConnectionState::None {
                    assert_eq!(0, counts.connect, "connect task running in state None");
                }
                // keep the record channel from filling up
                while s.record_rx.try_recv().is_ok() {}
            }

            s.handle.stop().await.unwrap();
            assert_eq!(ConnectionState::None, s.handle.get_state().await.unwrap());
            assert_eq!(WorkerCounts::default(), s.handle.live_workers());
        });
    }
}
