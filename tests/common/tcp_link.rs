use std::sync::Arc;
use std::time::Duration;

use sensor_link::config_models::link_config::LinkConfig;
use sensor_link::models::record::Record;
use sensor_link::models::state::StateTransition;
use sensor_link::platform::TcpAdapter;
use sensor_link::state_machine::ConnectionStateMachine;
use sensor_link::state_machine::StateMachineHandle;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A state machine dialing over real TCP sockets.
pub struct TcpLink {
    pub handle: StateMachineHandle,
    pub actor: JoinHandle<()>,
    pub records: mpsc::Receiver<Record>,
    pub transitions: broadcast::Receiver<StateTransition>,
}

impl TcpLink {
    pub fn start(config: LinkConfig) -> Self {
        let (record_tx, records) = mpsc::channel(64);
        let (handle, actor) = ConnectionStateMachine::start(Arc::new(TcpAdapter), config, record_tx);
        let transitions = handle.subscribe();
        Self {
            handle,
            actor,
            records,
            transitions,
        }
    }

    pub async fn next_transition(&mut self) -> StateTransition {
        tokio::time::timeout(Duration::from_secs(5), self.transitions.recv())
            .await
            .expect("state transition within 5s")
            .expect("transition channel open")
    }

    pub async fn next_record(&mut self) -> Record {
        tokio::time::timeout(Duration::from_secs(5), self.records.recv())
            .await
            .expect("record within 5s")
            .expect("record channel open")
    }
}
