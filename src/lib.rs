//! A single-peer link over a reliable stream socket.
//!
//! A [`ConnectionStateMachine`](state_machine::ConnectionStateMachine) owns at
//! most one outbound connect attempt and at most one data pump, and moves
//! between `None`, `Listening`, `Connecting` and `Connected` as they come and
//! go. Everything it reads is handed out as [`Record`]s; everything written
//! through its handle goes to the connected peer.

pub mod config_models;
pub mod connect_worker;
pub mod errors;
pub mod inbound;
pub mod models;
pub mod platform;
pub mod pump_worker;
pub mod state_machine;
pub mod worker;


use std::sync::Arc;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::io::Stdin;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::codec::LinesCodec;
use tokio_util::codec::LinesCodecError;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing::Instrument;

use crate::config_models::cli_args::Args;
use crate::config_models::cli_args::OutputFormat;
use crate::models::record::Record;
use crate::models::state::ConnectionState;
use crate::platform::TcpAdapter;
use crate::state_machine::ConnectionStateMachine;

const RECORD_CHANNEL_CAPACITY: usize = 256;
const MAX_STDIN_LINE_LENGTH: usize = 64 * 1024;

type StdinLines = FramedRead<Stdin, LinesCodec>;

/// Run the link described by `args` until it ends or ctrl-c is pressed.
///
/// Records are printed to stdout; every line read from stdin is sent to the
/// peer. The link ends the first time the state returns to `None`, i.e. when
/// the peer hangs up, the connect attempt fails or accepting fails.
pub async fn run(args: Args) -> Result<()> {
    let (record_tx, mut record_rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
    let (handle, actor) =
        ConnectionStateMachine::start(Arc::new(TcpAdapter), args.link_config(), record_tx);
    let mut transitions = handle.subscribe();

    match (&args.peer, args.listen) {
        (Some(peer), _) => handle.connect(peer.clone()).await?,
        (None, Some(address)) => {
            let listener = TcpListener::bind(address)
                .await
                .with_context(|| format!("Failed to bind to local TCP address {address}"))?;
            let accepting = handle.clone();
            tokio::spawn(
                async move {
                    if let Err(e) = accept_inbound(listener, &accepting).await {
                        error!("{e:#}");
                    }
                }
                .in_current_span(),
            );
        }
        (None, None) => bail!("either --peer or --listen is required"),
    }

    let mut stdin: Option<StdinLines> = Some(FramedRead::new(
        tokio::io::stdin(),
        LinesCodec::new_with_max_length(MAX_STDIN_LINE_LENGTH),
    ));
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            Some(record) = record_rx.recv() => print_record(&mut stdout, &record, args.output).await?,

            line = next_line(&mut stdin) => match line {
                Some(Ok(line)) => handle.write(format!("{line}\n")).await?,
                Some(Err(e)) => {
                    warn!("stopped reading stdin: {e}");
                    stdin = None;
                }
                None => {
                    debug!("stdin closed; still receiving");
                    stdin = None;
                }
            },

            transition = transitions.recv() => match transition {
                Ok(transition) if transition.to == ConnectionState::None => {
                    info!("link ended ({transition})");
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!("missed {missed} state transitions"),
                Err(RecvError::Closed) => break,
            },

            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; closing link");
                break;
            }
        }
    }

    // records read before the link ended
    while let Ok(record) = record_rx.try_recv() {
        print_record(&mut stdout, &record, args.output).await?;
    }

    handle.shutdown().await?;
    actor.await?;
    Ok(())
}

async fn accept_inbound(
    listener: TcpListener,
    handle: &state_machine::StateMachineHandle,
) -> Result<()> {
    inbound::accept_one(listener, handle)
        .await
        .context("no inbound connection")
}

/// Pending forever once stdin is gone, so the branch just stops firing.
async fn next_line(stdin: &mut Option<StdinLines>) -> Option<Result<String, LinesCodecError>> {
    match stdin {
        Some(lines) => lines.next().await,
        None => std::future::pending().await,
    }
}

async fn print_record(
    stdout: &mut tokio::io::Stdout,
    record: &Record,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Text => stdout.write_all(record.text.as_bytes()).await?,
        OutputFormat::Json => {
            let mut line = serde_json::to_string(record)?;
            line.push('\n');
            stdout.write_all(line.as_bytes()).await?;
        }
    }
    stdout.flush().await?;
    Ok(())
}
