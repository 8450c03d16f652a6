use crate::interface_adapters::protocol::WireMessage;
use crate::interface_adapters::state::AppState;
use crate::use_cases::{WorkerCommand, WorkerEvent, worker_task};

use axum::{
    Error,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, Span, debug, info, info_span, warn};

#[derive(Debug)]
enum NetError {
    #[allow(dead_code)]
    Ws(axum::Error),
    #[allow(dead_code)]
    Serialization(serde_json::Error),
    WriterClosed,
    WorkerClosed,
}

enum LoopControl {
    Continue,
    Disconnect,
}

#[derive(Debug, Default)]
struct ConnStats {
    msgs_in: u64,
    msgs_out: u64,
    bytes_in: u64,
    bytes_out: u64,
    rejected: u64,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let conn_id = state.next_conn_id();
    let outbound_capacity = state.outbound_capacity;
    ws.on_upgrade(move |socket| {
        handle_socket(socket, outbound_capacity).instrument(info_span!("conn", conn_id))
    })
}

// One socket drives one simulation worker; closing the socket drops it.
async fn handle_socket(socket: WebSocket, outbound_capacity: usize) {
    let (mut sink, mut stream) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(outbound_capacity);
    let writer = tokio::spawn(
        async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    debug!(error = ?e, "socket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        }
        .instrument(Span::current()),
    );

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let worker = tokio::spawn(worker_task(command_rx, event_tx).instrument(Span::current()));
    info!("client connected");

    let mut stats = ConnStats::default();
    let mut fatal: Option<NetError> = None;

    loop {
        let control = tokio::select! {
            incoming = stream.next() => {
                handle_incoming(incoming, &command_tx, &outbound_tx, &mut stats).await
            }
            event = event_rx.recv() => match event {
                Some(event) => forward_event(event, &outbound_tx, &mut stats).await,
                None => Err(NetError::WorkerClosed),
            },
        };

        match control {
            Ok(LoopControl::Continue) => {}
            Ok(LoopControl::Disconnect) => break,
            Err(e) => {
                fatal = Some(e);
                break;
            }
        }
    }

    drop(command_tx);
    drop(outbound_tx);
    if let Err(e) = worker.await {
        warn!(error = %e, "worker task failed");
    }
    let _ = writer.await;

    info!(
        msgs_in = stats.msgs_in,
        msgs_out = stats.msgs_out,
        bytes_in = stats.bytes_in,
        bytes_out = stats.bytes_out,
        rejected = stats.rejected,
        "client disconnected"
    );
    if let Some(e) = fatal {
        warn!(error = ?e, "connection loop exited with error");
    }
}

async fn handle_incoming(
    incoming: Option<Result<Message, Error>>,
    command_tx: &mpsc::UnboundedSender<WorkerCommand>,
    outbound_tx: &mpsc::Sender<Message>,
    stats: &mut ConnStats,
) -> Result<LoopControl, NetError> {
    let text = match incoming {
        Some(Ok(Message::Text(text))) => text,
        Some(Ok(Message::Close(_))) | None => return Ok(LoopControl::Disconnect),
        Some(Ok(_)) => return Ok(LoopControl::Continue),
        Some(Err(e)) => return Err(NetError::Ws(e)),
    };
    stats.msgs_in += 1;
    stats.bytes_in += text.len() as u64;

    let message = match WireMessage::parse(&text) {
        Ok(message) => message,
        Err(e) => return reject(None, e.to_string(), outbound_tx, stats).await,
    };
    let topic = message.topic.clone();
    match WorkerCommand::try_from(message) {
        Ok(command) => {
            debug!(topic = %topic, "command received");
            command_tx
                .send(command)
                .map_err(|_| NetError::WorkerClosed)?;
            Ok(LoopControl::Continue)
        }
        Err(e) => reject(Some(&topic), e.to_string(), outbound_tx, stats).await,
    }
}

// Decode failures are answered with `ERROR`; the connection stays open.
async fn reject(
    topic: Option<&str>,
    reason: String,
    outbound_tx: &mpsc::Sender<Message>,
    stats: &mut ConnStats,
) -> Result<LoopControl, NetError> {
    stats.rejected += 1;
    warn!(topic = topic.unwrap_or("?"), error = %reason, "rejected message");
    send_wire(WireMessage::error(topic, reason), outbound_tx, stats).await
}

async fn forward_event(
    event: WorkerEvent,
    outbound_tx: &mpsc::Sender<Message>,
    stats: &mut ConnStats,
) -> Result<LoopControl, NetError> {
    let message = WireMessage::try_from(event).map_err(NetError::Serialization)?;
    send_wire(message, outbound_tx, stats).await
}

async fn send_wire(
    message: WireMessage,
    outbound_tx: &mpsc::Sender<Message>,
    stats: &mut ConnStats,
) -> Result<LoopControl, NetError> {
    let text = serde_json::to_string(&message).map_err(NetError::Serialization)?;
    stats.msgs_out += 1;
    stats.bytes_out += text.len() as u64;
    outbound_tx
        .send(Message::Text(text.into()))
        .await
        .map_err(|_| NetError::WriterClosed)?;
    Ok(LoopControl::Continue)
}
