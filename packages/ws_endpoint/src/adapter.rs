//! Transport side of a connection: one tokio task per handle that owns the
//! WebSocket stream and mirrors every transport event onto the shared record.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::client::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::EndpointError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long to wait for the peer to echo our close frame
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);

/// Close code used when the endpoint itself goes away
pub(crate) const GOING_AWAY: u16 = 1001;

/// Close code recorded when the stream ends without a close frame
const ABNORMAL_CLOSURE: u16 = 1006;

/// What reading one inbound frame did to the connection
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    Continue,
    /// The peer sent a close frame; our echo is queued but not yet written
    PeerClosed,
    Done,
}

/// Requests the foreground hands to a connection task
pub(crate) enum Outgoing {
    Text {
        payload: String,
        respond_to: oneshot::Sender<Result<(), EndpointError>>,
    },
    Close {
        code: u16,
        reason: String,
    },
}

/// Drive one connection from handshake to terminal status.
///
/// Never panics and never returns an error: every failure ends up on the record.
pub(crate) async fn run_connection(
    record: Arc<Connection>,
    request: Request,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
) {
    let id = record.id();
    debug!("Connection {} handshaking with {}", id, record.uri());

    let connect = tokio_tungstenite::connect_async(request);
    tokio::pin!(connect);

    // The handshake races operator commands so a close can abandon a slow connect.
    let (ws_stream, response) = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok(pair) => break pair,
                Err(e) => {
                    warn!("Connection {} failed: {}", id, e);
                    record.mark_failed(e.to_string());
                    return;
                }
            },
            cmd = outgoing.recv() => match cmd {
                Some(Outgoing::Text { respond_to, .. }) => {
                    let _ = respond_to.send(Err(EndpointError::NotConnected {
                        id,
                        status: record.status(),
                    }));
                }
                Some(Outgoing::Close { code, reason }) => {
                    info!("Connection {} closed before handshake completed", id);
                    record.mark_closed(code, reason);
                    return;
                }
                None => {
                    record.mark_closed(GOING_AWAY, "endpoint shut down");
                    return;
                }
            },
        }
    };

    let server = server_header(&response);
    record.mark_open(server);
    info!("Connection {} open to {}", id, record.uri());

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            frame = read.next() => match handle_inbound(&record, frame, None) {
                Inbound::Continue => {}
                Inbound::PeerClosed => {
                    finish_peer_close(&record, &mut write, &mut read).await;
                    break;
                }
                Inbound::Done => break,
            },
            cmd = outgoing.recv() => {
                let (code, reason) = match cmd {
                    Some(Outgoing::Text { payload, respond_to }) => {
                        debug!("Connection {} sending {} bytes", id, payload.len());
                        let result = write
                            .send(Message::Text(payload.into()))
                            .await
                            .map_err(|e| EndpointError::Transport(e.to_string()));
                        if let Err(e) = &result {
                            warn!("Connection {} write failed: {}", id, e);
                        }
                        let _ = respond_to.send(result);
                        continue;
                    }
                    Some(Outgoing::Close { code, reason }) => (code, reason),
                    None => (GOING_AWAY, "endpoint shut down".to_string()),
                };

                info!("Connection {} closing with code {}", id, code);
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.clone().into(),
                };
                if let Err(e) = write.send(Message::Close(Some(frame))).await {
                    debug!("Connection {} close frame not sent: {}", id, e);
                    record.mark_closed(code, reason);
                    break;
                }
                finish_close(&record, &mut read, code, reason).await;
                break;
            }
        }
    }

    // A stream that simply ends still leaves the record terminal.
    record.mark_closed(ABNORMAL_CLOSURE, "connection dropped");
    debug!("Connection {} task exiting", id);
}

/// Apply one inbound frame to the record.
///
/// `requested` is the close we initiated, used when the peer's echo has no payload.
fn handle_inbound(
    record: &Connection,
    frame: Option<Result<Message, tungstenite::Error>>,
    requested: Option<(u16, &str)>,
) -> Inbound {
    let id = record.id();
    match frame {
        Some(Ok(Message::Text(text))) => {
            debug!("Connection {} received {} bytes", id, text.as_str().len());
            record.append_message(text.as_str());
            Inbound::Continue
        }
        Some(Ok(Message::Binary(data))) => {
            debug!("Connection {} received {} binary bytes", id, data.len());
            record.append_message(String::from_utf8_lossy(&data).into_owned());
            Inbound::Continue
        }
        Some(Ok(Message::Close(frame))) => {
            let (code, reason) = match (frame, requested) {
                (Some(frame), _) => (u16::from(frame.code), frame.reason.as_str().to_string()),
                (None, Some((code, reason))) => (code, reason.to_string()),
                (None, None) => (u16::from(CloseCode::Status), String::new()),
            };
            info!("Connection {} closed by peer ({})", id, code);
            record.mark_closed(code, reason);
            Inbound::PeerClosed
        }
        Some(Ok(_)) => Inbound::Continue,
        Some(Err(e)) => {
            warn!("Connection {} transport error: {}", id, e);
            record.mark_failed(e.to_string());
            Inbound::Done
        }
        None => Inbound::Done,
    }
}

/// Keep reading after our close frame until the peer echoes it or we give up.
async fn finish_close(
    record: &Connection,
    read: &mut SplitStream<WsStream>,
    code: u16,
    reason: String,
) {
    let drained = tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
        while handle_inbound(record, read.next().await, Some((code, &reason))) == Inbound::Continue {}
    })
    .await;

    if drained.is_err() {
        debug!("Connection {} close handshake timed out", record.id());
    }
    record.mark_closed(code, reason);
}

/// Answer a close the peer started: write the queued echo, then read until the
/// peer drops the TCP stream.
async fn finish_peer_close(
    record: &Connection,
    write: &mut SplitSink<WsStream, Message>,
    read: &mut SplitStream<WsStream>,
) {
    if let Err(e) = write.flush().await {
        debug!("Connection {} close echo not sent: {}", record.id(), e);
        return;
    }
    let drained = tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
        while let Some(Ok(_)) = read.next().await {}
    })
    .await;
    if drained.is_err() {
        debug!("Connection {} peer kept the socket open after close", record.id());
    }
}

fn server_header(response: &Response) -> Option<String> {
    response
        .headers()
        .get("server")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
