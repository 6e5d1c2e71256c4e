//! Streaming consumer: drains a connection's pushed messages until the
//! operator cancels or the connection ends.

use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};
use ws_endpoint::{Connection, ConnectionStatus, WaitOutcome};

use crate::cancel::CancelSignal;

/// One classified inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Answer to a request (carries a `result`)
    Confirmation(Value),
    /// Subscription push (carries `params.data`)
    Data {
        channel: Option<String>,
        data: Value,
    },
    /// Valid JSON that is neither of the above, e.g. an error reply
    Unclassified(Value),
    /// Not JSON at all; reported and skipped
    ParseFailure { raw: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamExit {
    Cancelled,
    ConnectionEnded(ConnectionStatus),
}

pub fn classify(raw: &str) -> StreamEvent {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            return StreamEvent::ParseFailure {
                raw: raw.to_string(),
                error: e.to_string(),
            };
        }
    };

    if value.get("result").is_some() {
        return StreamEvent::Confirmation(value);
    }
    let Some(params) = value.get("params") else {
        return StreamEvent::Unclassified(value);
    };
    match params.get("data") {
        Some(data) => StreamEvent::Data {
            channel: params
                .get("channel")
                .and_then(Value::as_str)
                .map(str::to_string),
            data: data.clone(),
        },
        None => StreamEvent::Unclassified(value),
    }
}

/// Take everything queued on the record and classify it, in arrival order.
pub fn drain(record: &Connection) -> Vec<StreamEvent> {
    record
        .take_messages()
        .iter()
        .map(|raw| classify(raw))
        .collect()
}

/// Run the stream loop on `record`.
///
/// Each cycle waits up to `poll_interval` for data, checks `cancel`, then hands
/// every drained message to `on_event`. Cancellation wins over pending data, so
/// a cancelled stream exits within one cycle.
pub fn consume(
    record: &Connection,
    cancel: &dyn CancelSignal,
    poll_interval: Duration,
    mut on_event: impl FnMut(StreamEvent),
) -> StreamExit {
    info!("Streaming on connection {}", record.id());
    let mut delivered = 0usize;

    let exit = loop {
        let outcome = record.wait_for_message(Some(poll_interval));
        if cancel.is_cancelled() {
            break StreamExit::Cancelled;
        }
        match outcome {
            WaitOutcome::Ready => {
                let events = drain(record);
                debug!("Connection {} drained {} messages", record.id(), events.len());
                delivered += events.len();
                events.into_iter().for_each(&mut on_event);
            }
            WaitOutcome::Closed(status) => break StreamExit::ConnectionEnded(status),
            WaitOutcome::TimedOut => {}
        }
    };

    info!(
        "Stream on connection {} stopped after {} messages ({:?})",
        record.id(),
        delivered,
        exit
    );
    exit
}
