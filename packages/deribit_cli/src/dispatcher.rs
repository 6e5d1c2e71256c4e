//! Command dispatcher: executes parsed commands against an [`Endpoint`].
//!
//! The dispatcher never prints. Results come back as a [`Reply`] and stream
//! events go to a [`Console`], so the same code runs under the terminal and
//! under tests.

use std::sync::Arc;
use tracing::{debug, info, warn};
use ws_endpoint::{Connection, ConnectionId, ConnectionStatus, Endpoint, EndpointError, WaitOutcome};

use crate::api::RequestBuilder;
use crate::cancel::CancelSignal;
use crate::command::Command;
use crate::config::ClientConfig;
use crate::error::CommandError;
use crate::stream::{self, StreamEvent, StreamExit};

/// Where streaming output goes, and where its cancellation comes from
pub trait Console {
    /// Called once a subscription was sent, before the first wait
    fn stream_started(&mut self, id: ConnectionId) -> Box<dyn CancelSignal>;
    fn stream_event(&mut self, id: ConnectionId, event: StreamEvent);
}

/// Outcome of one command, for presentation
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Exit,
    Help,
    Connected {
        id: ConnectionId,
        status: ConnectionStatus,
        testnet: bool,
    },
    Summary(String),
    History {
        id: ConnectionId,
        messages: Vec<String>,
    },
    /// Messages that arrived in answer to a request
    Responses {
        id: ConnectionId,
        messages: Vec<String>,
    },
    /// The connection went terminal while a request waited
    ConnectionEnded {
        id: ConnectionId,
        status: ConnectionStatus,
    },
    TimedOut {
        id: ConnectionId,
    },
    CloseRequested {
        id: ConnectionId,
        code: u16,
    },
    StreamStopped {
        id: ConnectionId,
        exit: StreamExit,
    },
}

pub struct Dispatcher<B> {
    endpoint: Endpoint,
    builder: B,
    config: ClientConfig,
}

impl<B: RequestBuilder> Dispatcher<B> {
    pub fn new(endpoint: Endpoint, builder: B, config: ClientConfig) -> Self {
        Self {
            endpoint,
            builder,
            config,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn execute(
        &mut self,
        command: Command,
        console: &mut dyn Console,
    ) -> Result<Reply, CommandError> {
        debug!("Executing {:?}", command);
        match command {
            Command::Quit => Ok(Reply::Exit),
            Command::Help => Ok(Reply::Help),
            Command::Connect { address } => self.connect(&address, false),
            Command::DeribitConnect => {
                let address = self.config.testnet_url.clone();
                self.connect(&address, true)
            }
            Command::Show { id } => Ok(Reply::Summary(self.record(id)?.to_string())),
            Command::ShowMessages { id } => Ok(Reply::History {
                id,
                messages: self.record(id)?.messages(),
            }),
            Command::Send { id, message } => {
                let record = self.record(id)?;
                self.request(&record, &message)
            }
            Command::Close { id, code, reason } => {
                self.endpoint.close(id, code, &reason)?;
                Ok(Reply::CloseRequested { id, code })
            }
            Command::Deribit { id, text } => {
                let record = self.record(id)?;
                let request = self
                    .builder
                    .build_request(&text)
                    .ok_or_else(|| CommandError::UnsupportedRequest(text.clone()))?;
                if request.streaming {
                    self.stream(&record, &request.payload, console)
                } else {
                    self.request(&record, &request.payload)
                }
            }
        }
    }

    fn record(&self, id: ConnectionId) -> Result<Arc<Connection>, EndpointError> {
        self.endpoint
            .get_record(id)
            .ok_or(EndpointError::UnknownHandle(id))
    }

    fn connect(&self, address: &str, testnet: bool) -> Result<Reply, CommandError> {
        let id = self.endpoint.connect(address)?;
        let status = self.record(id)?.status();
        Ok(Reply::Connected {
            id,
            status,
            testnet,
        })
    }

    /// Send one payload and wait for whatever answers it.
    fn request(&self, record: &Connection, payload: &str) -> Result<Reply, CommandError> {
        let id = record.id();
        let _slot = record.begin_request()?;

        // Anything already queued is old traffic, not this request's answer.
        let start = record.snapshot_and_clear();
        self.endpoint.send(id, payload)?;

        match record.wait_for_message(self.config.response_timeout) {
            WaitOutcome::Ready => {
                record.clear_processed();
                Ok(Reply::Responses {
                    id,
                    messages: record.messages_since(start),
                })
            }
            WaitOutcome::Closed(status) => {
                warn!("Connection {} ended while waiting: {}", id, status);
                Ok(Reply::ConnectionEnded { id, status })
            }
            WaitOutcome::TimedOut => Ok(Reply::TimedOut { id }),
        }
    }

    /// Send a subscription and stay in streaming mode until cancelled.
    fn stream(
        &self,
        record: &Connection,
        payload: &str,
        console: &mut dyn Console,
    ) -> Result<Reply, CommandError> {
        let id = record.id();
        let _slot = record.begin_request()?;

        let stale = record.take_messages();
        if !stale.is_empty() {
            debug!("Connection {} discarded {} queued messages", id, stale.len());
        }
        self.endpoint.send(id, payload)?;

        let cancel = console.stream_started(id);
        let exit = stream::consume(record, cancel.as_ref(), self.config.poll_interval, |event| {
            console.stream_event(id, event)
        });
        info!("Connection {} left streaming mode", id);
        Ok(Reply::StreamStopped { id, exit })
    }
}
