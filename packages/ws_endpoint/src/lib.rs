//! ws_endpoint - multiplexed WebSocket client connections
//!
//! An [`Endpoint`] owns a background run-loop thread and any number of
//! connections, each identified by a [`ConnectionId`] that is never reused.
//! Inbound traffic lands on a shared [`Connection`] record which a foreground
//! thread can block on without polling.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use ws_endpoint::{ConnectionStatus, Endpoint, WaitOutcome};
//!
//! let endpoint = Endpoint::new().unwrap();
//! let id = endpoint.connect("wss://test.deribit.com/ws/api/v2").unwrap();
//! let record = endpoint.get_record(id).unwrap();
//!
//! // Wait for the handshake, then issue a request and wait for the answer
//! while record.status() == ConnectionStatus::Connecting {
//!     std::thread::sleep(Duration::from_millis(50));
//! }
//! let _slot = record.begin_request().unwrap();
//! endpoint.send(id, r#"{"jsonrpc":"2.0","id":1,"method":"public/test"}"#).unwrap();
//! if record.wait_for_message(None) == WaitOutcome::Ready {
//!     for message in record.take_messages() {
//!         println!("{}", message);
//!     }
//! }
//! ```

mod adapter;
mod connection;
mod endpoint;
mod error;

pub use connection::{Connection, ConnectionId, ConnectionStatus, RequestGuard, WaitOutcome};
pub use endpoint::{Endpoint, NORMAL_CLOSURE};
pub use error::EndpointError;
