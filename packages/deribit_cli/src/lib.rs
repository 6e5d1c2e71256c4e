//! deribit_cli - interactive terminal for WebSocket JSON-RPC services
//!
//! Parses operator commands, executes them against a [`ws_endpoint::Endpoint`]
//! and streams subscription pushes until the operator cancels.

pub mod api;
pub mod cancel;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod render;
pub mod repl;
pub mod stream;

pub use api::{BuiltRequest, DeribitApi, RequestBuilder};
pub use command::Command;
pub use dispatcher::{Console, Dispatcher, Reply};
pub use error::CommandError;
pub use stream::{StreamEvent, StreamExit};
