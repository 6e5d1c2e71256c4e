//! Terminal presentation of replies, stream events and errors.

use colored::*;
use serde_json::Value;
use tracing::debug;
use ws_endpoint::{ConnectionId, ConnectionStatus};

use crate::api::VERBS;
use crate::cancel::{CancelSignal, StdinCancelWatcher};
use crate::dispatcher::{Console, Reply};
use crate::error::CommandError;
use crate::stream::{StreamEvent, StreamExit};

pub const PROMPT: &str = "deribit> ";

const COMMANDS: &[(&str, &str)] = &[
    ("connect <uri>", "open a WebSocket connection"),
    ("show <id>", "connection summary"),
    ("show_messages <id>", "every message received on a connection"),
    ("send <id> <message>", "send raw text and wait for the answer"),
    ("close <id> [code] [reason]", "close a connection (code 1000 by default)"),
    ("Deribit connect", "connect to the Deribit testnet"),
    ("Deribit <id> <request>", "send a Deribit API request (see below)"),
    ("help | man", "this text"),
    ("quit | exit", "close every connection and leave"),
];

pub fn prompt() -> String {
    if cfg!(windows) {
        PROMPT.to_string()
    } else {
        PROMPT.bright_blue().bold().to_string()
    }
}

pub fn print_header() {
    println!(
        "{} {}",
        "Deribit".bright_blue().bold(),
        "WebSocket terminal".dimmed()
    );
    println!("{}", "Type 'help' for commands, 'quit' to leave.".dimmed());
    println!();
}

pub fn help_text() -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", "Commands:".bold()));
    for (usage, what) in COMMANDS {
        out.push_str(&format!("  {:<30} {}\n", usage.cyan(), what));
    }
    out.push_str(&format!("\n{}\n", "Deribit requests (Deribit <id> ...):".bold()));
    for (usage, what) in VERBS {
        out.push_str(&format!("  {:<38} {}\n", usage.cyan(), what));
    }
    out
}

/// Pretty-print JSON payloads, leave anything else untouched
pub fn pretty(raw: &str) -> String {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| raw.to_string())
}

fn status_label(status: &ConnectionStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        ConnectionStatus::Open => label.green(),
        ConnectionStatus::Connecting => label.yellow(),
        ConnectionStatus::Failed { .. } => label.red(),
        ConnectionStatus::Closed { .. } => label.dimmed(),
    }
}

pub fn print_reply(reply: &Reply) {
    match reply {
        Reply::Exit => {}
        Reply::Help => print!("{}", help_text()),
        Reply::Connected {
            id,
            status,
            testnet,
        } => {
            let target = if *testnet { " to Deribit TESTNET" } else { "" };
            println!("{}", format!("> Successfully created connection{target}.").green());
            println!("> Connection ID: {}", id.to_string().bold());
            println!("> Status: {}", status_label(status));
        }
        Reply::Summary(summary) => println!("{summary}"),
        Reply::History { id, messages } => {
            if messages.is_empty() {
                println!("{}", format!("> No messages on connection {id}").dimmed());
            }
            for (i, message) in messages.iter().enumerate() {
                println!("{} {}", format!("[{i}]").dimmed(), message);
            }
        }
        Reply::Responses { id, messages } => {
            for message in messages {
                println!("{} {}", format!("[{id}]").dimmed(), pretty(message));
            }
        }
        Reply::ConnectionEnded { id, status } => {
            println!(
                "{}",
                format!("> Connection {id} ended before answering ({status})").red()
            );
        }
        Reply::TimedOut { id } => {
            println!("{}", format!("> No response on connection {id} yet").yellow());
        }
        Reply::CloseRequested { id, code } => {
            println!("> Closing connection {id} (code {code})");
        }
        Reply::StreamStopped { id, exit } => match exit {
            StreamExit::Cancelled => println!("{}", "> Subscription stream stopped.".green()),
            StreamExit::ConnectionEnded(status) => println!(
                "{}",
                format!("> Connection {id} ended, stream stopped ({status})").red()
            ),
        },
    }
}

pub fn print_stream_event(id: ConnectionId, event: &StreamEvent) {
    let stamp = chrono::Local::now().format("%H:%M:%S%.3f").to_string();
    let prefix = format!("{stamp} [{id}]").dimmed();
    match event {
        StreamEvent::Confirmation(_) => {
            println!("{prefix} {}", "Subscription Confirmed:".green().bold());
        }
        StreamEvent::Data { channel, .. } => {
            let channel = channel.as_deref().unwrap_or("-");
            println!("{prefix} {} {}", "Received Data:".cyan().bold(), channel);
        }
        StreamEvent::Unclassified(value) => {
            debug!("Connection {} unclassified message: {}", id, value);
        }
        StreamEvent::ParseFailure { raw, error } => {
            eprintln!(
                "{prefix} {} {}",
                "Error parsing message:".red().bold(),
                error
            );
            eprintln!("{}", raw.dimmed());
        }
    }
    if let Some(body) = event_body(event) {
        println!("{body}");
    }
}

/// The JSON printed under a stream event's heading, if it shows one
fn event_body(event: &StreamEvent) -> Option<String> {
    match event {
        StreamEvent::Confirmation(value) => Some(json_block(value.get("result")?)),
        StreamEvent::Data { data, .. } => Some(json_block(data)),
        StreamEvent::Unclassified(_) | StreamEvent::ParseFailure { .. } => None,
    }
}

fn json_block(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

pub fn print_error(err: &CommandError) {
    match err {
        CommandError::Unrecognized(_) => eprintln!("{}", err.to_string().red()),
        _ => eprintln!("{}", format!("✗ {}", err).red()),
    }
    if let Some(hint) = err.hint() {
        eprintln!("{}", hint.dimmed());
    }
}

/// Console that prints to the terminal and cancels on a `q` line
pub struct TerminalConsole;

impl Console for TerminalConsole {
    fn stream_started(&mut self, id: ConnectionId) -> Box<dyn CancelSignal> {
        println!(
            "{}",
            format!("> Streaming real-time data on connection {id}. Press 'q' to stop.").yellow()
        );
        Box::new(StdinCancelWatcher::spawn())
    }

    fn stream_event(&mut self, id: ConnectionId, event: StreamEvent) {
        print_stream_event(id, &event);
    }
}
