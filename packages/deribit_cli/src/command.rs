//! Operator command grammar.
//!
//! ```text
//! connect <uri>                  open a connection, prints its id
//! show <id>                      connection summary
//! show_messages <id>             every message received so far
//! send <id> <message>            raw text request, waits for the answer
//! close <id> [code] [reason...]  graceful close (code defaults to 1000)
//! Deribit connect                connect to the configured testnet URL
//! Deribit <id> <verb> [args...]  build and send an API request
//! help | man                     usage
//! quit | exit                    leave
//! ```

use ws_endpoint::{ConnectionId, NORMAL_CLOSURE};

use crate::error::CommandError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Help,
    Connect { address: String },
    Show { id: ConnectionId },
    ShowMessages { id: ConnectionId },
    Send { id: ConnectionId, message: String },
    Close {
        id: ConnectionId,
        code: u16,
        reason: String,
    },
    DeribitConnect,
    /// `text` is the whole command line, handed to the request builder as-is
    Deribit { id: ConnectionId, text: String },
}

/// Parse one operator line. Nothing is executed here.
pub fn parse(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    let (keyword, rest) = split_word(line);

    match keyword {
        "quit" | "exit" => Ok(Command::Quit),
        "help" | "man" => Ok(Command::Help),
        "connect" => {
            let (address, extra) = split_word(rest);
            if address.is_empty() || !extra.is_empty() {
                return Err(malformed("usage: connect <uri>"));
            }
            Ok(Command::Connect {
                address: address.to_string(),
            })
        }
        "show" => Ok(Command::Show {
            id: single_id(rest, "usage: show <id>")?,
        }),
        "show_messages" => Ok(Command::ShowMessages {
            id: single_id(rest, "usage: show_messages <id>")?,
        }),
        "send" => {
            let (id, message) = split_word(rest);
            let id = parse_id(id, "usage: send <id> <message>")?;
            if message.is_empty() {
                return Err(malformed("usage: send <id> <message>"));
            }
            Ok(Command::Send {
                id,
                message: message.to_string(),
            })
        }
        "close" => {
            let (id, rest) = split_word(rest);
            let id = parse_id(id, "usage: close <id> [code] [reason]")?;
            let (code, reason) = split_word(rest);
            let code = if code.is_empty() {
                NORMAL_CLOSURE
            } else {
                code.parse::<u16>()
                    .map_err(|_| malformed(format!("invalid close code '{code}'")))?
            };
            Ok(Command::Close {
                id,
                code,
                reason: reason.to_string(),
            })
        }
        "Deribit" => {
            let (target, _) = split_word(rest);
            if target == "connect" {
                return Ok(Command::DeribitConnect);
            }
            let id = parse_id(target, "usage: Deribit <id> <request> | Deribit connect")?;
            Ok(Command::Deribit {
                id,
                text: line.to_string(),
            })
        }
        _ => Err(CommandError::Unrecognized(line.to_string())),
    }
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (s, ""),
    }
}

fn parse_id(word: &str, usage: &str) -> Result<ConnectionId, CommandError> {
    if word.is_empty() {
        return Err(malformed(usage));
    }
    word.parse::<u64>()
        .map(ConnectionId)
        .map_err(|_| malformed(format!("invalid connection id '{word}'")))
}

fn single_id(rest: &str, usage: &str) -> Result<ConnectionId, CommandError> {
    let (id, extra) = split_word(rest);
    if !extra.is_empty() {
        return Err(malformed(usage));
    }
    parse_id(id, usage)
}

fn malformed(message: impl Into<String>) -> CommandError {
    CommandError::MalformedCommand(message.into())
}
