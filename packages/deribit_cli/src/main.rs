use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use ws_endpoint::Endpoint;

use deribit_cli::config::{self, CliPaths, ClientConfig, FileConfig};
use deribit_cli::render::{self, TerminalConsole};
use deribit_cli::repl::LineEditor;
use deribit_cli::{DeribitApi, Dispatcher, Reply, command, logging};

#[derive(Parser)]
#[command(name = "deribit")]
#[command(about = "Interactive WebSocket terminal for the Deribit API")]
struct Cli {
    /// Custom data directory (defaults to ~/.deribit-cli)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging (also echoed to stderr)
    #[arg(short, long)]
    debug: bool,

    /// Open a connection before the prompt appears (repeatable)
    #[arg(long = "connect", value_name = "URI")]
    connect: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = CliPaths::new(cli.data_dir)?;
    logging::init(&paths.log_path(), cli.debug)?;
    info!("Data directory: {}", paths.data_dir.display());

    let file_config: FileConfig = config::load_config(&paths.data_dir)
        .extract()
        .with_context(|| format!("Invalid configuration in {:?}", paths.config_toml_path()))?;
    let config = ClientConfig::from_file(&file_config);
    info!("Starting deribit terminal ({:?})", config);

    let endpoint = Endpoint::new().context("Failed to start connection endpoint")?;
    let mut dispatcher = Dispatcher::new(endpoint, DeribitApi::new(), config.clone());
    let mut editor = LineEditor::new(paths.history_path(), config.history_size)?;
    let mut console = TerminalConsole;

    render::print_header();
    for uri in &cli.connect {
        run_line(&mut dispatcher, &mut console, &format!("connect {uri}"));
    }

    let prompt = render::prompt();
    while let Some(line) = editor.read_line(&prompt)? {
        if !run_line(&mut dispatcher, &mut console, &line) {
            break;
        }
    }

    if let Err(e) = editor.save_history() {
        warn!("{:#}", e);
    }
    info!("Session ended");
    // Dropping the dispatcher closes every connection with 1001.
    drop(dispatcher);
    Ok(())
}

/// Execute one line. Returns false when the session should end.
fn run_line(
    dispatcher: &mut Dispatcher<DeribitApi>,
    console: &mut TerminalConsole,
    line: &str,
) -> bool {
    let result = command::parse(line).and_then(|cmd| dispatcher.execute(cmd, console));
    match result {
        Ok(Reply::Exit) => false,
        Ok(reply) => {
            render::print_reply(&reply);
            true
        }
        Err(e) => {
            warn!("Command '{}' failed: {}", line, e.error_code());
            render::print_error(&e);
            true
        }
    }
}
