use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default directives when `RUST_LOG` is unset
pub fn default_directives(debug: bool) -> &'static str {
    if debug {
        "deribit_cli=debug,ws_endpoint=debug,info"
    } else {
        "deribit_cli=info,ws_endpoint=info,warn"
    }
}

/// Send log records to `log_path` (stdout belongs to the session), plus stderr with `debug`.
pub fn init(log_path: &Path, debug: bool) -> Result<()> {
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open log file: {:?}", log_path))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(debug)));

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(log_file));
    let stderr_layer = debug.then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_widens_the_default_filter() {
        assert!(default_directives(false).contains("deribit_cli=info"));
        assert!(default_directives(true).contains("ws_endpoint=debug"));
        assert!(EnvFilter::try_new(default_directives(true)).is_ok());
        assert!(EnvFilter::try_new(default_directives(false)).is_ok());
    }
}
