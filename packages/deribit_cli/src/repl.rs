//! Line editor with persistent history.

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::{Config, DefaultEditor, EditMode};
use std::path::PathBuf;
use tracing::{debug, warn};

pub struct LineEditor {
    editor: DefaultEditor,
    history_path: PathBuf,
}

impl LineEditor {
    pub fn new(history_path: PathBuf, max_entries: usize) -> Result<Self> {
        let config = Config::builder()
            .edit_mode(EditMode::Emacs)
            .auto_add_history(false)
            .max_history_size(max_entries)
            .context("Invalid history size")?
            .build();

        let mut editor = DefaultEditor::with_config(config).context("Failed to start line editor")?;
        if history_path.exists() {
            if let Err(e) = editor.load_history(&history_path) {
                warn!("Could not load history from {:?}: {}", history_path, e);
            }
        }

        Ok(Self {
            editor,
            history_path,
        })
    }

    /// Next non-empty line, or `None` at end of input.
    ///
    /// Ctrl-C abandons the current line and prompts again.
    pub fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        loop {
            match self.editor.readline(prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let _ = self.editor.add_history_entry(line);
                    return Ok(Some(line.to_string()));
                }
                Err(ReadlineError::Interrupted) => {
                    debug!("Line abandoned");
                    continue;
                }
                Err(ReadlineError::Eof) => return Ok(None),
                Err(e) => return Err(e).context("Failed to read input"),
            }
        }
    }

    pub fn save_history(&mut self) -> Result<()> {
        self.editor
            .save_history(&self.history_path)
            .with_context(|| format!("Failed to save history to {:?}", self.history_path))
    }
}
