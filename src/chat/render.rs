/// Terminal rendering of streamed answers.
use std::io::{self, Write};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use super::accumulator::{AnswerAccumulator, AnswerObserver};
use crate::api::models::SourceDocument;

/// Characters of source content shown per document.
const SOURCE_PREVIEW_CHARS: usize = 240;

/// Prints tokens to stdout as they arrive, with a spinner on stderr until
/// the first one shows up.
///
/// Output stops after the first failed write (a closed pipe, for instance).
pub struct TerminalRenderer {
    out: Box<dyn Write + Send>,
    spinner: Option<ProgressBar>,
    printed: bool,
    closed: bool,
}

impl Default for TerminalRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalRenderer {
    #[must_use]
    pub fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message("Thinking…");
        spinner.enable_steady_tick(Duration::from_millis(100));
        Self::with_output(Box::new(io::stdout()), Some(spinner))
    }

    fn with_output(out: Box<dyn Write + Send>, spinner: Option<ProgressBar>) -> Self {
        Self {
            out,
            spinner,
            printed: false,
            closed: false,
        }
    }

    fn clear_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }

    fn write_out(&mut self, text: &str) {
        if self.closed {
            return;
        }
        let result = self
            .out
            .write_all(text.as_bytes())
            .and_then(|()| self.out.flush());
        if let Err(e) = result {
            debug!("Output closed, dropping the rest of the answer: {e}");
            self.closed = true;
        }
    }
}

impl AnswerObserver for TerminalRenderer {
    fn on_token(&mut self, token: &str, _answer: &AnswerAccumulator) {
        self.clear_spinner();
        self.write_out(token);
        self.printed = true;
    }

    fn on_finished(&mut self, _answer: &AnswerAccumulator) {
        self.clear_spinner();
        if self.printed {
            self.write_out("\n");
        }
    }

    fn on_replaced(&mut self, answer: &AnswerAccumulator) {
        self.clear_spinner();
        // Whatever was streamed stays on screen; the full answer follows.
        if self.printed {
            self.write_out("\n");
        }
        let text = format!("{}\n", answer.display_text());
        self.write_out(&text);
        self.printed = true;
    }

    fn on_error(&mut self, message: &str) {
        self.clear_spinner();
        if self.printed {
            self.write_out("\n");
        }
        eprintln!("{message}");
    }
}

impl Drop for TerminalRenderer {
    fn drop(&mut self) {
        self.clear_spinner();
    }
}

/// Human-readable listing of source documents.
#[must_use]
pub fn format_sources(sources: &[SourceDocument]) -> String {
    let mut out = format!("Sources ({}):\n", sources.len());
    for (i, doc) in sources.iter().enumerate() {
        out.push_str(&format!(
            "  #{} - {} (score {:.3})\n",
            i + 1,
            doc.label(),
            doc.score
        ));
        let preview = preview(&doc.content, SOURCE_PREVIEW_CHARS);
        if !preview.is_empty() {
            out.push_str(&format!("     {preview}\n"));
        }
    }
    out
}

/// Single-line preview of `text`, cut to `limit` characters.
fn preview(text: &str, limit: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}…", &flat[..idx]),
        None => flat,
    }
}
