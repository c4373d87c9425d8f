//! Line-oriented progress output.

use std::fmt::Display;
use std::io::{self, Write};

use dtwin_client::TwinsError;

/// Progress sink for the workflow: one line per event, standard output in
/// the binary, a buffer in tests.
pub struct Console<W: Write> {
    out: W,
}

impl Console<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Console<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Write one line. A broken output stream is logged, never fatal.
    pub fn line(&mut self, line: impl Display) {
        if let Err(e) = writeln!(self.out, "{line}") {
            tracing::warn!(error = %e, "Failed to write progress line");
        }
    }

    pub fn blank(&mut self) {
        self.line("");
    }

    /// Print a failed remote call as `{context} error: {status}: {message}`.
    pub fn failure(&mut self, context: &str, err: &TwinsError) {
        self.line(format_args!(
            "{context} error: {}: {}",
            err.status(),
            err.message()
        ));
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
