//! Relay module: the three byte/line pumps of a session.
//!
//! Data flow:
//! ```text
//! remote message → inbound    → child stdin   (one line per message, flushed)
//! child stdout   → outbound   → remote message (one message per line)
//! child stderr   → diagnostic → local sink     (never forwarded)
//! ```
//!
//! Every relay runs on its own task and owns exactly one stream end. A relay
//! returns `Ok(())` only when cancelled; any other exit is a [`RelayError`]
//! that triggers session teardown.

mod diagnostic;
mod inbound;
mod outbound;
mod types;

pub use diagnostic::{DiagnosticSink, StderrSink, TracingSink, run_diagnostic};
pub use inbound::run_inbound;
pub use outbound::run_outbound;
pub use types::*;

/// Maximum number of characters of a payload shown in debug logs.
const PREVIEW_CHARS: usize = 120;

/// Truncate a payload for logging on a character boundary.
fn preview(text: &str) -> &str {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Decode one raw line, dropping its `\n` or `\r\n` terminator.
fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}
