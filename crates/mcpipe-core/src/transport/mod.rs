//! Transport seams for the remote connection.
//!
//! A connection is opened by a [`Connector`] and immediately split into a
//! [`MessageSource`] (read half) and a [`MessageSink`] (write half) so the
//! inbound and outbound relays can each own exactly one end.

#[cfg(feature = "test-utils")]
pub mod memory;

use std::fmt;
use std::future::Future;

use crate::error::{Error, Result};

/// Remote address the supervisor connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint(String);

impl Endpoint {
    /// Validate a `ws://` or `wss://` URL.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::Endpoint("endpoint URL is empty".into()));
        }
        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(Error::Endpoint(format!("'{}' is not a URL", redact(url))));
        };
        if !scheme.eq_ignore_ascii_case("ws") && !scheme.eq_ignore_ascii_case("wss") {
            return Err(Error::Endpoint(format!(
                "unsupported scheme '{scheme}' (expected ws or wss)"
            )));
        }
        if rest.is_empty() || rest.starts_with(['/', '?', '#']) {
            return Err(Error::Endpoint(format!(
                "'{}' has no host",
                redact(url)
            )));
        }
        Ok(Self(url.to_string()))
    }

    /// Full URL, including any access token in the query string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// URL with the query string replaced, safe to log.
    pub fn redacted(&self) -> String {
        redact(&self.0)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

fn redact(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?<redacted>"),
        None => url.to_string(),
    }
}

/// One message received from the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Decode the frame as UTF-8 text. Invalid sequences are replaced.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
            },
        }
    }
}

/// Errors on the remote connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    #[error("Failed to open connection: {0}")]
    Open(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Connection closed")]
    Closed,
}

/// Read half of a remote connection.
pub trait MessageSource: Send + 'static {
    /// Wait for the next message. `Ok(None)` means the peer closed cleanly.
    fn recv(
        &mut self,
    ) -> impl Future<Output = std::result::Result<Option<Frame>, ConnectionError>> + Send;
}

/// Write half of a remote connection.
pub trait MessageSink: Send + 'static {
    /// Send one text message.
    fn send(
        &mut self,
        text: String,
    ) -> impl Future<Output = std::result::Result<(), ConnectionError>> + Send;

    /// Close the connection. Closing twice is not an error.
    fn close(&mut self) -> impl Future<Output = std::result::Result<(), ConnectionError>> + Send;
}

/// Opens connections to an [`Endpoint`].
pub trait Connector: Send + Sync + 'static {
    type Source: MessageSource;
    type Sink: MessageSink;

    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = std::result::Result<(Self::Source, Self::Sink), ConnectionError>> + Send;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ws_and_wss() {
        assert!(Endpoint::parse("ws://localhost:8080/mcp").is_ok());
        assert!(Endpoint::parse("wss://api.example.com/mcp/?token=abc").is_ok());
        assert!(Endpoint::parse("  WSS://example.com  ").is_ok());
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        assert!(Endpoint::parse("").is_err());
        assert!(Endpoint::parse("https://example.com").is_err());
        assert!(Endpoint::parse("example.com").is_err());
        assert!(Endpoint::parse("ws://").is_err());
        assert!(Endpoint::parse("ws://?token=1").is_err());
    }

    #[test]
    fn display_hides_token() {
        let endpoint = Endpoint::parse("wss://api.example.com/mcp/?token=secret").unwrap();
        assert_eq!(endpoint.to_string(), "wss://api.example.com/mcp/?<redacted>");
        assert!(endpoint.as_str().contains("secret"));
    }

    #[test]
    fn binary_frames_decode_as_utf8() {
        let frame = Frame::Binary("héllo".as_bytes().to_vec());
        assert_eq!(frame.into_text(), "héllo");
        let broken = Frame::Binary(vec![b'a', 0xff, b'b']);
        assert_eq!(broken.into_text(), "a\u{fffd}b");
    }
}
