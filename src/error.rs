//! Error types shared by the reactor, socket helpers and the HTTP codec.

use std::io;

use thiserror::Error;

/// Why a header block could not be parsed.
///
/// Every variant is a malformed request/response condition: it is local to
/// one connection and is answered with an error response, never propagated
/// into the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The view ends before the header block does.
    #[error("header block is incomplete")]
    Incomplete,

    /// Method is empty or not terminated by a single SP.
    #[error("invalid request method")]
    InvalidMethod,

    /// Request target is empty, contains control bytes or is not terminated by SP.
    #[error("invalid request target")]
    InvalidTarget,

    /// Anything other than `HTTP/1.0` or `HTTP/1.1`.
    #[error("unsupported HTTP version")]
    UnsupportedVersion,

    /// A header line does not match `token ":" OWS value OWS CRLF`.
    #[error("malformed header field")]
    MalformedHeader,

    /// Header value is empty once surrounding whitespace is removed.
    #[error("empty header value")]
    EmptyHeaderValue,

    /// Status line is not `HTTP-version SP 3DIGIT SP reason CRLF`.
    #[error("malformed status line")]
    MalformedStatusLine,
}

/// Crate-wide error.
#[derive(Debug, Error)]
pub enum Error {
    /// A syscall failed with something other than would-block/interrupted.
    #[error("os error: {0}")]
    Os(#[from] io::Error),

    /// Malformed HTTP message.
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// Host/service could not be turned into a socket address.
    #[error("cannot resolve {host}:{service}: {source}")]
    Resolve {
        host: String,
        service: String,
        #[source]
        source: io::Error,
    },

    /// Status codes are serialized as exactly three digits.
    #[error("status code {0} does not fit in three digits")]
    InvalidStatusCode(u16),

    /// Bad command line.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when the underlying OS error is a peer reset/abort rather than a
    /// failure of this process.
    pub fn is_peer_disconnect(&self) -> bool {
        match self {
            Error::Os(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
