//! Connection watchers: a one-shot HTTP responder and an echo loop.
//!
//! Both own their socket and buffers, so dropping the watcher closes the
//! connection. Errors stay local: they are logged and the connection is
//! closed, never surfaced to the reactor.

use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Instant;

use mio::net::TcpStream;
use tracing::{debug, info, info_span, trace, warn, Span};

use crate::core::{Arena, Buffer, Writer};
use crate::error::Result;
use crate::protocol::{
    add_header, header_completed, parse_request, start_response, write_eoh, StatusCode, Version,
};

use super::reactor::Context;
use super::socket::{recv, send};
use super::watcher::{Outcome, Readiness, Watcher};

const RESPONSE_CAPACITY: usize = 256;

const OK_BODY: &[u8] = b"Hello from edgeio\n";
const BAD_REQUEST_BODY: &[u8] = b"Bad Request\n";
const TOO_LARGE_BODY: &[u8] = b"Request Header Fields Too Large\n";
const TIMEOUT_BODY: &[u8] = b"Request Timeout\n";

/// Connection-local failures end the connection, never the loop.
fn contain(span: &Span, result: Result<Outcome>) -> Result<Outcome> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) if e.is_peer_disconnect() => {
            span.in_scope(|| debug!(error = %e, "peer disconnected"));
            Ok(Outcome::Close)
        }
        Err(e) => {
            span.in_scope(|| warn!(error = %e, "connection failed"));
            Ok(Outcome::Close)
        }
    }
}

/// Writes a complete head plus `body`, or nothing if it does not fit.
/// Returns the bytes needed either way.
fn render_response(
    writer: &mut Writer<'_>,
    status: StatusCode,
    reason: &str,
    version: Version,
    body: &[u8],
) -> usize {
    let length = body.len().to_string();
    let start = writer.len();

    let head = start_response(writer, status, reason, version)
        + add_header(writer, "Content-Type", "text/plain")
        + add_header(writer, "Content-Length", &length)
        + add_header(writer, "Connection", "close")
        + write_eoh(writer);

    if writer.len() - start != head || writer.space() < body.len() {
        writer.clear();
        return head + body.len();
    }
    writer.write_bytes(body);
    head + body.len()
}

/// Tracks the last transfer so the idle timer measures silence, not age.
#[derive(Debug, Clone, Copy)]
struct Idle {
    timeout_ms: u64,
    last_activity: Instant,
}

impl Idle {
    fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            last_activity: Instant::now(),
        }
    }

    #[inline(always)]
    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Milliseconds left before the connection counts as idle, or `None`
    /// once it has been silent for the whole timeout.
    fn remaining_ms(&self) -> Option<u64> {
        let silent = self.last_activity.elapsed().as_millis() as u64;
        (silent < self.timeout_ms).then(|| self.timeout_ms - silent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Reading,
    Writing,
}

/// Reads one request head, answers it and closes.
pub struct HttpConnection {
    stream: TcpStream,
    span: Span,
    state: State,
    input: Buffer,
    received: usize,
    output: Buffer,
    response_len: usize,
    sent: usize,
    arena: Arena,
    idle: Idle,
}

impl HttpConnection {
    /// `buffer_size` caps the request head; larger heads get a 431.
    /// `idle_timeout_ms` is the silence after which a pending head gets a 408.
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        buffer_size: usize,
        idle_timeout_ms: u64,
    ) -> Self {
        Self {
            stream,
            span: info_span!("conn", %peer),
            state: State::Reading,
            input: Buffer::new(buffer_size),
            received: 0,
            output: Buffer::new(RESPONSE_CAPACITY),
            response_len: 0,
            sent: 0,
            arena: Arena::new(),
            idle: Idle::new(idle_timeout_ms),
        }
    }

    fn pump(&mut self) -> Result<Outcome> {
        if self.state == State::Reading {
            let mut writer = self.input.writer_at(self.received);
            let transfer = recv(&mut self.stream, &mut writer)?;
            self.received += transfer.bytes;
            if transfer.bytes > 0 {
                self.idle.touch();
            }
            trace!(bytes = transfer.bytes, total = self.received, "received");

            let head_len = header_completed(&self.input.view_range(0, self.received));
            if head_len > 0 {
                self.handle_request(head_len);
            } else if self.received == self.input.size() {
                debug!(size = self.received, "request head exceeds buffer");
                self.prepare(
                    StatusCode::HEADER_FIELDS_TOO_LARGE,
                    "Request Header Fields Too Large",
                    Version::Http11,
                    TOO_LARGE_BODY,
                );
            } else if transfer.closed {
                debug!("peer closed before completing the request head");
                return Ok(Outcome::Close);
            } else {
                return Ok(Outcome::Continue);
            }
        }

        self.flush()
    }

    fn handle_request(&mut self, head_len: usize) {
        let head = self.input.view_range(0, head_len);

        let (status, reason, version, body) = match parse_request(head, &self.arena) {
            Ok(request) => {
                info!(
                    method = request.method.as_str().unwrap_or("?"),
                    target = request.target.as_str().unwrap_or("?"),
                    headers = request.headers.len(),
                    "request"
                );
                (StatusCode::OK, "OK", request.version, OK_BODY)
            }
            Err(e) => {
                debug!(error = %e, "bad request");
                (StatusCode::BAD_REQUEST, "Bad Request", Version::Http11, BAD_REQUEST_BODY)
            }
        };

        self.prepare(status, reason, version, body);
    }

    /// Renders into `output`, growing it until the response fits.
    fn prepare(&mut self, status: StatusCode, reason: &str, version: Version, body: &[u8]) {
        self.response_len = loop {
            let mut writer = self.output.writer();
            let needed = render_response(&mut writer, status, reason, version, body);
            if writer.len() == needed {
                break needed;
            }
            let size = needed.max(self.output.size() * 2);
            self.output.resize(size);
        };
        self.sent = 0;
        self.state = State::Writing;
    }

    fn flush(&mut self) -> Result<Outcome> {
        let mut view = self.output.view_range(self.sent, self.response_len);
        let bytes = send(&mut self.stream, &mut view)?;
        if bytes > 0 {
            self.idle.touch();
        }
        self.sent += bytes;

        if self.sent < self.response_len {
            // wait for the next writable edge
            return Ok(Outcome::Continue);
        }
        debug!(bytes = self.sent, "response sent");
        Ok(Outcome::Close)
    }
}

impl Watcher for HttpConnection {
    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn on_event(&mut self, _cx: &mut Context<'_>, readiness: Readiness) -> Result<Outcome> {
        let span = self.span.clone();
        let _enter = span.enter();

        let wants = match self.state {
            State::Reading => readiness.readable,
            State::Writing => readiness.writable,
        };
        if !wants {
            return Ok(Outcome::Continue);
        }
        let result = self.pump();
        contain(&span, result)
    }

    fn on_timeout(&mut self, cx: &mut Context<'_>) -> Result<Outcome> {
        let span = self.span.clone();
        let _enter = span.enter();

        if let Some(remaining) = self.idle.remaining_ms() {
            trace!(remaining, "still active, timer re-armed");
            cx.arm_timer(remaining);
            return Ok(Outcome::Continue);
        }

        if self.state == State::Writing {
            debug!("idle timeout while sending");
            return Ok(Outcome::Close);
        }

        debug!(received = self.received, "idle timeout");
        self.prepare(
            StatusCode::REQUEST_TIMEOUT,
            "Request Timeout",
            Version::Http11,
            TIMEOUT_BODY,
        );
        // best effort; the connection closes either way
        if let Err(e) = self.flush() {
            debug!(error = %e, "timeout response not sent");
        }
        Ok(Outcome::Close)
    }
}

/// Writes back whatever it reads until the peer closes.
pub struct EchoConnection {
    stream: TcpStream,
    span: Span,
    buffer: Buffer,
    filled: usize,
    flushed: usize,
    peer_closed: bool,
    idle: Idle,
}

impl EchoConnection {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        buffer_size: usize,
        idle_timeout_ms: u64,
    ) -> Self {
        Self {
            stream,
            span: info_span!("conn", %peer),
            buffer: Buffer::new(buffer_size),
            filled: 0,
            flushed: 0,
            peer_closed: false,
            idle: Idle::new(idle_timeout_ms),
        }
    }

    fn pump(&mut self) -> Result<Outcome> {
        loop {
            if self.flushed < self.filled {
                let mut view = self.buffer.view_range(self.flushed, self.filled);
                self.flushed += send(&mut self.stream, &mut view)?;
                if self.flushed < self.filled {
                    return Ok(Outcome::Continue);
                }
            }
            self.filled = 0;
            self.flushed = 0;

            if self.peer_closed {
                debug!("peer closed");
                return Ok(Outcome::Close);
            }

            let mut writer = self.buffer.writer();
            let transfer = recv(&mut self.stream, &mut writer)?;
            self.filled = transfer.bytes;
            self.peer_closed = transfer.closed;
            if transfer.bytes > 0 {
                self.idle.touch();
            }
            trace!(bytes = transfer.bytes, "echo");

            if self.filled == 0 && !self.peer_closed {
                return Ok(Outcome::Continue);
            }
        }
    }
}

impl Watcher for EchoConnection {
    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn on_event(&mut self, _cx: &mut Context<'_>, _readiness: Readiness) -> Result<Outcome> {
        let span = self.span.clone();
        let _enter = span.enter();

        let result = self.pump();
        contain(&span, result)
    }

    fn on_timeout(&mut self, cx: &mut Context<'_>) -> Result<Outcome> {
        let _enter = self.span.enter();

        if let Some(remaining) = self.idle.remaining_ms() {
            trace!(remaining, "still active, timer re-armed");
            cx.arm_timer(remaining);
            return Ok(Outcome::Continue);
        }
        debug!("idle timeout");
        Ok(Outcome::Close)
    }
}
