//! Listening-socket watcher that spawns one connection watcher per client.

use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};

use mio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::config::{Mode, ServerConfig};
use crate::error::Result;

use super::connection::{EchoConnection, HttpConnection};
use super::reactor::Context;
use super::socket::accept;
use super::watcher::{Outcome, Readiness, Watcher};

/// Accepted sockets held between the readiness pass and the deferred pass.
const MAX_PENDING: usize = 128;

/// Per-connection settings handed to every spawned watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub mode: Mode,
    pub buffer_size: usize,
    /// Silence after which a connection is closed. `0` disables the timer.
    pub idle_timeout_ms: u64,
}

impl From<&ServerConfig> for ConnectionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            mode: config.mode,
            buffer_size: config.buffer_size,
            idle_timeout_ms: config.idle_timeout_ms,
        }
    }
}

/// Drains the accept queue on readiness and registers the new connections
/// from `on_deferred`, outside the event batch.
pub struct Acceptor {
    listener: TcpListener,
    settings: ConnectionSettings,
    pending: Vec<(TcpStream, SocketAddr)>,
    /// The last drain stopped at `MAX_PENDING`, not at would-block.
    saturated: bool,
    accepted: u64,
}

impl Acceptor {
    pub fn new(listener: TcpListener, settings: ConnectionSettings) -> Self {
        Self {
            listener,
            settings,
            pending: Vec::with_capacity(MAX_PENDING),
            saturated: false,
            accepted: 0,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    fn drain(&mut self) -> Result<()> {
        self.saturated = false;

        while self.pending.len() < MAX_PENDING {
            match accept(&self.listener) {
                Ok(Some(pair)) => self.pending.push(pair),
                Ok(None) => return Ok(()),
                // the client gave up while queued
                Err(e) if e.is_peer_disconnect() => continue,
                Err(e) => return Err(e),
            }
        }
        self.saturated = true;
        Ok(())
    }

    fn spawn(&mut self, cx: &mut Context<'_>) -> Result<()> {
        let settings = self.settings;

        for (stream, peer) in self.pending.drain(..) {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer, error = %e, "TCP_NODELAY not set");
            }
            let watcher: Box<dyn Watcher> = match settings.mode {
                Mode::Http => Box::new(HttpConnection::new(
                    stream,
                    peer,
                    settings.buffer_size,
                    settings.idle_timeout_ms,
                )),
                Mode::Echo => Box::new(EchoConnection::new(
                    stream,
                    peer,
                    settings.buffer_size,
                    settings.idle_timeout_ms,
                )),
            };
            let id = cx.add_watcher(watcher)?;
            if settings.idle_timeout_ms > 0 {
                cx.add_timer(id, settings.idle_timeout_ms);
            }

            self.accepted += 1;
            info!(%peer, %id, total = self.accepted, "connection accepted");
        }
        Ok(())
    }
}

impl Watcher for Acceptor {
    fn fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    fn on_event(&mut self, _cx: &mut Context<'_>, readiness: Readiness) -> Result<Outcome> {
        if !readiness.readable {
            return Ok(Outcome::Continue);
        }

        self.drain()?;
        if self.pending.is_empty() {
            return Ok(Outcome::Continue);
        }
        debug!(pending = self.pending.len(), "accept queue drained");
        Ok(Outcome::Defer)
    }

    fn on_deferred(&mut self, cx: &mut Context<'_>) -> Result<Outcome> {
        self.spawn(cx)?;

        // No new edge arrives for connections left in the kernel queue.
        while self.saturated {
            self.drain()?;
            self.spawn(cx)?;
        }
        Ok(Outcome::Continue)
    }
}
