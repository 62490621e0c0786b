//! Watcher contract: one file descriptor, three callbacks.
//!
//! Lifecycle:
//! ```text
//! new (fd open) --add_watcher--> registered --Close / remove_watcher--> dropped (fd closed)
//! ```
//! The reactor owns registered watchers, so a watcher can only ever sit in
//! one reactor, and it is always deregistered before it is dropped.

use std::fmt;
use std::os::unix::io::RawFd;

use crate::error::Result;

use super::reactor::Context;

/// Handle of a registered watcher. Ids are never reused by a reactor, so a
/// stale id simply refers to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(pub(crate) usize);

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// State transitions reported by one readiness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// What the reactor does with a watcher once its callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Stay registered.
    Continue,
    /// Stay registered and get `on_deferred` after every readiness callback
    /// of this iteration. Ignored when returned from `on_deferred` itself.
    Defer,
    /// Finished: deregister, then drop (which closes the fd).
    Close,
}

/// Per-fd event handler driven by a [`Reactor`](super::Reactor).
///
/// Notifications are edge-triggered: a callback only fires on a state
/// transition, so `on_event` must drain the fd until the syscall reports
/// would-block, and must never block.
pub trait Watcher {
    /// Descriptor to watch. Must stay open while the watcher is registered.
    fn fd(&self) -> RawFd;

    /// Readiness changed.
    fn on_event(&mut self, cx: &mut Context<'_>, readiness: Readiness) -> Result<Outcome>;

    /// Second pass after all readiness callbacks of the iteration; the place
    /// to add or remove other watchers.
    fn on_deferred(&mut self, _cx: &mut Context<'_>) -> Result<Outcome> {
        Ok(Outcome::Continue)
    }

    /// A timer armed for this watcher expired. Called once per timer.
    fn on_timeout(&mut self, _cx: &mut Context<'_>) -> Result<Outcome> {
        Ok(Outcome::Continue)
    }
}
