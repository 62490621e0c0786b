//! Single-threaded readiness loop with one-shot timers.
//!
//! Each `run_once` iteration:
//! 1. wait for readiness, bounded by the nearest timer deadline
//! 2. fire every expired timer (`on_timeout`)
//! 3. dispatch readiness (`on_event`)
//! 4. dispatch the watchers that asked for it (`on_deferred`)
//!
//! While a callback runs, its watcher is checked out of the table. The
//! callback gets a [`Context`] that can register, remove and arm timers
//! but cannot re-enter the loop.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

use super::watcher::{Outcome, Readiness, Watcher, WatcherId};

const EVENTS_CAPACITY: usize = 128;

struct Entry {
    fd: RawFd,
    /// `None` while the watcher is inside one of its callbacks.
    watcher: Option<Box<dyn Watcher>>,
}

/// Ordered by deadline, then by arming order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Timer {
    deadline_ms: u64,
    seq: u64,
    id: WatcherId,
}

#[derive(Debug, Clone, Copy)]
enum Callback {
    Event(Readiness),
    Deferred,
    Timeout,
}

/// Edge-triggered event loop owning its watchers.
pub struct Reactor {
    poll: Poll,
    events: Events,
    entries: HashMap<WatcherId, Entry>,
    timers: BinaryHeap<Reverse<Timer>>,
    next_id: usize,
    next_seq: u64,
    epoch: Instant,
    ready: Vec<(WatcherId, Readiness)>,
    deferred: Vec<WatcherId>,
}

impl Reactor {
    pub fn new() -> Result<Self> {
        Self::with_capacity(EVENTS_CAPACITY)
    }

    /// `events` bounds how many readiness events one iteration collects.
    pub fn with_capacity(events: usize) -> Result<Self> {
        let poll = Poll::new()?;
        debug!(capacity = events, "reactor created");

        Ok(Self {
            poll,
            events: Events::with_capacity(events),
            entries: HashMap::new(),
            timers: BinaryHeap::new(),
            next_id: 0,
            next_seq: 0,
            epoch: Instant::now(),
            ready: Vec::with_capacity(events),
            deferred: Vec::new(),
        })
    }

    /// Registers `watcher` for readable and writable transitions.
    ///
    /// On failure the watcher is dropped, closing its fd.
    pub fn add_watcher(&mut self, watcher: Box<dyn Watcher>) -> Result<WatcherId> {
        let fd = watcher.fd();
        let id = WatcherId(self.next_id);

        self.poll.registry().register(
            &mut SourceFd(&fd),
            Token(id.0),
            Interest::READABLE | Interest::WRITABLE,
        )?;
        self.next_id += 1;

        self.entries.insert(
            id,
            Entry {
                fd,
                watcher: Some(watcher),
            },
        );
        debug!(%id, fd, "watcher registered");
        Ok(id)
    }

    /// Deregisters `id` and hands the watcher back.
    ///
    /// Unknown ids are ignored. When `id` is the watcher whose callback is
    /// running, `None` is returned and the watcher is dropped as soon as
    /// that callback returns. Pending timers and deferred calls for `id`
    /// never fire.
    pub fn remove_watcher(&mut self, id: WatcherId) -> Option<Box<dyn Watcher>> {
        let entry = self.entries.remove(&id)?;

        if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&entry.fd)) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(%id, fd = entry.fd, error = %e, "deregister failed");
            }
        }
        debug!(%id, fd = entry.fd, "watcher removed");
        entry.watcher
    }

    /// Arms a one-shot timer that calls `on_timeout` on `id` after
    /// `timeout_ms` milliseconds. Several timers may be armed per watcher.
    ///
    /// # Panics
    /// If `timeout_ms` is zero.
    pub fn add_timer(&mut self, id: WatcherId, timeout_ms: u64) {
        assert!(timeout_ms > 0, "timer timeout must be positive");

        let deadline_ms = self.now_ms().saturating_add(timeout_ms);
        let seq = self.next_seq;
        self.next_seq += 1;

        self.timers.push(Reverse(Timer {
            deadline_ms,
            seq,
            id,
        }));
        trace!(%id, timeout_ms, deadline_ms, "timer armed");
    }

    pub fn contains(&self, id: WatcherId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Registered watchers, including one currently inside a callback.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Timers not yet fired. Timers of removed watchers count until their
    /// deadline passes.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// One wait plus dispatch. An interrupted wait returns `Ok(())` with
    /// nothing dispatched.
    ///
    /// A failing callback does not cut the iteration short: the remaining
    /// timers, events and deferred calls still run, then the first error is
    /// returned.
    pub fn run_once(&mut self) -> Result<()> {
        let timeout = self.next_timeout();

        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                trace!("poll interrupted");
                return Ok(());
            }
            return Err(e.into());
        }

        let mut ready = std::mem::take(&mut self.ready);
        ready.clear();
        ready.extend(self.events.iter().map(|event| {
            let readiness = Readiness {
                readable: event.is_readable() || event.is_read_closed() || event.is_error(),
                writable: event.is_writable() || event.is_write_closed(),
            };
            (WatcherId(event.token().0), readiness)
        }));

        let mut failure = None;
        self.fire_timers(&mut failure);

        for &(id, readiness) in &ready {
            trace!(%id, readable = readiness.readable, writable = readiness.writable, "event");
            let result = self.dispatch(id, Callback::Event(readiness));
            record(&mut failure, id, result);
        }
        self.ready = ready;

        let deferred = std::mem::take(&mut self.deferred);
        for id in deferred {
            let result = self.dispatch(id, Callback::Deferred);
            record(&mut failure, id, result);
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Loops `run_once` until a callback or the wait fails.
    pub fn run_forever(&mut self) -> Result<()> {
        loop {
            self.run_once()?;
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// `None` blocks indefinitely.
    fn next_timeout(&self) -> Option<Duration> {
        self.timers.peek().map(|Reverse(timer)| {
            let now = self.now_ms();
            Duration::from_millis(timer.deadline_ms.saturating_sub(now))
        })
    }

    fn fire_timers(&mut self, failure: &mut Option<Error>) {
        let now = self.now_ms();

        while let Some(Reverse(timer)) = self.timers.peek() {
            if timer.deadline_ms > now {
                break;
            }
            let id = timer.id;
            self.timers.pop();

            trace!(%id, "timer expired");
            let result = self.dispatch(id, Callback::Timeout);
            record(failure, id, result);
        }
    }

    fn dispatch(&mut self, id: WatcherId, callback: Callback) -> Result<()> {
        // Removed or unknown: stale event, timer or deferral.
        let mut watcher = match self.entries.get_mut(&id).and_then(|e| e.watcher.take()) {
            Some(watcher) => watcher,
            None => return Ok(()),
        };

        let result = {
            let mut cx = Context { reactor: self, id };
            match callback {
                Callback::Event(readiness) => watcher.on_event(&mut cx, readiness),
                Callback::Deferred => watcher.on_deferred(&mut cx),
                Callback::Timeout => watcher.on_timeout(&mut cx),
            }
        };

        match self.entries.get_mut(&id) {
            Some(entry) => entry.watcher = Some(watcher),
            None => {
                // removed itself during the callback
                drop(watcher);
                return result.map(drop);
            }
        }

        match result? {
            Outcome::Continue => {}
            Outcome::Defer => {
                if !matches!(callback, Callback::Deferred) && !self.deferred.contains(&id) {
                    self.deferred.push(id);
                }
            }
            Outcome::Close => {
                drop(self.remove_watcher(id));
            }
        }
        Ok(())
    }
}

/// Keeps the first callback error of an iteration; later ones are logged.
fn record(failure: &mut Option<Error>, id: WatcherId, result: Result<()>) {
    if let Err(e) = result {
        if failure.is_some() {
            warn!(%id, error = %e, "callback failed");
        } else {
            *failure = Some(e);
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        let registry = self.poll.registry();
        for (id, entry) in self.entries.drain() {
            if let Err(e) = registry.deregister(&mut SourceFd(&entry.fd)) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(%id, fd = entry.fd, error = %e, "deregister failed");
                }
            }
            drop(entry.watcher);
        }
    }
}

/// Reactor access handed to a running callback.
pub struct Context<'r> {
    reactor: &'r mut Reactor,
    id: WatcherId,
}

impl Context<'_> {
    /// The watcher this callback belongs to.
    #[inline(always)]
    pub fn id(&self) -> WatcherId {
        self.id
    }

    pub fn add_watcher(&mut self, watcher: Box<dyn Watcher>) -> Result<WatcherId> {
        self.reactor.add_watcher(watcher)
    }

    /// See [`Reactor::remove_watcher`]. Removing [`Context::id`] drops the
    /// running watcher once the callback returns.
    pub fn remove_watcher(&mut self, id: WatcherId) -> Option<Box<dyn Watcher>> {
        self.reactor.remove_watcher(id)
    }

    pub fn add_timer(&mut self, id: WatcherId, timeout_ms: u64) {
        self.reactor.add_timer(id, timeout_ms)
    }

    /// Arms a timer for the running watcher.
    pub fn arm_timer(&mut self, timeout_ms: u64) {
        let id = self.id;
        self.reactor.add_timer(id, timeout_ms)
    }
}
