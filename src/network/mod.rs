//! Network Layer: edge-triggered reactor and TCP plumbing
//!
//! - `Reactor`: single-threaded mio loop owning `Watcher`s, with one-shot timers
//! - `socket`: nonblocking resolve/bind/accept/recv/send over buffers
//! - `Acceptor`, `HttpConnection`, `EchoConnection`: demo server watchers

mod acceptor;
mod connection;
mod reactor;
pub mod socket;
mod watcher;

pub use acceptor::{Acceptor, ConnectionSettings};
pub use connection::{EchoConnection, HttpConnection};
pub use reactor::{Context, Reactor};
pub use socket::{accept, bind_and_listen, recv, resolve, send, Transfer};
pub use watcher::{Outcome, Readiness, Watcher, WatcherId};
