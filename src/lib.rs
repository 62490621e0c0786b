//! edgeio - edge-triggered I/O runtime
//!
//! Architecture:
//! - Reactor: single-threaded mio loop, watchers own their fds
//! - Arena: per-connection bump memory, freed in one shot
//! - Zero-Copy: HTTP/1.x heads parsed into views of the receive buffer

pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod protocol;

pub use crate::config::{Command, Mode, ServerConfig};
pub use crate::core::{Arena, Buffer, View, Writer};
pub use crate::error::{Error, ParseError, Result};
pub use crate::network::{Context, Outcome, Reactor, Readiness, Watcher, WatcherId};
