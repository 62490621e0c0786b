//! Protocol Layer: zero-copy HTTP/1.x heads
//!
//! Design:
//! - Stateless: `header_completed` can be re-run on a growing buffer
//! - Zero-copy: parsed strings are views into the receive buffer
//! - Probe-then-write: serializers never emit a partial line

mod message;
mod parser;
mod writer;

pub use message::{Field, Headers, Request, Response, StatusCode, Version};
pub use parser::{header_completed, parse_request, parse_response};
pub use writer::{add_header, start_request, start_response, write_eoh};
