//! Core module: memory primitives for connection state
//!
//! - `Buffer`/`View`/`Writer`: one owned byte region, borrowed windows over it
//! - `Arena`: chunked bump allocation, released all at once

mod arena;
mod buffer;

pub use arena::{Arena, CHUNK_SIZE, LARGE_THRESHOLD};
pub use buffer::{Buffer, View, Writer};
