//! HTTP/1.x message heads whose strings are windows into the receive buffer.
//!
//! Nothing here copies bytes off the wire: method, target, reason phrase,
//! header names and values are all `View`s. Header entries themselves live
//! in the connection's `Arena`, so a parsed message is tied to both the
//! buffer and the arena through `'a`.

use std::fmt;

use crate::core::{Arena, View};
use crate::error::{Error, Result};

/// Protocol versions this codec speaks. Major is always 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    #[inline(always)]
    pub fn major(self) -> u8 {
        1
    }

    #[inline(always)]
    pub fn minor(self) -> u8 {
        match self {
            Version::Http10 => 0,
            Version::Http11 => 1,
        }
    }

    #[inline(always)]
    pub fn from_minor(minor: u8) -> Option<Self> {
        match minor {
            0 => Some(Version::Http10),
            1 => Some(Version::Http11),
            _ => None,
        }
    }
}

/// Three-digit status code, `0..=999`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const HEADER_FIELDS_TOO_LARGE: StatusCode = StatusCode(431);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);

    /// Rejects anything that would not serialize as exactly three digits.
    pub fn new(code: u16) -> Result<Self> {
        if code > 999 {
            return Err(Error::InvalidStatusCode(code));
        }
        Ok(StatusCode(code))
    }

    #[inline(always)]
    pub fn as_u16(self) -> u16 {
        self.0
    }

    /// ASCII digits, zero padded.
    #[inline(always)]
    pub fn digits(self) -> [u8; 3] {
        let code = self.0;
        [
            b'0' + (code / 100) as u8,
            b'0' + (code / 10 % 10) as u8,
            b'0' + (code % 10) as u8,
        ]
    }

    pub(crate) fn from_digits(digits: [u8; 3]) -> Self {
        let value = digits
            .iter()
            .fold(0u16, |acc, &d| acc * 10 + u16::from(d - b'0'));
        StatusCode(value)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

/// One `name: value` pair.
#[derive(Debug, Clone, Copy)]
pub struct Field<'a> {
    pub name: View<'a>,
    pub value: View<'a>,
}

impl Field<'static> {
    const EMPTY: Self = Field {
        name: View::empty(),
        value: View::empty(),
    };
}

/// Ordered multi-map of header fields, kept in wire order.
///
/// Storage is arena memory that grows by doubling; abandoned smaller copies
/// are reclaimed with the arena.
pub struct Headers<'a> {
    arena: &'a Arena,
    slots: &'a mut [Field<'a>],
    len: usize,
}

impl<'a> Headers<'a> {
    const INITIAL_CAPACITY: usize = 8;

    pub fn new(arena: &'a Arena) -> Self {
        Self {
            arena,
            slots: Default::default(),
            len: 0,
        }
    }

    /// Append a field. Existing fields with the same name are kept.
    pub fn insert(&mut self, name: View<'a>, value: View<'a>) {
        if self.len == self.slots.len() {
            let capacity = (self.len * 2).max(Self::INITIAL_CAPACITY);
            let grown = self.arena.alloc_slice_fill_copy(capacity, Field::EMPTY);
            grown[..self.len].copy_from_slice(&self.slots[..self.len]);
            self.slots = grown;
        }
        self.slots[self.len] = Field { name, value };
        self.len += 1;
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Field<'a>> {
        self.slots[..self.len].iter()
    }

    /// First value for `name`, compared ASCII case-insensitively.
    pub fn get(&self, name: &str) -> Option<View<'a>> {
        self.get_all(name).next()
    }

    /// Every value for `name` in wire order.
    pub fn get_all<'s>(&'s self, name: &'s str) -> impl Iterator<Item = View<'a>> + 's {
        self.iter()
            .filter(move |f| f.name.as_bytes().eq_ignore_ascii_case(name.as_bytes()))
            .map(|f| f.value)
    }
}

impl fmt::Debug for Headers<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|field| (field.name, field.value)))
            .finish()
    }
}

/// Parsed request line plus headers.
#[derive(Debug)]
pub struct Request<'a> {
    pub method: View<'a>,
    pub target: View<'a>,
    pub version: Version,
    pub headers: Headers<'a>,
}

/// Parsed status line plus headers.
#[derive(Debug)]
pub struct Response<'a> {
    pub version: Version,
    pub status: StatusCode,
    pub reason: View<'a>,
    pub headers: Headers<'a>,
}
