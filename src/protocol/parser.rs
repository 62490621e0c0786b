//! Zero-copy HTTP/1.x head parser.
//!
//! Grammar accepted:
//! ```text
//! request-line = token SP target SP "HTTP/1." ("0" / "1") CRLF
//! status-line  = "HTTP/1." ("0" / "1") SP 3DIGIT [SP reason] CRLF
//! field-line   = token ":" OWS value OWS CRLF        ; no space before ":"
//! head         = start-line *field-line CRLF
//! ```
//! No folding, no other versions. Every returned string is a `View` into
//! the input; only header bookkeeping touches the arena.

use crate::core::{Arena, View};
use crate::error::ParseError;

use super::message::{Headers, Request, Response, StatusCode, Version};

const HEADER_END: &[u8; 4] = b"\r\n\r\n";
const VERSION_PREFIX: &[u8; 7] = b"HTTP/1.";

/// Length of the header block (terminating blank line included) if the
/// view already holds one, otherwise 0.
///
/// Keeps no state: call it again with the grown view as more bytes arrive.
pub fn header_completed(view: &View<'_>) -> usize {
    view.as_bytes()
        .windows(HEADER_END.len())
        .position(|w| w == HEADER_END)
        .map_or(0, |pos| pos + HEADER_END.len())
}

/// RFC 9110 `tchar`.
#[inline(always)]
fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

#[inline(always)]
fn is_ows(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

/// Control bytes other than HTAB are not allowed in values and phrases.
#[inline(always)]
fn is_text(b: u8) -> bool {
    b == b'\t' || !(b < 0x20 || b == 0x7f)
}

struct Cursor<'a> {
    view: View<'a>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(view: View<'a>) -> Self {
        Self { view, pos: 0 }
    }

    #[inline(always)]
    fn peek(&self) -> Option<u8> {
        self.view.get(self.pos)
    }

    #[inline(always)]
    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    #[inline(always)]
    fn remaining(&self) -> &'a [u8] {
        &self.view.as_bytes()[self.pos..]
    }

    /// Consume the longest run matching `pred`.
    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> View<'a> {
        let start = self.pos;
        let run = self.remaining().iter().take_while(|&&b| pred(b)).count();
        self.pos += run;
        self.view.slice(start, self.pos)
    }

    /// Consume exactly `n` bytes.
    fn take(&mut self, n: usize) -> Result<View<'a>, ParseError> {
        if self.remaining().len() < n {
            return Err(ParseError::Incomplete);
        }
        let start = self.pos;
        self.pos += n;
        Ok(self.view.slice(start, self.pos))
    }

    fn expect(&mut self, byte: u8, err: ParseError) -> Result<(), ParseError> {
        match self.bump() {
            Some(b) if b == byte => Ok(()),
            Some(_) => Err(err),
            None => Err(ParseError::Incomplete),
        }
    }

    fn expect_crlf(&mut self, err: ParseError) -> Result<(), ParseError> {
        self.expect(b'\r', err)?;
        self.expect(b'\n', err)
    }
}

fn parse_version(cur: &mut Cursor<'_>) -> Result<Version, ParseError> {
    let token = cur.take(VERSION_PREFIX.len() + 1)?.as_bytes();
    if &token[..VERSION_PREFIX.len()] != VERSION_PREFIX {
        return Err(ParseError::UnsupportedVersion);
    }
    match token[VERSION_PREFIX.len()] {
        b'0' => Ok(Version::Http10),
        b'1' => Ok(Version::Http11),
        _ => Err(ParseError::UnsupportedVersion),
    }
}

fn trim_trailing_ows(view: View<'_>) -> View<'_> {
    let kept = view
        .as_bytes()
        .iter()
        .rposition(|&b| !is_ows(b))
        .map_or(0, |last| last + 1);
    view.slice(0, kept)
}

/// Field lines up to and including the terminating blank line.
fn parse_headers<'a>(cur: &mut Cursor<'a>, arena: &'a Arena) -> Result<Headers<'a>, ParseError> {
    let mut headers = Headers::new(arena);

    loop {
        match cur.peek() {
            None => return Err(ParseError::Incomplete),
            Some(b'\r') => {
                cur.expect_crlf(ParseError::MalformedHeader)?;
                return Ok(headers);
            }
            Some(_) => {}
        }

        let name = cur.take_while(is_tchar);
        if name.is_empty() {
            return Err(ParseError::MalformedHeader);
        }
        // whitespace between name and colon is rejected here
        cur.expect(b':', ParseError::MalformedHeader)?;

        cur.take_while(is_ows);
        let raw = cur.take_while(|b| b != b'\r' && b != b'\n');
        cur.expect_crlf(ParseError::MalformedHeader)?;

        let value = trim_trailing_ows(raw);
        if value.is_empty() {
            return Err(ParseError::EmptyHeaderValue);
        }
        if !value.as_bytes().iter().all(|&b| is_text(b)) {
            return Err(ParseError::MalformedHeader);
        }

        headers.insert(name, value);
    }
}

/// Parse a request head. `view` should end at the offset returned by
/// [`header_completed`]; bytes past the blank line are ignored.
pub fn parse_request<'a>(view: View<'a>, arena: &'a Arena) -> Result<Request<'a>, ParseError> {
    let mut cur = Cursor::new(view);

    let method = cur.take_while(is_tchar);
    if method.is_empty() {
        return Err(match cur.peek() {
            None => ParseError::Incomplete,
            Some(_) => ParseError::InvalidMethod,
        });
    }
    cur.expect(b' ', ParseError::InvalidMethod)?;

    let target = cur.take_while(|b| b != b' ' && b > 0x20 && b != 0x7f);
    if target.is_empty() && cur.peek().is_some() {
        return Err(ParseError::InvalidTarget);
    }
    cur.expect(b' ', ParseError::InvalidTarget)?;

    let version = parse_version(&mut cur)?;
    cur.expect_crlf(ParseError::UnsupportedVersion)?;

    let headers = parse_headers(&mut cur, arena)?;

    Ok(Request {
        method,
        target,
        version,
        headers,
    })
}

/// Parse a response head. The reason phrase may be empty, with or without
/// the SP that normally precedes it.
pub fn parse_response<'a>(view: View<'a>, arena: &'a Arena) -> Result<Response<'a>, ParseError> {
    let mut cur = Cursor::new(view);

    let version = parse_version(&mut cur)?;
    cur.expect(b' ', ParseError::MalformedStatusLine)?;

    let digits = cur.take(3)?.as_bytes();
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(ParseError::MalformedStatusLine);
    }
    let status = StatusCode::from_digits([digits[0], digits[1], digits[2]]);

    match cur.peek() {
        Some(b' ') => {
            cur.bump();
        }
        Some(b'\r') => {}
        Some(_) => return Err(ParseError::MalformedStatusLine),
        None => return Err(ParseError::Incomplete),
    }

    let reason = cur.take_while(|b| b != b'\r' && b != b'\n');
    if !reason.as_bytes().iter().all(|&b| is_text(b)) {
        return Err(ParseError::MalformedStatusLine);
    }
    cur.expect_crlf(ParseError::MalformedStatusLine)?;

    let headers = parse_headers(&mut cur, arena)?;

    Ok(Response {
        version,
        status,
        reason,
        headers,
    })
}
