//! HTTP/1.x head serialization into a bounded `Writer`.
//!
//! Every function returns the exact number of bytes its piece occupies. If
//! the writer has less space than that, nothing is written and the same
//! number comes back, so callers can size (or grow) the buffer and retry
//! without ever emitting a partial line.
//!
//! Inputs are written verbatim; callers pass valid tokens and values.

use crate::core::Writer;

use super::message::{StatusCode, Version};

const VERSION_PREFIX: &[u8] = b"HTTP/1.";
/// `"HTTP/1." DIGIT`
const VERSION_LEN: usize = 8;
const CRLF: &[u8] = b"\r\n";

#[inline(always)]
fn write_version(writer: &mut Writer<'_>, version: Version) {
    writer.write_bytes(VERSION_PREFIX);
    writer.write_byte(b'0' + version.minor());
}

/// `method SP target SP HTTP-version CRLF`
pub fn start_request(
    writer: &mut Writer<'_>,
    method: impl AsRef<[u8]>,
    target: impl AsRef<[u8]>,
    version: Version,
) -> usize {
    let method = method.as_ref();
    let target = target.as_ref();

    let needed = method.len() + 1 + target.len() + 1 + VERSION_LEN + CRLF.len();
    if writer.space() < needed {
        return needed;
    }

    writer.write_bytes(method);
    writer.write_byte(b' ');
    writer.write_bytes(target);
    writer.write_byte(b' ');
    write_version(writer, version);
    writer.write_bytes(CRLF);

    needed
}

/// `HTTP-version SP 3DIGIT SP reason CRLF`
pub fn start_response(
    writer: &mut Writer<'_>,
    status: StatusCode,
    reason: impl AsRef<[u8]>,
    version: Version,
) -> usize {
    let reason = reason.as_ref();

    let needed = VERSION_LEN + 1 + 3 + 1 + reason.len() + CRLF.len();
    if writer.space() < needed {
        return needed;
    }

    write_version(writer, version);
    writer.write_byte(b' ');
    writer.write_bytes(&status.digits());
    writer.write_byte(b' ');
    writer.write_bytes(reason);
    writer.write_bytes(CRLF);

    needed
}

/// `name ": " value CRLF`
pub fn add_header(writer: &mut Writer<'_>, name: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> usize {
    let name = name.as_ref();
    let value = value.as_ref();

    let needed = name.len() + 2 + value.len() + CRLF.len();
    if writer.space() < needed {
        return needed;
    }

    writer.write_bytes(name);
    writer.write_bytes(b": ");
    writer.write_bytes(value);
    writer.write_bytes(CRLF);

    needed
}

/// The blank line that ends the head.
pub fn write_eoh(writer: &mut Writer<'_>) -> usize {
    let needed = CRLF.len();
    if writer.space() < needed {
        return needed;
    }
    writer.write_bytes(CRLF);
    needed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Buffer;

    #[test]
    fn test_write_request_head() {
        let mut buffer = Buffer::new(128);
        let mut writer = buffer.writer();

        assert_eq!(start_request(&mut writer, "GET", "/x", Version::Http11), 17);
        assert_eq!(add_header(&mut writer, "Host", "a"), 9);
        assert_eq!(write_eoh(&mut writer), 2);

        assert_eq!(writer.to_view(), "GET /x HTTP/1.1\r\nHost: a\r\n\r\n");
    }

    #[test]
    fn test_write_response_head() {
        let mut buffer = Buffer::new(64);
        let mut writer = buffer.writer();

        let status = StatusCode::new(404).unwrap();
        assert_eq!(start_response(&mut writer, status, "Not Found", Version::Http10), 24);
        assert_eq!(writer.to_view(), "HTTP/1.0 404 Not Found\r\n");

        writer.clear();
        start_response(&mut writer, StatusCode::new(9).unwrap(), "", Version::Http11);
        assert_eq!(writer.to_view(), "HTTP/1.1 009 \r\n");
    }

    #[test]
    fn test_capacity_probe_writes_nothing() {
        let mut buffer = Buffer::new(10);
        let mut writer = buffer.writer();
        writer.write_bytes(b"xx");

        assert_eq!(add_header(&mut writer, "Host", "example"), 15);
        assert_eq!(writer.len(), 2);

        assert_eq!(start_request(&mut writer, "GET", "/", Version::Http11), 16);
        assert_eq!(writer.len(), 2);

        assert_eq!(start_response(&mut writer, StatusCode::OK, "OK", Version::Http11), 17);
        assert_eq!(writer.len(), 2);

        // exact fit
        let mut tiny = [0u8; 2];
        let mut writer = Writer::new(&mut tiny);
        assert_eq!(write_eoh(&mut writer), 2);
        assert!(writer.is_full());
        assert_eq!(write_eoh(&mut writer), 2);
        assert_eq!(writer.len(), 2);
    }
}
