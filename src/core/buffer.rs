//! Owned byte region plus borrowed read windows and append cursors.
//!
//! `Buffer` owns the bytes. `View` and `Writer` only borrow them, so the
//! borrow checker rejects any `resize` while a window into the old storage
//! is still alive. Both can also wrap arena scratch memory or any slice.

use std::alloc::{handle_alloc_error, Layout};
use std::fmt;

/// Exclusive owner of a heap byte region `[0, size)`.
pub struct Buffer {
    data: Box<[u8]>,
}

impl Buffer {
    /// Allocate a zeroed buffer of `size` bytes. Aborts when out of memory.
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Like [`Buffer::new`] but returns `None` instead of aborting.
    pub fn try_new(size: usize) -> Option<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(size).ok()?;
        data.resize(size, 0);
        Some(Self {
            data: data.into_boxed_slice(),
        })
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Grow or shrink to `new_size`, keeping the common prefix. Aborts on
    /// allocation failure.
    pub fn resize(&mut self, new_size: usize) {
        if !self.try_resize(new_size) {
            match Layout::array::<u8>(new_size) {
                Ok(layout) => handle_alloc_error(layout),
                Err(_) => std::process::abort(),
            }
        }
    }

    /// Grow or shrink to `new_size`. On failure the buffer is left untouched
    /// and `false` is returned.
    pub fn try_resize(&mut self, new_size: usize) -> bool {
        let mut data = std::mem::take(&mut self.data).into_vec();
        if new_size > data.len() && data.try_reserve_exact(new_size - data.len()).is_err() {
            self.data = data.into_boxed_slice();
            return false;
        }
        data.resize(new_size, 0);
        self.data = data.into_boxed_slice();
        true
    }

    /// Window over the whole buffer.
    #[inline(always)]
    pub fn view(&self) -> View<'_> {
        View::new(&self.data)
    }

    /// Window over `[begin, end)`.
    ///
    /// # Panics
    /// Panics unless `begin <= end <= size()`.
    #[inline(always)]
    pub fn view_range(&self, begin: usize, end: usize) -> View<'_> {
        View::with_range(&self.data, begin, end)
    }

    /// Append cursor over the whole buffer.
    #[inline(always)]
    pub fn writer(&mut self) -> Writer<'_> {
        Writer::new(&mut self.data)
    }

    /// Append cursor over `[begin, size())`.
    #[inline(always)]
    pub fn writer_at(&mut self, begin: usize) -> Writer<'_> {
        Writer::with_start(&mut self.data, begin)
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline(always)]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Clone for Buffer {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer").field("size", &self.size()).finish()
    }
}

/// Non-owning half-open window `[begin, end)` into some byte storage.
///
/// Zero-copy: slicing only moves the bounds, and every accessor hands out
/// references with the storage lifetime `'a`.
#[derive(Clone, Copy)]
pub struct View<'a> {
    data: &'a [u8],
    begin: usize,
    end: usize,
}

impl<'a> View<'a> {
    /// Window over all of `data`.
    #[inline(always)]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            begin: 0,
            end: data.len(),
        }
    }

    pub const fn empty() -> Self {
        Self {
            data: &[],
            begin: 0,
            end: 0,
        }
    }

    #[inline(always)]
    pub(crate) fn with_range(data: &'a [u8], begin: usize, end: usize) -> Self {
        assert!(
            begin <= end && end <= data.len(),
            "view range {begin}..{end} out of bounds for {} bytes",
            data.len()
        );
        Self { data, begin, end }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// Absolute position of the first byte inside the underlying storage.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.begin
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &'a [u8] {
        &self.data[self.begin..self.end]
    }

    /// The window as UTF-8, or `None` if it is not valid UTF-8.
    pub fn as_str(&self) -> Option<&'a str> {
        std::str::from_utf8(self.as_bytes()).ok()
    }

    #[inline(always)]
    pub fn get(&self, index: usize) -> Option<u8> {
        self.as_bytes().get(index).copied()
    }

    /// Narrow to `[begin, end)` relative to the current start.
    ///
    /// # Panics
    /// Panics unless `begin <= end <= len()`.
    #[inline(always)]
    pub fn slice(&self, begin: usize, end: usize) -> View<'a> {
        assert!(
            begin <= end && end <= self.len(),
            "slice {begin}..{end} out of bounds for view of {} bytes",
            self.len()
        );
        Self {
            data: self.data,
            begin: self.begin + begin,
            end: self.begin + end,
        }
    }

    /// Drop the first `begin` bytes.
    #[inline(always)]
    pub fn slice_from(&self, begin: usize) -> View<'a> {
        self.slice(begin, self.len())
    }
}

impl AsRef<[u8]> for View<'_> {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl PartialEq for View<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for View<'_> {}

impl PartialEq<[u8]> for View<'_> {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

impl PartialEq<&[u8]> for View<'_> {
    fn eq(&self, other: &&[u8]) -> bool {
        self.as_bytes() == *other
    }
}

impl PartialEq<str> for View<'_> {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl PartialEq<&str> for View<'_> {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl fmt::Debug for View<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "View({:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

/// Bounded append cursor over `[begin, end)` of some byte storage.
///
/// `current` moves forward as bytes are appended; `space()` is what is left
/// before `end`.
pub struct Writer<'a> {
    data: &'a mut [u8],
    begin: usize,
    current: usize,
    end: usize,
}

impl<'a> Writer<'a> {
    /// Cursor over all of `data`.
    #[inline(always)]
    pub fn new(data: &'a mut [u8]) -> Self {
        let end = data.len();
        Self {
            data,
            begin: 0,
            current: 0,
            end,
        }
    }

    #[inline(always)]
    pub(crate) fn with_start(data: &'a mut [u8], begin: usize) -> Self {
        let end = data.len();
        assert!(begin <= end, "writer start {begin} beyond {end} bytes");
        Self {
            data,
            begin,
            current: begin,
            end,
        }
    }

    /// Total capacity of the cursor's window.
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.end - self.begin
    }

    /// Bytes still writable.
    #[inline(always)]
    pub fn space(&self) -> usize {
        self.end - self.current
    }

    /// Bytes written so far.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.current - self.begin
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.current == self.begin
    }

    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.current == self.end
    }

    /// # Panics
    /// Panics when there is no space left.
    #[inline(always)]
    pub fn write_byte(&mut self, byte: u8) {
        assert!(self.current < self.end, "writer is full");
        self.data[self.current] = byte;
        self.current += 1;
    }

    /// # Panics
    /// Panics when `bytes` does not fit into `space()`.
    #[inline(always)]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        assert!(
            bytes.len() <= self.space(),
            "writing {} bytes with {} left",
            bytes.len(),
            self.space()
        );
        let start = self.current;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.current += bytes.len();
    }

    /// The unwritten tail, for filling directly (e.g. from `recv`). Commit
    /// what was filled with [`Writer::advance`].
    #[inline(always)]
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.current..self.end]
    }

    /// # Panics
    /// Panics when `n > space()`.
    #[inline(always)]
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.space(), "advance {n} with {} left", self.space());
        self.current += n;
    }

    /// Forget everything written so far.
    #[inline(always)]
    pub fn clear(&mut self) {
        self.current = self.begin;
    }

    /// What has been written so far, `[begin, current)`.
    #[inline(always)]
    pub fn to_view(&self) -> View<'_> {
        View::with_range(&*self.data, self.begin, self.current)
    }

    /// Give up the cursor and keep the written window.
    #[inline(always)]
    pub fn into_view(self) -> View<'a> {
        let Writer {
            data,
            begin,
            current,
            ..
        } = self;
        View::with_range(data, begin, current)
    }
}

impl fmt::Debug for Writer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("begin", &self.begin)
            .field("current", &self.current)
            .field("end", &self.end)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_slicing_is_relative() {
        let buf = b"GET /index.html HTTP/1.1";
        let view = View::new(buf);

        let target = view.slice(4, 15);
        assert_eq!(target, "/index.html");
        assert_eq!(target.offset(), 4);

        let name = target.slice(1, 6);
        assert_eq!(name, "index");
        assert_eq!(name.offset(), 5);
        assert_eq!(target.slice_from(7), "html");
    }

    #[test]
    #[should_panic]
    fn test_view_slice_out_of_bounds() {
        let view = View::new(b"abc");
        let _ = view.slice(1, 4);
    }

    #[test]
    fn test_writer_tracks_space() {
        let mut buffer = Buffer::new(8);
        let mut writer = buffer.writer();

        assert_eq!(writer.space(), 8);
        writer.write_bytes(b"abc");
        writer.write_byte(b'd');
        assert_eq!(writer.len(), 4);
        assert_eq!(writer.space(), 4);
        assert_eq!(writer.to_view(), "abcd");

        writer.clear();
        assert!(writer.is_empty());
        assert_eq!(writer.space(), 8);
    }

    #[test]
    fn test_writer_at_offset() {
        let mut buffer = Buffer::new(6);
        buffer.writer().write_bytes(b"ab");

        let mut writer = buffer.writer_at(2);
        assert_eq!(writer.size(), 4);
        writer.spare_mut()[..2].copy_from_slice(b"cd");
        writer.advance(2);
        let view = writer.into_view();
        assert_eq!(view, "cd");
        assert_eq!(view.offset(), 2);

        assert_eq!(buffer.view_range(0, 4), "abcd");
    }

    #[test]
    #[should_panic]
    fn test_writer_overflow_panics() {
        let mut data = [0u8; 2];
        let mut writer = Writer::new(&mut data);
        writer.write_bytes(b"abc");
    }

    #[test]
    fn test_resize_keeps_prefix() {
        let mut buffer = Buffer::new(4);
        buffer.writer().write_bytes(b"wxyz");

        buffer.resize(8);
        assert_eq!(buffer.size(), 8);
        assert_eq!(&buffer.as_slice()[..4], b"wxyz");

        assert!(buffer.try_resize(2));
        assert_eq!(buffer.view(), "wx");
    }

    #[test]
    fn test_view_as_str() {
        let bytes = [b'o', b'k', 0xff];
        let view = View::new(&bytes);
        assert_eq!(view.slice(0, 2).as_str(), Some("ok"));
        assert_eq!(view.as_str(), None);
        assert_eq!(view.get(1), Some(b'k'));
        assert_eq!(view.get(3), None);
    }
}
