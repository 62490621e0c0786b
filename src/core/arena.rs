//! Chunked bump arena for per-connection scratch state.
//!
//! Layout:
//! ```text
//! chunks:  [hdr|obj|obj|pad|obj|....free....] -> [hdr|obj|obj|....] -> None
//! large:   [meta|object.............]  or  [object.............|meta] -> None
//! ```
//!
//! Small requests are bump-allocated from the head chunk; when it runs out a
//! fresh chunk becomes the head and the old one is never touched again.
//! Requests of `LARGE_THRESHOLD` bytes or more get their own allocation with
//! the list metadata stored inline, before or after the object depending on
//! which side keeps both alignments without padding in front of the object.
//!
//! Nothing is freed individually. Dropping the arena first runs the
//! destructors recorded by [`Arena::alloc`], then releases every chunk and
//! every large block.

use std::alloc::{self, handle_alloc_error, Layout};
use std::cell::Cell;
use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};

/// Size of one bump chunk, header included.
pub const CHUNK_SIZE: usize = 4096;
/// Requests at or above this size bypass the chunks.
pub const LARGE_THRESHOLD: usize = CHUNK_SIZE / 2;
/// Alignment of chunk memory. Stricter requests are served as large objects.
const CHUNK_ALIGN: usize = 16;

#[repr(C)]
struct ChunkHeader {
    prev: Option<NonNull<ChunkHeader>>,
    /// Bytes consumed from the start of the chunk, header included.
    used: usize,
}

#[repr(C)]
struct LargeMeta {
    prev: Option<NonNull<LargeMeta>>,
    /// Start of the block returned by the global allocator.
    base: NonNull<u8>,
    block: Layout,
}

struct DropEntry {
    prev: Option<NonNull<DropEntry>>,
    value: *mut u8,
    drop_fn: unsafe fn(*mut u8),
}

unsafe fn drop_value<T>(value: *mut u8) {
    ptr::drop_in_place(value.cast::<T>());
}

#[inline(always)]
fn round_up(n: usize, align: usize) -> Option<usize> {
    Some(n.checked_add(align - 1)? & !(align - 1))
}

#[inline(always)]
fn chunk_layout() -> Layout {
    // SAFETY: CHUNK_ALIGN is a power of two and CHUNK_SIZE a multiple of it
    unsafe { Layout::from_size_align_unchecked(CHUNK_SIZE, CHUNK_ALIGN) }
}

/// Bump `layout` out of `chunk`, or `None` if it does not fit.
unsafe fn bump(chunk: NonNull<ChunkHeader>, layout: Layout) -> Option<NonNull<u8>> {
    let header = chunk.as_ptr();
    let base = header.cast::<u8>();
    let used = (*header).used;

    let pad = base.add(used).align_offset(layout.align());
    let start = used.checked_add(pad)?;
    let end = start.checked_add(layout.size())?;
    if end > CHUNK_SIZE {
        return None;
    }

    (*header).used = end;
    NonNull::new(base.add(start))
}

/// Allocate a dedicated block for `layout` plus its list metadata.
unsafe fn alloc_large(layout: Layout) -> Option<(NonNull<LargeMeta>, NonNull<u8>)> {
    let meta_layout = Layout::new::<LargeMeta>();

    let (total, object_at, meta_at) = if layout.align() > meta_layout.align() {
        // object first so it sits on the block alignment; meta trails it
        let meta_at = round_up(layout.size(), meta_layout.align())?;
        (meta_at.checked_add(meta_layout.size())?, 0, meta_at)
    } else {
        // meta size is a multiple of its alignment, which covers the object
        (meta_layout.size().checked_add(layout.size())?, meta_layout.size(), 0)
    };

    let block = Layout::from_size_align(total, layout.align().max(meta_layout.align())).ok()?;
    let base = NonNull::new(alloc::alloc(block))?;

    let meta = base.as_ptr().add(meta_at).cast::<LargeMeta>();
    meta.write(LargeMeta {
        prev: None,
        base,
        block,
    });

    Some((
        NonNull::new_unchecked(meta),
        NonNull::new_unchecked(base.as_ptr().add(object_at)),
    ))
}

/// Connection-scoped memory pool.
///
/// Every pointer it returns stays valid until the arena is dropped. Not
/// `Clone` and not `Sync`; moving it moves ownership of all its memory.
pub struct Arena {
    chunks: Cell<Option<NonNull<ChunkHeader>>>,
    large: Cell<Option<NonNull<LargeMeta>>>,
    drops: Cell<Option<NonNull<DropEntry>>>,
}

impl Arena {
    /// Empty arena. No memory is taken until the first allocation.
    pub const fn new() -> Self {
        Self {
            chunks: Cell::new(None),
            large: Cell::new(None),
            drops: Cell::new(None),
        }
    }

    /// Raw memory for `layout`, or `None` when the system allocator fails.
    pub fn try_allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return NonNull::new(layout.align() as *mut u8);
        }

        if layout.size() >= LARGE_THRESHOLD || layout.align() > CHUNK_ALIGN {
            return self.push_large(layout);
        }

        if let Some(chunk) = self.chunks.get() {
            // SAFETY: chunk is owned by this arena and still live
            if let Some(ptr) = unsafe { bump(chunk, layout) } {
                return Some(ptr);
            }
        }

        let chunk = self.push_chunk()?;
        // SAFETY: fresh chunk, and size < LARGE_THRESHOLD with align <= CHUNK_ALIGN
        // always fits after the header
        unsafe { bump(chunk, layout) }
    }

    /// Raw memory for `layout`. Aborts the process on exhaustion.
    pub fn allocate(&self, layout: Layout) -> NonNull<u8> {
        match self.try_allocate(layout) {
            Some(ptr) => ptr,
            None => handle_alloc_error(layout),
        }
    }

    /// Move `value` into the arena, or hand back `None` on exhaustion.
    ///
    /// If `T` needs dropping its destructor runs when the arena is dropped.
    pub fn try_alloc<T: 'static>(&self, value: T) -> Option<&mut T> {
        let slot = self.try_allocate(Layout::new::<T>())?.cast::<T>();

        if mem::needs_drop::<T>() {
            let entry = self
                .try_allocate(Layout::new::<DropEntry>())?
                .cast::<DropEntry>();
            // SAFETY: entry is fresh, aligned arena memory
            unsafe {
                entry.as_ptr().write(DropEntry {
                    prev: self.drops.get(),
                    value: slot.as_ptr().cast(),
                    drop_fn: drop_value::<T>,
                });
            }
            self.drops.set(Some(entry));
        }

        // SAFETY: slot is fresh, aligned, and never handed out twice
        unsafe {
            slot.as_ptr().write(value);
            Some(&mut *slot.as_ptr())
        }
    }

    /// Move `value` into the arena. Aborts the process on exhaustion.
    pub fn alloc<T: 'static>(&self, value: T) -> &mut T {
        let layout = Layout::new::<T>();
        match self.try_alloc(value) {
            Some(value) => value,
            None => handle_alloc_error(layout),
        }
    }

    /// Copy a plain value into the arena. No destructor is recorded, so any
    /// lifetime is accepted.
    pub fn alloc_copy<T: Copy>(&self, value: T) -> &mut T {
        let slot = self.allocate(Layout::new::<T>()).cast::<T>();
        // SAFETY: fresh, aligned arena memory
        unsafe {
            slot.as_ptr().write(value);
            &mut *slot.as_ptr()
        }
    }

    /// `len` copies of `value`, or `None` on exhaustion.
    pub fn try_alloc_slice_fill_copy<T: Copy>(&self, len: usize, value: T) -> Option<&mut [T]> {
        let layout = Layout::array::<T>(len).ok()?;
        let base = self.try_allocate(layout)?.cast::<T>();
        // SAFETY: room for `len` elements, each written before the slice is formed
        unsafe {
            for i in 0..len {
                base.as_ptr().add(i).write(value);
            }
            Some(std::slice::from_raw_parts_mut(base.as_ptr(), len))
        }
    }

    /// `len` copies of `value`. Aborts the process on exhaustion.
    pub fn alloc_slice_fill_copy<T: Copy>(&self, len: usize, value: T) -> &mut [T] {
        let layout = match Layout::array::<T>(len) {
            Ok(layout) => layout,
            Err(_) => std::process::abort(),
        };
        match self.try_alloc_slice_fill_copy(len, value) {
            Some(slice) => slice,
            None => handle_alloc_error(layout),
        }
    }

    /// Copy of `src` living in the arena.
    pub fn alloc_slice_copy<T: Copy>(&self, src: &[T]) -> &mut [T] {
        let layout = match Layout::array::<T>(src.len()) {
            Ok(layout) => layout,
            Err(_) => std::process::abort(),
        };
        let base = self.allocate(layout).cast::<T>();
        // SAFETY: room for src.len() elements; arena memory never overlaps src
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), base.as_ptr(), src.len());
            std::slice::from_raw_parts_mut(base.as_ptr(), src.len())
        }
    }

    /// Zeroed scratch bytes, e.g. to back a `Writer`.
    pub fn alloc_bytes(&self, len: usize) -> &mut [u8] {
        self.alloc_slice_fill_copy(len, 0u8)
    }

    /// Number of bump chunks owned.
    pub fn chunk_count(&self) -> usize {
        let mut count = 0;
        let mut cur = self.chunks.get();
        while let Some(chunk) = cur {
            count += 1;
            // SAFETY: list only holds live chunks
            cur = unsafe { (*chunk.as_ptr()).prev };
        }
        count
    }

    /// Number of dedicated large-object blocks owned.
    pub fn large_count(&self) -> usize {
        let mut count = 0;
        let mut cur = self.large.get();
        while let Some(meta) = cur {
            count += 1;
            // SAFETY: list only holds live blocks
            cur = unsafe { (*meta.as_ptr()).prev };
        }
        count
    }

    /// Free bytes left in the head chunk, before alignment padding.
    pub fn chunk_remaining(&self) -> usize {
        match self.chunks.get() {
            // SAFETY: head chunk is live
            Some(chunk) => CHUNK_SIZE - unsafe { (*chunk.as_ptr()).used },
            None => 0,
        }
    }

    fn push_chunk(&self) -> Option<NonNull<ChunkHeader>> {
        // SAFETY: chunk_layout has non-zero size
        let mem = NonNull::new(unsafe { alloc::alloc(chunk_layout()) })?;
        let chunk = mem.cast::<ChunkHeader>();
        // SAFETY: fresh block, aligned for the header
        unsafe {
            chunk.as_ptr().write(ChunkHeader {
                prev: self.chunks.get(),
                used: mem::size_of::<ChunkHeader>(),
            });
        }
        self.chunks.set(Some(chunk));
        Some(chunk)
    }

    fn push_large(&self, layout: Layout) -> Option<NonNull<u8>> {
        // SAFETY: layout has non-zero size here
        let (meta, object) = unsafe { alloc_large(layout)? };
        // SAFETY: meta was just written by alloc_large
        unsafe { (*meta.as_ptr()).prev = self.large.get() };
        self.large.set(Some(meta));
        Some(object)
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // destructors first: entries and values both live in arena memory
        let mut cur = self.drops.take();
        while let Some(entry) = cur {
            // SAFETY: entry and the value it points at are live until the
            // chunks below are released; each entry runs exactly once
            unsafe {
                let DropEntry {
                    prev,
                    value,
                    drop_fn,
                } = entry.as_ptr().read();
                drop_fn(value);
                cur = prev;
            }
        }

        let mut cur = self.chunks.take();
        while let Some(chunk) = cur {
            // SAFETY: chunk came from alloc::alloc(chunk_layout())
            unsafe {
                cur = (*chunk.as_ptr()).prev;
                alloc::dealloc(chunk.as_ptr().cast(), chunk_layout());
            }
        }

        let mut cur = self.large.take();
        while let Some(meta) = cur {
            // SAFETY: meta lives inside the block it describes, so read it out first
            unsafe {
                let LargeMeta { prev, base, block } = meta.as_ptr().read();
                alloc::dealloc(base.as_ptr(), block);
                cur = prev;
            }
        }
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("chunks", &self.chunk_count())
            .field("large", &self.large_count())
            .finish()
    }
}
