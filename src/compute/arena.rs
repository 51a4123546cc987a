//! Bump-pointer arena for per-generation scratch memory.
//!
//! # Overview
//!
//! An [`Arena`] hands out aligned byte ranges from one contiguous buffer.
//! Individual allocations are never freed; the whole arena is reclaimed at
//! once with [`Arena::reset`], or partially with a [`snapshot`] /
//! [`rewind`] pair for nested scratch regions.
//!
//! Running out of space is not an error. [`Arena::alloc`] returns `None` and
//! the caller falls back to the heap or grows the arena.
//!
//! # Example
//!
//! ```rust
//! use evocore::compute::Arena;
//!
//! let mut arena = Arena::new(1024);
//! let block = arena.calloc(100).expect("fits");
//! arena.slice_mut(block)[0] = 7;
//!
//! let mark = arena.snapshot();
//! let _tmp = arena.alloc(200);
//! assert!(arena.rewind(mark));
//! assert_eq!(arena.used(), block.end());
//! ```
//!
//! [`snapshot`]: Arena::snapshot
//! [`rewind`]: Arena::rewind

/// Alignment of every allocation: twice the platform pointer width.
pub const ARENA_ALIGNMENT: usize = 2 * std::mem::size_of::<usize>();

/// Capacity used when `0` is requested.
pub const DEFAULT_ARENA_CAPACITY: usize = 64 * 1024;

/// Backing storage unit for owned arenas; guarantees base alignment.
#[repr(C, align(16))]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct Chunk([u8; 16]);

enum Backing<'a> {
    Owned(Vec<Chunk>),
    Borrowed(&'a mut [u8]),
}

/// A byte range handed out by an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaBlock {
    offset: usize,
    len: usize,
}

impl ArenaBlock {
    /// Offset from the start of the arena buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte.
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Saved arena position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaSnapshot(usize);

/// Usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub capacity: usize,
    pub used: usize,
    pub peak: usize,
    pub allocations: u64,
    pub failed_allocations: u64,
}

/// Bump allocator over an owned or borrowed buffer.
pub struct Arena<'a> {
    backing: Backing<'a>,
    capacity: usize,
    offset: usize,
    peak: usize,
    allocations: u64,
    failed_allocations: u64,
}

impl Arena<'static> {
    /// Create an arena that owns its buffer.
    ///
    /// Capacity is rounded up to [`ARENA_ALIGNMENT`]; `0` selects
    /// [`DEFAULT_ARENA_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let requested = if capacity == 0 {
            DEFAULT_ARENA_CAPACITY
        } else {
            capacity
        };
        let capacity = align_up(requested, ARENA_ALIGNMENT);
        let chunks = capacity.div_ceil(std::mem::size_of::<Chunk>());

        Self {
            backing: Backing::Owned(vec![Chunk([0; 16]); chunks]),
            capacity,
            offset: 0,
            peak: 0,
            allocations: 0,
            failed_allocations: 0,
        }
    }
}

impl<'a> Arena<'a> {
    /// Create an arena over caller-provided memory. The buffer is not freed
    /// when the arena drops.
    pub fn with_buffer(buffer: &'a mut [u8]) -> Self {
        let capacity = buffer.len();
        Self {
            backing: Backing::Borrowed(buffer),
            capacity,
            offset: 0,
            peak: 0,
            allocations: 0,
            failed_allocations: 0,
        }
    }

    /// Whether the buffer is released on drop.
    pub fn owns_buffer(&self) -> bool {
        matches!(self.backing, Backing::Owned(_))
    }

    fn bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Owned(chunks) => &bytemuck::cast_slice(chunks)[..self.capacity],
            Backing::Borrowed(buf) => &buf[..],
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        let capacity = self.capacity;
        match &mut self.backing {
            Backing::Owned(chunks) => &mut bytemuck::cast_slice_mut(chunks)[..capacity],
            Backing::Borrowed(buf) => &mut buf[..],
        }
    }

    /// Offset at which an allocation starting at `offset` would be placed.
    fn aligned_offset(&self, offset: usize) -> Option<usize> {
        let base = self.bytes().as_ptr() as usize;
        let addr = base.checked_add(offset)?;
        let aligned = addr.checked_add(ARENA_ALIGNMENT - 1)? & !(ARENA_ALIGNMENT - 1);
        Some(aligned - base)
    }

    /// Allocate `size` bytes. Contents are unspecified (left from earlier use).
    pub fn alloc(&mut self, size: usize) -> Option<ArenaBlock> {
        let start = self.aligned_offset(self.offset);
        let end = start.and_then(|s| s.checked_add(size));

        match (start, end) {
            (Some(start), Some(end)) if end <= self.capacity => {
                self.offset = end;
                self.peak = self.peak.max(end);
                self.allocations += 1;
                Some(ArenaBlock { offset: start, len: size })
            }
            _ => {
                self.failed_allocations += 1;
                log::warn!(
                    "Arena exhausted: requested {} bytes, {} of {} in use",
                    size,
                    self.offset,
                    self.capacity
                );
                None
            }
        }
    }

    /// Allocate `size` zeroed bytes.
    pub fn calloc(&mut self, size: usize) -> Option<ArenaBlock> {
        let block = self.alloc(size)?;
        self.slice_mut(block).fill(0);
        Some(block)
    }

    /// Allocate room for `count` elements of `elem_size` bytes.
    pub fn alloc_array(&mut self, count: usize, elem_size: usize) -> Option<ArenaBlock> {
        match count.checked_mul(elem_size) {
            Some(total) => self.alloc(total),
            None => {
                self.failed_allocations += 1;
                log::warn!("Arena array size overflow: {} x {}", count, elem_size);
                None
            }
        }
    }

    /// Whether an allocation of `size` bytes would currently succeed.
    pub fn can_alloc(&self, size: usize) -> bool {
        self.aligned_offset(self.offset)
            .and_then(|s| s.checked_add(size))
            .is_some_and(|end| end <= self.capacity)
    }

    /// Bytes of an allocated block.
    pub fn slice(&self, block: ArenaBlock) -> &[u8] {
        &self.bytes()[block.offset..block.end()]
    }

    /// Mutable bytes of an allocated block.
    pub fn slice_mut(&mut self, block: ArenaBlock) -> &mut [u8] {
        &mut self.bytes_mut()[block.offset..block.end()]
    }

    /// Release every allocation at once.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Current position, for a later [`Arena::rewind`].
    pub fn snapshot(&self) -> ArenaSnapshot {
        ArenaSnapshot(self.offset)
    }

    /// Return to an earlier position. Rewinding forward is refused.
    pub fn rewind(&mut self, snapshot: ArenaSnapshot) -> bool {
        if snapshot.0 > self.offset {
            return false;
        }
        self.offset = snapshot.0;
        true
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.offset
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            capacity: self.capacity,
            used: self.offset,
            peak: self.peak,
            allocations: self.allocations,
            failed_allocations: self.failed_allocations,
        }
    }
}

impl std::fmt::Debug for Arena<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity)
            .field("offset", &self.offset)
            .field("owned", &self.owns_buffer())
            .finish()
    }
}

fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_rounding() {
        assert_eq!(Arena::new(0).capacity(), DEFAULT_ARENA_CAPACITY);
        assert_eq!(Arena::new(1).capacity(), ARENA_ALIGNMENT);
        assert_eq!(Arena::new(100).capacity() % ARENA_ALIGNMENT, 0);
    }

    #[test]
    fn test_alignment() {
        let mut arena = Arena::new(4096);
        for size in [1, 3, 7, 16, 33, 100] {
            let block = arena.alloc(size).unwrap();
            let ptr = arena.slice(block).as_ptr() as usize;
            assert_eq!(ptr % ARENA_ALIGNMENT, 0);
        }
    }

    #[test]
    fn test_borrowed_alignment() {
        let mut raw = vec![0u8; 256];
        // Deliberately misaligned start
        let mut arena = Arena::with_buffer(&mut raw[3..]);
        assert!(!arena.owns_buffer());
        let block = arena.alloc(10).unwrap();
        let ptr = arena.slice(block).as_ptr() as usize;
        assert_eq!(ptr % ARENA_ALIGNMENT, 0);
    }

    #[test]
    fn test_out_of_space() {
        let mut arena = Arena::new(64);
        assert!(arena.alloc(64).is_some());
        assert!(arena.alloc(1).is_none());
        assert_eq!(arena.stats().failed_allocations, 1);
        assert!(!arena.can_alloc(1));
    }

    #[test]
    fn test_alloc_array_overflow() {
        let mut arena = Arena::new(64);
        assert!(arena.alloc_array(usize::MAX, 2).is_none());
        assert!(arena.alloc_array(4, 8).is_some());
    }

    #[test]
    fn test_calloc_zeroes() {
        let mut arena = Arena::new(128);
        let a = arena.alloc(32).unwrap();
        arena.slice_mut(a).fill(0xFF);
        arena.reset();
        let b = arena.calloc(32).unwrap();
        assert!(arena.slice(b).iter().all(|&x| x == 0));
    }

    #[test]
    fn test_reset() {
        let mut arena = Arena::new(128);
        arena.alloc(50).unwrap();
        assert!(arena.used() >= 50);
        arena.reset();
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.remaining(), arena.capacity());
        assert!(arena.stats().peak >= 50);
    }

    #[test]
    fn test_snapshot_rewind_deterministic() {
        let mut arena = Arena::new(1024);
        arena.alloc(10).unwrap();
        let mark = arena.snapshot();

        let first = arena.alloc(40).unwrap();
        assert!(arena.rewind(mark));
        let second = arena.alloc(40).unwrap();
        assert_eq!(first, second);

        // Cannot rewind forward
        arena.rewind(mark);
        let later = ArenaSnapshot(mark.0 + 100);
        assert!(!arena.rewind(later));
    }
}
