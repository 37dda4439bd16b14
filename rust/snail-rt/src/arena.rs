//! Fixed-capacity bump arena of aligned blocks.
//!
//! The whole region is reserved up front and never grows, so every address
//! handed out stays valid until `reset()`. Allocations are whole blocks of
//! [`BLOCK_SIZE`] bytes, aligned to [`BLOCK_SIZE`], which leaves the low four
//! bits of every address free for tagging. There is no per-object free.
//!
//! Handles ([`BlockAddr`], [`ARef`], [`ASlice`]) carry the arena generation.
//! A new arena and every `reset()` start a fresh generation, so a handle from
//! a previous epoch (or another arena) is detected instead of aliasing live
//! memory. Generations are never reissued: once the process-wide counter is
//! spent, `Arena::new` and `reset()` fail with
//! [`ArenaError::GenerationsExhausted`].
//!
//! Records that point at other records store [`ALink`]s, which drop the
//! generation and fit in four bytes. [`Arena::alloc_with_tail`] places a
//! header and its variable-length payload in one run. Together these keep a
//! call frame or an environment frame to a single header block plus one
//! block per value: a self tail call through two primitive calls costs four
//! blocks, so the default region covers about two million iterations.

use std::fmt;
use std::marker::PhantomData;
use std::mem::{align_of, size_of, MaybeUninit};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;
use tracing::{debug, warn};

/// Allocation unit: two 64-bit words, aligned to its own size.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ABlk {
    words: [u64; 2],
}

pub const BLOCK_SIZE: usize = size_of::<ABlk>();

/// Default region: 128 MiB worth of blocks.
pub const DEFAULT_CAPACITY_BLOCKS: usize = (128 * 1024 * 1024) / BLOCK_SIZE;

/// Number of blocks needed to hold `bytes`.
pub const fn blocks_for(bytes: usize) -> usize {
    bytes.div_ceil(BLOCK_SIZE)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArenaError {
    #[error("arena out of memory: requested {requested} blocks, {remaining} of {capacity} remaining")]
    OutOfMemory {
        requested: usize,
        remaining: usize,
        capacity: usize,
    },
    #[error("cannot reserve an arena of {blocks} blocks")]
    Reserve { blocks: usize },
    #[error("arena generations exhausted")]
    GenerationsExhausted,
}

/// Issues each generation number at most once, then stops.
struct GenerationCounter {
    next: AtomicU32,
}

impl GenerationCounter {
    const fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    fn issue(&self) -> Option<NonZeroU32> {
        // `next == 0` marks the counter as spent.
        let raw = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n != 0).then_some(n.wrapping_add(1))
            })
            .ok()?;
        NonZeroU32::new(raw)
    }
}

static GENERATIONS: GenerationCounter = GenerationCounter::starting_at(1);

fn next_generation() -> Result<NonZeroU32, ArenaError> {
    GENERATIONS.issue().ok_or(ArenaError::GenerationsExhausted)
}

/// Position of a block run inside one arena epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockAddr {
    offset: u32,
    generation: NonZeroU32,
}

impl BlockAddr {
    /// Block index from the region start.
    pub fn offset(self) -> usize {
        self.offset as usize
    }

    pub fn generation(self) -> NonZeroU32 {
        self.generation
    }
}

/// Typed handle to a single value stored in the arena.
pub struct ARef<T> {
    addr: BlockAddr,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ARef<T> {
    pub fn addr(self) -> BlockAddr {
        self.addr
    }
}

impl<T> Clone for ARef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ARef<T> {}

impl<T> PartialEq for ARef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl<T> Eq for ARef<T> {}

impl<T> std::hash::Hash for ARef<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.addr.hash(state)
    }
}

impl<T> fmt::Debug for ARef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ARef(@{}#{})", self.addr.offset, self.addr.generation)
    }
}

/// Typed handle to a contiguous run of values stored in the arena.
pub struct ASlice<T> {
    offset: u32,
    len: u32,
    generation: NonZeroU32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ASlice<T> {
    pub fn len(self) -> usize {
        self.len as usize
    }

    pub fn is_empty(self) -> bool {
        self.len == 0
    }
}

impl<T> Clone for ASlice<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ASlice<T> {}

impl<T> PartialEq for ASlice<T> {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset && self.len == other.len && self.generation == other.generation
    }
}

impl<T> Eq for ASlice<T> {}

impl<T> fmt::Debug for ASlice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ASlice(@{}+{}#{})", self.offset, self.len, self.generation)
    }
}

/// Four-byte link to a value in the same arena epoch as the record that
/// stores it. Resolve it with the generation of the handle the record was
/// read through.
pub struct ALink<T> {
    /// Block offset plus one; zero is the empty link.
    raw: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ALink<T> {
    pub const NONE: Self = Self {
        raw: 0,
        _marker: PhantomData,
    };

    pub fn new(target: Option<ARef<T>>) -> Self {
        match target {
            // Offsets stay below the capacity, itself at most u32::MAX.
            Some(r) => Self {
                raw: r.addr.offset + 1,
                _marker: PhantomData,
            },
            None => Self::NONE,
        }
    }

    pub fn is_none(self) -> bool {
        self.raw == 0
    }

    pub fn resolve(self, generation: NonZeroU32) -> Option<ARef<T>> {
        let offset = self.raw.checked_sub(1)?;
        Some(ARef {
            addr: BlockAddr { offset, generation },
            _marker: PhantomData,
        })
    }
}

impl<T> Clone for ALink<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ALink<T> {}

impl<T> PartialEq for ALink<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for ALink<T> {}

impl<T> fmt::Debug for ALink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.raw.checked_sub(1) {
            Some(offset) => write!(f, "ALink(@{offset})"),
            None => f.write_str("ALink(none)"),
        }
    }
}

/// Fixed-capacity block arena.
///
/// The arena is `!Send` and `!Sync`; each executor owns its own.
pub struct Arena {
    /// Reserved region. `len()` is the cursor; capacity never changes.
    region: Vec<MaybeUninit<ABlk>>,
    capacity: usize,
    high_water: usize,
    generation: NonZeroU32,
    _not_send_sync: PhantomData<*mut u8>,
}

impl Arena {
    /// Reserve a region of exactly `capacity_blocks` blocks.
    pub fn new(capacity_blocks: usize) -> Result<Self, ArenaError> {
        if capacity_blocks == 0 || capacity_blocks > u32::MAX as usize {
            return Err(ArenaError::Reserve {
                blocks: capacity_blocks,
            });
        }
        let mut region = Vec::new();
        region
            .try_reserve_exact(capacity_blocks)
            .map_err(|_| ArenaError::Reserve {
                blocks: capacity_blocks,
            })?;
        Ok(Self {
            region,
            capacity: capacity_blocks,
            high_water: 0,
            generation: next_generation()?,
            _not_send_sync: PhantomData,
        })
    }

    /// Reserve a region large enough for `bytes`, rounded up to whole blocks.
    pub fn with_capacity_bytes(bytes: usize) -> Result<Self, ArenaError> {
        Self::new(blocks_for(bytes))
    }

    /// Advance the cursor by `block_count` blocks and return the old cursor.
    ///
    /// `allocate(0)` returns the cursor without advancing it.
    pub fn allocate(&mut self, block_count: usize) -> Result<BlockAddr, ArenaError> {
        let cursor = self.region.len();
        let remaining = self.capacity - cursor;
        if block_count > remaining {
            warn!(
                requested = block_count,
                remaining,
                capacity = self.capacity,
                "arena exhausted"
            );
            return Err(ArenaError::OutOfMemory {
                requested: block_count,
                remaining,
                capacity: self.capacity,
            });
        }
        // Stays within the reserved capacity, so the buffer never moves.
        self.region.resize(cursor + block_count, MaybeUninit::uninit());
        self.high_water = self.high_water.max(self.region.len());
        Ok(BlockAddr {
            offset: cursor as u32,
            generation: self.generation,
        })
    }

    /// Store `value` in freshly allocated blocks.
    ///
    /// # Panics
    /// Panics if `T` needs more than block alignment.
    pub fn alloc<T: Copy>(&mut self, value: T) -> Result<ARef<T>, ArenaError> {
        assert!(
            align_of::<T>() <= BLOCK_SIZE,
            "type alignment exceeds arena block alignment"
        );
        let addr = self.allocate(blocks_for(size_of::<T>()))?;
        // SAFETY: the blocks at `addr` were just allocated, lie inside the
        // region and are aligned to BLOCK_SIZE >= align_of::<T>().
        unsafe { self.block_ptr(addr.offset()).cast::<T>().write(value) };
        Ok(ARef {
            addr,
            _marker: PhantomData,
        })
    }

    /// Copy `values` into freshly allocated blocks.
    pub fn alloc_slice<T: Copy>(&mut self, values: &[T]) -> Result<ASlice<T>, ArenaError> {
        assert!(
            align_of::<T>() <= BLOCK_SIZE,
            "type alignment exceeds arena block alignment"
        );
        let bytes = values
            .len()
            .checked_mul(size_of::<T>())
            .ok_or(ArenaError::OutOfMemory {
                requested: usize::MAX,
                remaining: self.remaining_blocks(),
                capacity: self.capacity,
            })?;
        let addr = self.allocate(blocks_for(bytes))?;
        if !values.is_empty() {
            // SAFETY: destination blocks were just allocated and cannot
            // overlap `values`, which lives outside the unused region.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    values.as_ptr(),
                    self.block_ptr(addr.offset()).cast::<T>(),
                    values.len(),
                );
            }
        }
        Ok(ASlice {
            offset: addr.offset,
            len: values.len() as u32,
            generation: addr.generation,
            _marker: PhantomData,
        })
    }

    /// Store `header` with `tail` right behind it in one contiguous run.
    ///
    /// Use [`Arena::tail_of`] on the returned handle to reach the tail.
    pub fn alloc_with_tail<H: Copy, T: Copy>(
        &mut self,
        header: H,
        tail: &[T],
    ) -> Result<ARef<H>, ArenaError> {
        assert!(
            align_of::<H>() <= BLOCK_SIZE && align_of::<T>() <= BLOCK_SIZE,
            "type alignment exceeds arena block alignment"
        );
        let header_blocks = blocks_for(size_of::<H>());
        let total = tail
            .len()
            .checked_mul(size_of::<T>())
            .map(blocks_for)
            .and_then(|b| b.checked_add(header_blocks))
            .ok_or(ArenaError::OutOfMemory {
                requested: usize::MAX,
                remaining: self.remaining_blocks(),
                capacity: self.capacity,
            })?;
        let addr = self.allocate(total)?;
        // SAFETY: the run at `addr` was just allocated with room for the
        // header followed by the tail, both at block-aligned offsets.
        unsafe {
            self.block_ptr(addr.offset()).cast::<H>().write(header);
            if !tail.is_empty() {
                std::ptr::copy_nonoverlapping(
                    tail.as_ptr(),
                    self.block_ptr(addr.offset() + header_blocks).cast::<T>(),
                    tail.len(),
                );
            }
        }
        Ok(ARef {
            addr,
            _marker: PhantomData,
        })
    }

    /// Handle to the `len` values stored behind the header at `r` by
    /// [`Arena::alloc_with_tail`]. Checked on access like any slice.
    pub fn tail_of<H, T>(r: ARef<H>, len: usize) -> ASlice<T> {
        let header_blocks = blocks_for(size_of::<H>()) as u32;
        ASlice {
            offset: r.addr.offset.saturating_add(header_blocks),
            len: u32::try_from(len).unwrap_or(u32::MAX),
            generation: r.addr.generation,
            _marker: PhantomData,
        }
    }

    /// # Panics
    /// Panics if `r` is stale or belongs to another arena.
    pub fn get<T: Copy>(&self, r: ARef<T>) -> &T {
        match self.try_get(r) {
            Some(v) => v,
            None => panic!("stale arena reference {r:?}"),
        }
    }

    pub fn try_get<T: Copy>(&self, r: ARef<T>) -> Option<&T> {
        if !self.is_live(r.addr.generation, r.addr.offset(), blocks_for(size_of::<T>())) {
            return None;
        }
        // SAFETY: liveness check guarantees the value was written in this
        // epoch and the blocks are inside the initialized prefix.
        Some(unsafe { &*self.block_ptr_const(r.addr.offset()).cast::<T>() })
    }

    /// # Panics
    /// Panics if `r` is stale or belongs to another arena.
    pub fn get_mut<T: Copy>(&mut self, r: ARef<T>) -> &mut T {
        if !self.is_live(r.addr.generation, r.addr.offset(), blocks_for(size_of::<T>())) {
            panic!("stale arena reference {r:?}");
        }
        // SAFETY: as in `try_get`; `&mut self` makes the borrow unique.
        unsafe { &mut *self.block_ptr(r.addr.offset()).cast::<T>() }
    }

    /// # Panics
    /// Panics if `s` is stale or belongs to another arena.
    pub fn slice<T: Copy>(&self, s: ASlice<T>) -> &[T] {
        match self.try_slice(s) {
            Some(v) => v,
            None => panic!("stale arena slice {s:?}"),
        }
    }

    pub fn try_slice<T: Copy>(&self, s: ASlice<T>) -> Option<&[T]> {
        if s.is_empty() {
            return Some(&[]);
        }
        if !self.is_live(s.generation, s.offset as usize, Self::slice_blocks::<T>(s)) {
            return None;
        }
        // SAFETY: liveness check covers all `len` elements.
        Some(unsafe {
            std::slice::from_raw_parts(
                self.block_ptr_const(s.offset as usize).cast::<T>(),
                s.len(),
            )
        })
    }

    pub fn try_slice_mut<T: Copy>(&mut self, s: ASlice<T>) -> Option<&mut [T]> {
        if s.is_empty() {
            return Some(&mut []);
        }
        if !self.is_live(s.generation, s.offset as usize, Self::slice_blocks::<T>(s)) {
            return None;
        }
        // SAFETY: as in `try_slice`; `&mut self` makes the borrow unique.
        Some(unsafe {
            std::slice::from_raw_parts_mut(self.block_ptr(s.offset as usize).cast::<T>(), s.len())
        })
    }

    /// Raw address of an allocated block run, for tagging or FFI.
    pub fn as_ptr(&self, addr: BlockAddr) -> Option<*const ABlk> {
        if !self.is_live(addr.generation, addr.offset(), 0) {
            return None;
        }
        Some(self.block_ptr_const(addr.offset()).cast::<ABlk>())
    }

    /// Rewind the cursor to the region start and begin a new generation.
    ///
    /// Every handle issued before the reset becomes stale. When no fresh
    /// generation is left the arena is left untouched.
    pub fn reset(&mut self) -> Result<(), ArenaError> {
        let generation = next_generation()?;
        let released = self.region.len();
        self.region.clear();
        self.generation = generation;
        debug!(
            released_blocks = released,
            high_water_blocks = self.high_water,
            "arena reset"
        );
        Ok(())
    }

    pub fn capacity_blocks(&self) -> usize {
        self.capacity
    }

    pub fn used_blocks(&self) -> usize {
        self.region.len()
    }

    pub fn remaining_blocks(&self) -> usize {
        self.capacity - self.region.len()
    }

    /// Largest cursor position reached across all epochs.
    pub fn high_water_blocks(&self) -> usize {
        self.high_water
    }

    pub fn bytes_allocated(&self) -> usize {
        self.region.len() * BLOCK_SIZE
    }

    pub fn generation(&self) -> NonZeroU32 {
        self.generation
    }

    // --- internal helpers ---

    fn slice_blocks<T>(s: ASlice<T>) -> usize {
        blocks_for(s.len().saturating_mul(size_of::<T>()))
    }

    fn is_live(&self, generation: NonZeroU32, offset: usize, blocks: usize) -> bool {
        generation == self.generation
            && offset
                .checked_add(blocks)
                .is_some_and(|end| end <= self.region.len())
    }

    fn block_ptr(&mut self, offset: usize) -> *mut MaybeUninit<ABlk> {
        // SAFETY: callers pass offsets inside the reserved capacity.
        unsafe { self.region.as_mut_ptr().add(offset) }
    }

    fn block_ptr_const(&self, offset: usize) -> *const MaybeUninit<ABlk> {
        // SAFETY: callers pass offsets inside the reserved capacity.
        unsafe { self.region.as_ptr().add(offset) }
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("capacity_blocks", &self.capacity)
            .field("used_blocks", &self.used_blocks())
            .field("high_water_blocks", &self.high_water)
            .field("generation", &self.generation)
            .finish()
    }
}
