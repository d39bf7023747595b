// SPDX-License-Identifier: Apache-2.0

//! Bucketed memory pool.
//!
//! Blocks are served from bump-allocated chunks and recycled through one
//! free list per size bucket; bucket capacities follow the Fibonacci table
//! in [`crate::fibonacci`]. Two variants exist:
//!
//! - [`FibAlloc`] carries no per-block metadata and does no verification.
//! - [`CheckedFibAlloc`] prefixes every block with `(owning_chunk, exp,
//!   integrity code)` and keeps a live-block count per chunk. A failed check
//!   is a fatal panic: once the bookkeeping is trashed there is nothing
//!   sensible left to return.
//!
//! [`Pool`] bundles the allocators a document tree needs (node units and
//! byte units); debug builds get the checked variant.

use core::marker::PhantomData;
use core::mem;
use core::ptr;
use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::fibonacci::{self, SizeType};

/// Unit count a fresh chunk targets when no larger request forces its size.
const DEFAULT_UNITS: SizeType = 8192;

static POOL_ID: AtomicU64 = AtomicU64::new(1);

fn next_pool_id() -> u64 {
    POOL_ID.fetch_add(1, Ordering::Relaxed)
}

/****************************************************************************
 * production variant
 ***************************************************************************/

#[repr(C)]
struct ChunkHead {
    next: *mut ChunkHead,
    exp: u8,
}

#[repr(C)]
struct FreeLink {
    next: *mut FreeLink,
}

/// Free-list-per-bucket pool without per-block headers.
///
/// `deallocate` trusts the caller: the pointer must come from this allocator
/// with the same declared size. Use [`CheckedFibAlloc`] to have that
/// verified.
pub struct FibAlloc<T> {
    chunks: *mut ChunkHead,
    /// Units consumed in the front chunk.
    used: SizeType,
    free: [*mut FreeLink; fibonacci::LEN],
    _marker: PhantomData<T>,
}

impl<T> FibAlloc<T> {
    const UNIT: usize = mem::size_of::<T>();
    const ALIGN: usize = {
        let link = mem::size_of::<FreeLink>();
        let t = mem::align_of::<T>();
        if link > t {
            link
        } else {
            t
        }
    };
    /// Units that can hold one free-list link.
    const MIN_UNITS: usize = (Self::ALIGN + Self::UNIT - 1) / Self::UNIT;
    const HEAD_OFF: usize = {
        let aligned = (mem::size_of::<ChunkHead>() + Self::ALIGN - 1) & !(Self::ALIGN - 1);
        ((aligned + Self::UNIT - 1) / Self::UNIT) * Self::UNIT
    };
    const MIN_EXP: u8 = fibonacci::right(Self::MIN_UNITS as SizeType);
    const DFT_EXP: u8 = fibonacci::left(DEFAULT_UNITS);

    const ALIGN_OK: () = assert!(
        Self::UNIT % Self::ALIGN == 0 || Self::ALIGN % Self::UNIT == 0,
        "element size must divide or be a multiple of the block alignment"
    );

    pub fn new() -> Self {
        let () = Self::ALIGN_OK;
        Self {
            chunks: ptr::null_mut(),
            used: 0,
            free: [ptr::null_mut(); fibonacci::LEN],
            _marker: PhantomData,
        }
    }

    /// A block that holds at least `n` consecutive `T`s. Never null.
    pub fn allocate(&mut self, n: SizeType) -> *mut T {
        let exp = Self::test_exp(fibonacci::right(n), n);
        let mut mem = self.flist_alloc(exp);
        if mem.is_null() {
            mem = self.chunk_alloc(exp);
        }
        if (mem as usize) & (Self::ALIGN - 1) != 0 {
            panic!("memory `{mem:p}` is not aligned");
        }
        mem
    }

    /// Return a block to its bucket. `mem` must come from this allocator
    /// with the same declared size.
    pub fn deallocate(&mut self, mem: *mut T, n: SizeType) {
        if mem.is_null() {
            return;
        }
        if (mem as usize) & (Self::ALIGN - 1) != 0 {
            panic!("memory `{mem:p}` is not aligned");
        }
        let exp = Self::test_exp(fibonacci::right(n), n);
        self.free_block(mem, exp);
    }

    /// Log per-bucket free counts and total chunk footprint.
    pub fn report(&self) {
        let mut total_free_units: u64 = 0;
        for exp in 0..fibonacci::LEN as u8 {
            let mut cnt = 0usize;
            let mut it = self.free[exp as usize];
            while !it.is_null() {
                cnt += 1;
                it = unsafe { (*it).next };
            }
            if cnt > 0 {
                total_free_units += cnt as u64 * fibonacci::at(exp) as u64;
                log::debug!("bucket {exp:02}: {cnt} free blocks");
            }
        }
        let mut chunk_units: u64 = 0;
        let mut chunk_cnt = 0usize;
        let mut it = self.chunks;
        while !it.is_null() {
            chunk_units += fibonacci::at(unsafe { (*it).exp }) as u64;
            chunk_cnt += 1;
            it = unsafe { (*it).next };
        }
        log::debug!(
            "{chunk_cnt} chunks, {} bytes allocated, {} bytes on free lists",
            chunk_units * Self::UNIT as u64,
            total_free_units * Self::UNIT as u64
        );
    }

    fn test_exp(exp: u8, n: SizeType) -> u8 {
        if fibonacci::at(exp) < n {
            panic!("size `{n}` is too large for this allocator");
        }
        if exp < Self::MIN_EXP {
            Self::MIN_EXP
        } else {
            exp
        }
    }

    fn align_units(units: SizeType) -> SizeType {
        (((units as usize * Self::UNIT + Self::ALIGN - 1) & !(Self::ALIGN - 1)) / Self::UNIT)
            as SizeType
    }

    fn chunk_layout(exp: u8) -> Layout {
        let size = Self::HEAD_OFF + fibonacci::at(exp) as usize * Self::UNIT;
        Layout::from_size_align(size, Self::ALIGN).expect("chunk layout")
    }

    fn flist_alloc(&mut self, exp: u8) -> *mut T {
        let head = self.free[exp as usize];
        if head.is_null() {
            return ptr::null_mut();
        }
        self.free[exp as usize] = unsafe { (*head).next };
        head as *mut T
    }

    fn free_block(&mut self, mem: *mut T, exp: u8) {
        let link = mem as *mut FreeLink;
        unsafe {
            (*link).next = self.free[exp as usize];
        }
        self.free[exp as usize] = link;
    }

    fn chunk_alloc(&mut self, exp: u8) -> *mut T {
        unsafe {
            if self.chunks.is_null() {
                self.make_chunk(exp.max(Self::DFT_EXP));
            }
            let rest = fibonacci::at((*self.chunks).exp) - self.used;
            let need = fibonacci::at(exp);
            if need > rest {
                self.make_chunk(exp.max(Self::DFT_EXP));
            }

            let base = (self.chunks as *mut u8).add(Self::HEAD_OFF) as *mut T;
            let mem = base.add(self.used as usize);

            self.used += Self::align_units(need);
            let cap = fibonacci::at((*self.chunks).exp);
            if self.used > cap {
                self.used = cap;
            }
            mem
        }
    }

    fn make_chunk(&mut self, exp: u8) {
        let exp = Self::test_exp(exp, 0);
        unsafe {
            // Carve the unused tail of the current chunk into free blocks
            // before abandoning it.
            if !self.chunks.is_null() {
                let mut rest = fibonacci::at((*self.chunks).exp) - self.used;
                while rest > fibonacci::at(Self::MIN_EXP) {
                    let rexp = fibonacci::left(rest);
                    if rexp < Self::MIN_EXP {
                        break;
                    }
                    let mem = self.chunk_alloc(rexp);
                    self.free_block(mem, rexp);
                    rest = fibonacci::at((*self.chunks).exp) - self.used;
                }
            }

            let layout = Self::chunk_layout(exp);
            let mem = alloc(layout) as *mut ChunkHead;
            if mem.is_null() {
                handle_alloc_error(layout);
            }
            (*mem).next = self.chunks;
            (*mem).exp = exp;
            self.chunks = mem;
            self.used = 0;
        }
    }

    #[cfg(test)]
    fn free_count(&self, exp: u8) -> usize {
        let mut cnt = 0;
        let mut it = self.free[exp as usize];
        while !it.is_null() {
            cnt += 1;
            it = unsafe { (*it).next };
        }
        cnt
    }
}

impl<T> Default for FibAlloc<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for FibAlloc<T> {
    fn drop(&mut self) {
        unsafe {
            let mut it = self.chunks;
            while !it.is_null() {
                let next = (*it).next;
                dealloc(it as *mut u8, Self::chunk_layout((*it).exp));
                it = next;
            }
        }
        self.chunks = ptr::null_mut();
    }
}

/****************************************************************************
 * checked variant
 ***************************************************************************/

#[repr(C)]
struct CChunkHead {
    next: *mut CChunkHead,
    exp: u8,
    code: u16,
    live: u32,
}

/// Block prefix while the block is handed out.
#[repr(C)]
struct BlockTag {
    owner: *mut CChunkHead,
    exp: u8,
    code: u16,
}

/// Block prefix while the block sits on a free list.
#[repr(C)]
struct CFreeLink {
    owner: *mut CChunkHead,
    next: *mut CFreeLink,
}

/// [`FibAlloc`] plus integrity codes on every block and chunk.
///
/// Each live block is stamped with a hash of `(block address, pool identity,
/// exp)`; deallocation verifies the stamp, the declared size and the owning
/// chunk's live count. Dropping the allocator with live blocks panics.
pub struct CheckedFibAlloc<T> {
    chunks: *mut CChunkHead,
    used: SizeType,
    free: [*mut CFreeLink; fibonacci::LEN],
    id: u64,
    _marker: PhantomData<T>,
}

impl<T> CheckedFibAlloc<T> {
    const UNIT: usize = mem::size_of::<T>();
    const ALIGN: usize = {
        let link = mem::size_of::<CFreeLink>();
        let t = mem::align_of::<T>();
        if link > t {
            link
        } else {
            t
        }
    };
    /// Units occupied by the block prefix.
    const MIN_UNITS: usize = (Self::ALIGN + Self::UNIT - 1) / Self::UNIT;
    const PREFIX_BYTES: usize = Self::MIN_UNITS * Self::UNIT;
    const HEAD_OFF: usize = {
        let aligned = (mem::size_of::<CChunkHead>() + Self::ALIGN - 1) & !(Self::ALIGN - 1);
        ((aligned + Self::UNIT - 1) / Self::UNIT) * Self::UNIT
    };
    const MIN_EXP: u8 = fibonacci::right(Self::MIN_UNITS as SizeType);
    const DFT_EXP: u8 = fibonacci::left(DEFAULT_UNITS);
    const MIN_U: SizeType = Self::MIN_UNITS as SizeType;

    const ALIGN_OK: () = assert!(
        Self::UNIT % Self::ALIGN == 0 || Self::ALIGN % Self::UNIT == 0,
        "element size must divide or be a multiple of the block alignment"
    );

    pub fn new() -> Self {
        let () = Self::ALIGN_OK;
        Self {
            chunks: ptr::null_mut(),
            used: 0,
            free: [ptr::null_mut(); fibonacci::LEN],
            id: next_pool_id(),
            _marker: PhantomData,
        }
    }

    pub fn allocate(&mut self, n: SizeType) -> *mut T {
        let exp = Self::test_exp(fibonacci::right(n), n);
        let mut mem = self.flist_alloc(exp);
        if mem.is_null() {
            mem = self.chunk_alloc(exp);
        }
        if (mem as usize) & (Self::ALIGN - 1) != 0 {
            panic!("memory `{mem:p}` is not aligned");
        }
        mem
    }

    pub fn deallocate(&mut self, mem: *mut T, n: SizeType) {
        if mem.is_null() {
            return;
        }
        if (mem as usize) & (Self::ALIGN - 1) != 0 {
            panic!("memory `{mem:p}` is not aligned");
        }
        let exp = Self::test_exp(fibonacci::right(n), n);
        self.free_space(mem, exp);
    }

    pub fn report(&self) {
        let mut live = 0u64;
        let mut chunk_cnt = 0usize;
        let mut it = self.chunks;
        while !it.is_null() {
            live += unsafe { (*it).live } as u64;
            chunk_cnt += 1;
            it = unsafe { (*it).next };
        }
        log::debug!("{chunk_cnt} chunks, {live} live blocks");
    }

    fn test_exp(exp: u8, n: SizeType) -> u8 {
        if fibonacci::at(exp) < n {
            panic!("size `{n}` is too large for this allocator");
        }
        if exp < Self::MIN_EXP {
            Self::MIN_EXP
        } else {
            exp
        }
    }

    fn align_units(units: SizeType) -> SizeType {
        (((units as usize * Self::UNIT + Self::ALIGN - 1) & !(Self::ALIGN - 1)) / Self::UNIT)
            as SizeType
    }

    fn chunk_layout(exp: u8) -> Layout {
        let block_units = Self::MIN_UNITS + fibonacci::at(exp) as usize;
        let size = Self::HEAD_OFF + block_units * Self::UNIT;
        Layout::from_size_align(size, Self::ALIGN).expect("chunk layout")
    }

    fn make_code(&self, src: *const u8, exp: u8) -> u16 {
        let mut hash = exp as u16;
        let mut addr = (src as usize as u64) ^ self.id.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        while addr != 0 {
            hash = hash ^ 23333u16 ^ (addr as u16);
            addr >>= 16;
        }
        hash ^ ((hash >> 8) | (hash << 8))
    }

    fn flist_alloc(&mut self, exp: u8) -> *mut T {
        unsafe {
            let head = self.free[exp as usize];
            if head.is_null() {
                return ptr::null_mut();
            }
            self.free[exp as usize] = (*head).next;

            let owner = (*head).owner;
            if owner.is_null() || (*owner).code != self.make_code(owner as *const u8, (*owner).exp)
            {
                panic!("memory chunk was modified unexpectedly or is invalid");
            }
            (*owner).live = match (*owner).live.checked_add(1) {
                Some(v) => v,
                None => panic!("memory pool produced too much fragmentation or an internal error occurred"),
            };

            let tag = head as *mut BlockTag;
            (*tag).owner = owner;
            (*tag).exp = exp;
            (*tag).code = self.make_code(tag as *const u8, exp);

            (head as *mut u8).add(Self::PREFIX_BYTES) as *mut T
        }
    }

    fn chunk_alloc(&mut self, exp: u8) -> *mut T {
        unsafe {
            if self.chunks.is_null() {
                self.make_chunk(exp.max(Self::DFT_EXP));
            }
            let rest = Self::MIN_U + fibonacci::at((*self.chunks).exp) - self.used;
            let need = Self::MIN_U + fibonacci::at(exp);
            if need > rest {
                self.make_chunk(exp.max(Self::DFT_EXP));
            }

            let block = (self.chunks as *mut u8)
                .add(Self::HEAD_OFF)
                .add(self.used as usize * Self::UNIT);
            let tag = block as *mut BlockTag;
            (*tag).owner = self.chunks;
            (*tag).exp = exp;
            (*tag).code = self.make_code(tag as *const u8, exp);

            self.used += Self::MIN_U + Self::align_units(fibonacci::at(exp));
            let cap = Self::MIN_U + fibonacci::at((*self.chunks).exp);
            if self.used > cap {
                self.used = cap;
            }
            (*self.chunks).live = match (*self.chunks).live.checked_add(1) {
                Some(v) => v,
                None => panic!("memory pool produced too much fragmentation or an internal error occurred"),
            };

            block.add(Self::PREFIX_BYTES) as *mut T
        }
    }

    fn make_chunk(&mut self, exp: u8) {
        let exp = Self::test_exp(exp, 0);
        unsafe {
            if !self.chunks.is_null() {
                let c = self.chunks;
                if (*c).code != self.make_code(c as *const u8, (*c).exp) {
                    panic!("memory chunk was modified unexpectedly or is invalid");
                }
                let total = Self::MIN_U + fibonacci::at((*c).exp);
                let mut rest = total - self.used;
                while rest > Self::MIN_U + fibonacci::at(Self::MIN_EXP) {
                    let rexp = fibonacci::left(rest - Self::MIN_U);
                    if rexp < Self::MIN_EXP {
                        break;
                    }
                    let mem = self.chunk_alloc(rexp);
                    self.free_space(mem, rexp);
                    rest = Self::MIN_U + fibonacci::at((*self.chunks).exp) - self.used;
                }
            }

            let layout = Self::chunk_layout(exp);
            let mem = alloc(layout) as *mut CChunkHead;
            if mem.is_null() {
                handle_alloc_error(layout);
            }
            (*mem).next = self.chunks;
            (*mem).exp = exp;
            (*mem).live = 0;
            self.chunks = mem;
            // The code covers the final header fields.
            (*mem).code = self.make_code(mem as *const u8, exp);
            self.used = 0;
        }
    }

    fn free_space(&mut self, mem: *mut T, exp: u8) {
        if mem.is_null() {
            panic!("argument `mem` is null");
        }
        if exp < Self::MIN_EXP || exp as usize >= fibonacci::LEN {
            panic!("argument `exp` is invalid");
        }
        unsafe {
            let block = (mem as *mut u8).sub(Self::PREFIX_BYTES);
            let tag = block as *mut BlockTag;
            if (*tag).exp != exp || (*tag).code != self.make_code(tag as *const u8, (*tag).exp) {
                panic!(
                    "failed to deallocate memory: it was modified, or the size is wrong, \
                     or it was deallocated more than once, or it is foreign to this pool"
                );
            }
            let owner = (*tag).owner;
            if owner.is_null() || (*owner).code != self.make_code(owner as *const u8, (*owner).exp)
            {
                panic!("memory chunk was modified unexpectedly or is invalid");
            }
            if (*owner).live == 0 {
                panic!("memory chunk was modified unexpectedly or is invalid");
            }
            (*owner).live -= 1;

            let link = block as *mut CFreeLink;
            (*link).owner = owner;
            (*link).next = self.free[exp as usize];
            self.free[exp as usize] = link;
        }
    }

    #[cfg(test)]
    fn live_blocks(&self) -> u64 {
        let mut live = 0u64;
        let mut it = self.chunks;
        while !it.is_null() {
            live += unsafe { (*it).live } as u64;
            it = unsafe { (*it).next };
        }
        live
    }
}

impl<T> Default for CheckedFibAlloc<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for CheckedFibAlloc<T> {
    fn drop(&mut self) {
        unsafe {
            let mut it = self.chunks;
            while !it.is_null() {
                if (*it).code != self.make_code(it as *const u8, (*it).exp) {
                    panic!("memory chunk was modified unexpectedly or is invalid");
                }
                if (*it).live != 0 {
                    panic!(
                        "memory pool dropped with {} live blocks (leak)",
                        (*it).live
                    );
                }
                let next = (*it).next;
                dealloc(it as *mut u8, Self::chunk_layout((*it).exp));
                it = next;
            }
        }
        self.chunks = ptr::null_mut();
    }
}

/****************************************************************************
 * pool
 ***************************************************************************/

#[cfg(debug_assertions)]
type DefaultAlloc<T> = CheckedFibAlloc<T>;
#[cfg(not(debug_assertions))]
type DefaultAlloc<T> = FibAlloc<T>;

/// The allocators backing one [`crate::Tree`]: node units for sequence and
/// map buffers, byte units for string buffers. Exclusively owned by its
/// tree; no cross-tree references exist.
pub struct Pool {
    nodes: DefaultAlloc<crate::node::Node>,
    bytes: DefaultAlloc<u8>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").finish()
    }
}

impl Pool {
    pub fn new() -> Self {
        Self {
            nodes: DefaultAlloc::new(),
            bytes: DefaultAlloc::new(),
        }
    }

    pub(crate) fn alloc_nodes(&mut self, n: SizeType) -> *mut crate::node::Node {
        self.nodes.allocate(n)
    }

    pub(crate) fn free_nodes(&mut self, mem: *mut crate::node::Node, n: SizeType) {
        self.nodes.deallocate(mem, n)
    }

    pub(crate) fn alloc_bytes(&mut self, n: SizeType) -> *mut u8 {
        self.bytes.allocate(n)
    }

    pub(crate) fn free_bytes(&mut self, mem: *mut u8, n: SizeType) {
        self.bytes.deallocate(mem, n)
    }

    /// Log the pool's bucket occupancy.
    pub fn report(&self) {
        self.nodes.report();
        self.bytes.report();
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fibonacci::at;

    #[test]
    fn test_alloc_holds_data() {
        let mut a = FibAlloc::<u64>::new();
        let p = a.allocate(10);
        unsafe {
            let s = core::slice::from_raw_parts_mut(p, 10);
            for (i, v) in s.iter_mut().enumerate() {
                *v = i as u64 * 3;
            }
            for (i, v) in s.iter().enumerate() {
                assert_eq!(*v, i as u64 * 3);
            }
        }
        a.deallocate(p, 10);
    }

    #[test]
    fn test_free_list_reuse() {
        let mut a = FibAlloc::<u64>::new();
        // 10 rounds up to F(7) = 13; 12 shares that bucket.
        let p = a.allocate(10);
        a.deallocate(p, 10);
        assert_eq!(a.free_count(7), 1);
        let q = a.allocate(12);
        assert_eq!(q, p);
        assert_eq!(a.free_count(7), 0);
        a.deallocate(q, 12);
    }

    #[test]
    fn test_distinct_blocks() {
        let mut a = FibAlloc::<u64>::new();
        let p = a.allocate(5);
        let q = a.allocate(5);
        assert_ne!(p, q);
        a.deallocate(p, 5);
        a.deallocate(q, 5);
        // Both land in bucket right(5) = 5.
        assert_eq!(a.free_count(5), 2);
    }

    #[test]
    fn test_small_requests_share_min_bucket() {
        let mut a = FibAlloc::<u8>::new();
        // For byte units the link needs 8 bytes, so MIN_EXP is right(8) = 6.
        let p = a.allocate(1);
        a.deallocate(p, 1);
        let q = a.allocate(8);
        assert_eq!(q, p);
        a.deallocate(q, 8);
    }

    #[test]
    fn test_alignment() {
        let mut a = FibAlloc::<u8>::new();
        for n in [1u32, 3, 20, 100, 1000] {
            let p = a.allocate(n);
            assert_eq!(p as usize % 8, 0, "allocate({n}) misaligned");
            a.deallocate(p, n);
        }
    }

    #[test]
    fn test_oversized_chunk() {
        let mut a = FibAlloc::<u8>::new();
        // Larger than the default chunk target; forces a dedicated chunk.
        let n = at(24); // 46368
        let p = a.allocate(n);
        unsafe {
            core::ptr::write_bytes(p, 0xAB, n as usize);
            assert_eq!(*p.add(n as usize - 1), 0xAB);
        }
        a.deallocate(p, n);
    }

    #[test]
    fn test_chunk_tail_donated() {
        let mut a = FibAlloc::<u8>::new();
        // Fill most of the first chunk, then force a second one. The first
        // chunk's tail must land on free lists instead of being wasted.
        let p = a.allocate(at(19)); // 4181 of the 6765-unit default chunk
        let big = a.allocate(at(22)); // 17711, needs a fresh chunk
        let mut donated = 0usize;
        for exp in 0..fibonacci::LEN as u8 {
            donated += a.free_count(exp);
        }
        assert!(donated > 0, "no tail blocks were donated");
        a.deallocate(p, at(19));
        a.deallocate(big, at(22));
    }

    #[test]
    #[should_panic(expected = "too large")]
    fn test_oversized_request_is_fatal() {
        let mut a = FibAlloc::<u8>::new();
        let _ = a.allocate(3_000_000_000);
    }

    #[test]
    fn test_checked_round_trip() {
        let mut a = CheckedFibAlloc::<u64>::new();
        let p = a.allocate(4);
        unsafe {
            *p = 42;
            *p.add(3) = 43;
        }
        assert_eq!(a.live_blocks(), 1);
        a.deallocate(p, 4);
        assert_eq!(a.live_blocks(), 0);
    }

    #[test]
    fn test_checked_reuse_keeps_codes_valid() {
        let mut a = CheckedFibAlloc::<u64>::new();
        let p = a.allocate(6);
        a.deallocate(p, 6);
        let q = a.allocate(6);
        assert_eq!(q, p);
        a.deallocate(q, 6);
        assert_eq!(a.live_blocks(), 0);
    }

    #[test]
    #[should_panic(expected = "deallocate")]
    fn test_checked_wrong_size_is_fatal() {
        let mut a = CheckedFibAlloc::<u64>::new();
        let p = a.allocate(4);
        // Declared size maps to a different bucket: bookkeeping mismatch.
        a.deallocate(p, 100);
    }

    #[test]
    #[should_panic(expected = "deallocate")]
    fn test_checked_double_free_is_fatal() {
        let mut a = CheckedFibAlloc::<u64>::new();
        let p = a.allocate(4);
        a.deallocate(p, 4);
        let _q = a.allocate(4); // reuses and restamps the block
        a.deallocate(p, 4);
        a.deallocate(p, 4);
    }

    #[test]
    #[should_panic(expected = "live blocks")]
    fn test_checked_leak_detected_at_drop() {
        let mut a = CheckedFibAlloc::<u64>::new();
        let _leaked = a.allocate(4);
        drop(a);
    }

    #[test]
    fn test_balanced_sequences_leave_only_free_blocks() {
        let mut a = CheckedFibAlloc::<u8>::new();
        let mut blocks = Vec::new();
        for i in 0..64u32 {
            blocks.push((a.allocate(i * 7 + 1), i * 7 + 1));
        }
        for (p, n) in blocks {
            a.deallocate(p, n);
        }
        assert_eq!(a.live_blocks(), 0);
        // Drop must not panic.
    }

    #[test]
    fn test_pool_bundles_units() {
        let mut pool = Pool::new();
        let nodes = pool.alloc_nodes(3);
        let bytes = pool.alloc_bytes(21);
        assert!(!nodes.is_null());
        assert!(!bytes.is_null());
        pool.free_nodes(nodes, 3);
        pool.free_bytes(bytes, 21);
        pool.report();
    }
}
