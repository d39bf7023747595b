// SPDX-License-Identifier: Apache-2.0

//! The variant node.
//!
//! A [`Node`] is a 16-byte tagged union: null, int64, double, string,
//! sequence or map. Container payloads live in the owning tree's [`Pool`]
//! with capacities drawn from the Fibonacci table; short strings are stored
//! inline (no pool traffic for up to [`SMALL_STR_CAP`] payload bytes).
//!
//! Nodes do not implement `Drop`: storage belongs to the pool, so teardown
//! is explicit via [`Node::destruct`] with the pool that backs the node.
//! [`crate::Tree`] does this for the root on drop.

use core::ptr;

use crate::arena::Pool;
use crate::error::Error;
use crate::fibonacci::{self, SizeType};

/// Payload bytes a string can hold without touching the pool.
pub const SMALL_STR_CAP: SizeType = 13;

/// Inline string buffer length, including the trailing NUL.
const SHORT_RAW: usize = 14;

/// Inline size-byte sentinel: this node uses the large representation.
const LONG_MARK: u8 = 0xFF;

/// Node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    /// Empty; the default, and the sentinel during destructive moves.
    Null = 0,
    I64 = 1,
    F64 = 2,
    Str = 3,
    Seq = 4,
    Map = 5,
}

impl Tag {
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Null => "null",
            Tag::I64 => "int64",
            Tag::F64 => "double",
            Tag::Str => "string",
            Tag::Seq => "sequence",
            Tag::Map => "map",
        }
    }
}

#[derive(Clone, Copy)]
#[repr(C)]
struct NilLayout {
    tag: u8,
    pad: [u8; 15],
}

#[derive(Clone, Copy)]
#[repr(C)]
struct I64Layout {
    tag: u8,
    pad: [u8; 7],
    val: i64,
}

#[derive(Clone, Copy)]
#[repr(C)]
struct F64Layout {
    tag: u8,
    pad: [u8; 7],
    val: f64,
}

/// Small string: `siz` counts payload plus the trailing NUL, or holds
/// [`LONG_MARK`] when the node has switched to the large representation.
#[derive(Clone, Copy)]
#[repr(C)]
struct ShortStrLayout {
    tag: u8,
    siz: u8,
    raw: [u8; SHORT_RAW],
}

/// Large string: `siz` counts payload plus the trailing NUL; the buffer
/// holds `F(exp)` bytes.
#[derive(Clone, Copy)]
#[repr(C)]
struct LongStrLayout {
    tag: u8,
    pad: [u8; 2],
    exp: u8,
    siz: SizeType,
    raw: *mut u8,
}

#[derive(Clone, Copy)]
#[repr(C)]
struct SeqLayout {
    tag: u8,
    pad: [u8; 2],
    exp: u8,
    siz: SizeType,
    raw: *mut Node,
}

#[derive(Clone, Copy)]
#[repr(C)]
struct MapLayout {
    tag: u8,
    pad: [u8; 2],
    exp: u8,
    siz: SizeType,
    raw: *mut Pair,
}

/// A map entry. Key and value may carry any tag.
#[repr(C)]
pub struct Pair {
    pub key: Node,
    pub val: Node,
}

impl Pair {
    pub fn new() -> Self {
        Self {
            key: Node::new(),
            val: Node::new(),
        }
    }
}

impl Default for Pair {
    fn default() -> Self {
        Self::new()
    }
}

/// A value in the document tree; exactly one of six tagged variants.
///
/// The tag byte is the common initial byte of every layout, so it can be
/// read regardless of the active variant.
#[repr(C)]
pub union Node {
    tag: u8,
    nil: NilLayout,
    int: I64Layout,
    dbl: F64Layout,
    sstr: ShortStrLayout,
    lstr: LongStrLayout,
    seq: SeqLayout,
    map: MapLayout,
}

const _: () = assert!(core::mem::size_of::<Node>() == 16);
const _: () = assert!(core::mem::align_of::<Node>() == 8);
const _: () = assert!(core::mem::size_of::<Pair>() == 32);

impl Node {
    /// A fresh `Null` node.
    pub fn new() -> Self {
        Node {
            nil: NilLayout {
                tag: Tag::Null as u8,
                pad: [0; 15],
            },
        }
    }

    /// Initialise as an empty value of `tag`, without destructing first.
    /// The node must be `Null` (or freshly created), or its storage leaks.
    pub fn construct_as(&mut self, tag: Tag, pool: &mut Pool) {
        let _ = pool;
        unsafe {
            match tag {
                Tag::Null => self.tag = Tag::Null as u8,
                Tag::I64 => {
                    self.int = I64Layout {
                        tag: Tag::I64 as u8,
                        pad: [0; 7],
                        val: 0,
                    }
                }
                Tag::F64 => {
                    self.dbl = F64Layout {
                        tag: Tag::F64 as u8,
                        pad: [0; 7],
                        val: 0.0,
                    }
                }
                Tag::Str => {
                    self.sstr = ShortStrLayout {
                        tag: Tag::Str as u8,
                        siz: 1, // the trailing NUL
                        raw: [0u8; SHORT_RAW],
                    }
                }
                Tag::Seq => {
                    self.seq = SeqLayout {
                        tag: Tag::Seq as u8,
                        pad: [0; 2],
                        exp: 0,
                        siz: 0,
                        raw: ptr::null_mut(),
                    }
                }
                Tag::Map => {
                    self.map = MapLayout {
                        tag: Tag::Map as u8,
                        pad: [0; 2],
                        exp: 0,
                        siz: 0,
                        raw: ptr::null_mut(),
                    }
                }
            }
        }
    }

    /// Recursive destroy: children first, then pool buffers, ending `Null`.
    pub fn destruct(&mut self, pool: &mut Pool) {
        // Mark Null before recursing so a cycle created through move/copy
        // misuse cannot recurse forever.
        let tag = unsafe { self.tag };
        unsafe {
            self.tag = Tag::Null as u8;
        }
        match tag {
            0 | 1 | 2 => {}
            3 => unsafe {
                if self.sstr.siz == LONG_MARK {
                    pool.free_bytes(self.lstr.raw, fibonacci::at(self.lstr.exp));
                }
            },
            4 => unsafe {
                let siz = self.seq.siz;
                let raw = self.seq.raw;
                for i in 0..siz {
                    (*raw.add(i as usize)).destruct(pool);
                }
                if !raw.is_null() {
                    pool.free_nodes(raw, fibonacci::at(self.seq.exp));
                }
            },
            5 => unsafe {
                let siz = self.map.siz;
                let raw = self.map.raw;
                for i in 0..siz {
                    let pair = raw.add(i as usize);
                    (*pair).key.destruct(pool);
                    (*pair).val.destruct(pool);
                }
                if !raw.is_null() {
                    let cap2 = pair_units(fibonacci::at(self.map.exp));
                    pool.free_nodes(raw as *mut Node, cap2);
                }
            },
            other => panic!("node type `{other}` is out of range"),
        }
    }

    /// The node's tag. An out-of-range byte is a fatal invariant violation.
    pub fn tag(&self) -> Tag {
        match unsafe { self.tag } {
            0 => Tag::Null,
            1 => Tag::I64,
            2 => Tag::F64,
            3 => Tag::Str,
            4 => Tag::Seq,
            5 => Tag::Map,
            other => panic!("node type `{other}` is out of range"),
        }
    }

    pub fn is_null(&self) -> bool {
        unsafe { self.tag == Tag::Null as u8 }
    }

    /// Structural equality. Tag identity first; maps compare positionally.
    pub fn equal(&self, rhs: &Node) -> bool {
        if ptr::eq(self, rhs) {
            return true;
        }
        if self.tag() != rhs.tag() {
            return false;
        }
        unsafe {
            match self.tag() {
                Tag::Null => true,
                Tag::I64 => self.int.val == rhs.int.val,
                Tag::F64 => self.dbl.val == rhs.dbl.val,
                Tag::Str => self.str_payload() == rhs.str_payload(),
                Tag::Seq => {
                    if self.seq.siz != rhs.seq.siz {
                        return false;
                    }
                    for i in 0..self.seq.siz as usize {
                        if !(*self.seq.raw.add(i)).equal(&*rhs.seq.raw.add(i)) {
                            return false;
                        }
                    }
                    true
                }
                Tag::Map => {
                    if self.map.siz != rhs.map.siz {
                        return false;
                    }
                    for i in 0..self.map.siz as usize {
                        let l = &*self.map.raw.add(i);
                        let r = &*rhs.map.raw.add(i);
                        if !l.key.equal(&r.key) || !l.val.equal(&r.val) {
                            return false;
                        }
                    }
                    true
                }
            }
        }
    }

    /// Deep copy of `rhs` into `self`.
    ///
    /// When `self` is not `Null` the copy routes through a temporary, so a
    /// node can safely be overwritten with one of its own descendants.
    pub fn copy_from(&mut self, rhs: &Node, pool: &mut Pool) {
        if ptr::eq(self, rhs) {
            return;
        }
        if self.tag() == Tag::Null {
            let tag = rhs.tag();
            self.construct_as(tag, pool);
            unsafe {
                match tag {
                    Tag::Null => {}
                    Tag::I64 => self.int.val = rhs.int.val,
                    Tag::F64 => self.dbl.val = rhs.dbl.val,
                    Tag::Str => self.str_assign(rhs.str_payload(), pool),
                    Tag::Seq => {
                        let siz = rhs.seq.siz;
                        self.seq_reserve(siz, pool);
                        for i in 0..siz as usize {
                            let dst = self.seq.raw.add(i);
                            (*dst) = Node::new();
                            (*dst).copy_from(&*rhs.seq.raw.add(i), pool);
                        }
                        self.seq.siz = siz;
                    }
                    Tag::Map => {
                        let siz = rhs.map.siz;
                        self.map_reserve(siz, pool);
                        for i in 0..siz as usize {
                            let dst = self.map.raw.add(i);
                            let src = &*rhs.map.raw.add(i);
                            (*dst).key = Node::new();
                            (*dst).val = Node::new();
                            (*dst).key.copy_from(&src.key, pool);
                            (*dst).val.copy_from(&src.val, pool);
                        }
                        self.map.siz = siz;
                    }
                }
            }
        } else {
            let mut tmp = Node::new();
            tmp.copy_from(rhs, pool);
            self.destruct(pool);
            self.move_from(&mut tmp, pool);
        }
    }

    /// Destructive move: `rhs` ends up `Null`, `self` takes its value.
    ///
    /// Like [`Node::copy_from`], a non-`Null` destination routes through a
    /// temporary first.
    pub fn move_from(&mut self, rhs: &mut Node, pool: &mut Pool) {
        if ptr::eq(self, rhs) {
            return;
        }
        if self.tag() == Tag::Null {
            unsafe {
                let size = core::mem::size_of::<Node>();
                ptr::copy_nonoverlapping(rhs as *const Node as *const u8, self as *mut Node as *mut u8, size);
                ptr::write_bytes(rhs as *mut Node as *mut u8, 0, size);
            }
        } else {
            let mut tmp = Node::new();
            tmp.move_from(rhs, pool);
            self.destruct(pool);
            self.move_from(&mut tmp, pool);
        }
    }

    /// Byte-wise exchange.
    pub fn swap(&mut self, rhs: &mut Node) {
        core::mem::swap(self, rhs);
    }

    /************************************************************************
     * scalars
     ***********************************************************************/

    pub fn i64(&self) -> Result<i64, Error> {
        if self.tag() != Tag::I64 {
            return Err(Error::tag_mismatch(Tag::I64, self.tag()));
        }
        Ok(unsafe { self.int.val })
    }

    pub fn f64(&self) -> Result<f64, Error> {
        if self.tag() != Tag::F64 {
            return Err(Error::tag_mismatch(Tag::F64, self.tag()));
        }
        Ok(unsafe { self.dbl.val })
    }

    pub fn set_i64(&mut self, val: i64, pool: &mut Pool) {
        self.destruct(pool);
        self.construct_as(Tag::I64, pool);
        unsafe {
            self.int.val = val;
        }
    }

    pub fn set_f64(&mut self, val: f64, pool: &mut Pool) {
        self.destruct(pool);
        self.construct_as(Tag::F64, pool);
        unsafe {
            self.dbl.val = val;
        }
    }

    /************************************************************************
     * string
     ***********************************************************************/

    /// Payload length in bytes; the trailing NUL is not counted.
    pub fn str_size(&self) -> Result<SizeType, Error> {
        if self.tag() != Tag::Str {
            return Err(Error::tag_mismatch(Tag::Str, self.tag()));
        }
        Ok(self.str_size_raw())
    }

    /// Payload capacity in bytes; the trailing NUL is not counted.
    pub fn str_capacity(&self) -> Result<SizeType, Error> {
        if self.tag() != Tag::Str {
            return Err(Error::tag_mismatch(Tag::Str, self.tag()));
        }
        Ok(self.str_capacity_raw())
    }

    pub fn str_bytes(&self) -> Result<&[u8], Error> {
        if self.tag() != Tag::Str {
            return Err(Error::tag_mismatch(Tag::Str, self.tag()));
        }
        Ok(unsafe { self.str_payload() })
    }

    /// Destruct, then rebuild as a string holding `bytes`.
    pub fn set_str(&mut self, bytes: &[u8], pool: &mut Pool) {
        self.destruct(pool);
        self.construct_as(Tag::Str, pool);
        unsafe {
            self.str_assign(bytes, pool);
        }
    }

    pub fn push_str_byte(&mut self, b: u8, pool: &mut Pool) -> Result<(), Error> {
        if self.tag() == Tag::Null {
            self.construct_as(Tag::Str, pool);
        }
        if self.tag() != Tag::Str {
            return Err(Error::tag_mismatch(Tag::Str, self.tag()));
        }
        let siz = self.str_size_raw();
        self.str_resize(siz + 1, pool);
        unsafe {
            *self.str_raw_mut().add(siz as usize) = b;
        }
        Ok(())
    }

    pub fn pop_str_byte(&mut self, pool: &mut Pool) -> Result<(), Error> {
        if self.tag() != Tag::Str {
            return Err(Error::tag_mismatch(Tag::Str, self.tag()));
        }
        let siz = self.str_size_raw();
        if siz > 0 {
            self.str_resize(siz - 1, pool);
        }
        Ok(())
    }

    /// Empty the string; capacity is kept.
    pub fn clear_str(&mut self, pool: &mut Pool) -> Result<(), Error> {
        if self.tag() != Tag::Str {
            return Err(Error::tag_mismatch(Tag::Str, self.tag()));
        }
        self.str_resize(0, pool);
        Ok(())
    }

    fn str_is_small(&self) -> bool {
        unsafe { self.sstr.siz != LONG_MARK }
    }

    fn str_size_raw(&self) -> SizeType {
        unsafe {
            if self.str_is_small() {
                self.sstr.siz as SizeType - 1
            } else {
                self.lstr.siz - 1
            }
        }
    }

    fn str_capacity_raw(&self) -> SizeType {
        if self.str_is_small() {
            SHORT_RAW as SizeType - 1
        } else {
            fibonacci::at(unsafe { self.lstr.exp }) - 1
        }
    }

    fn str_raw(&self) -> *const u8 {
        unsafe {
            if self.str_is_small() {
                self.sstr.raw.as_ptr()
            } else {
                self.lstr.raw
            }
        }
    }

    fn str_raw_mut(&mut self) -> *mut u8 {
        unsafe {
            if self.str_is_small() {
                self.sstr.raw.as_mut_ptr()
            } else {
                self.lstr.raw
            }
        }
    }

    unsafe fn str_payload(&self) -> &[u8] {
        core::slice::from_raw_parts(self.str_raw(), self.str_size_raw() as usize)
    }

    fn str_update_size(&mut self, siz_with_nul: SizeType) {
        unsafe {
            if self.str_is_small() {
                self.sstr.siz = siz_with_nul as u8;
            } else {
                self.lstr.siz = siz_with_nul;
            }
        }
    }

    /// Grow the buffer to hold `cap` payload bytes. The transition from the
    /// inline to the pooled representation is one-way; shrinking never
    /// re-inlines.
    fn str_reserve(&mut self, cap: SizeType, pool: &mut Pool) {
        if cap <= self.str_capacity_raw() {
            return;
        }
        unsafe {
            let exp = fibonacci::right(cap + 1); // room for the NUL
            let newcap = fibonacci::at(exp);
            let mem = pool.alloc_bytes(newcap);

            let siz = self.str_size_raw() + 1;
            ptr::copy_nonoverlapping(self.str_raw(), mem, siz as usize);

            if !self.str_is_small() {
                pool.free_bytes(self.lstr.raw, fibonacci::at(self.lstr.exp));
            }

            self.sstr.siz = LONG_MARK;
            self.lstr.siz = siz;
            self.lstr.exp = exp;
            self.lstr.raw = mem;
        }
    }

    fn str_resize(&mut self, siz: SizeType, pool: &mut Pool) {
        self.str_reserve(siz, pool);
        unsafe {
            let old = self.str_size_raw();
            let raw = self.str_raw_mut();
            if siz >= old {
                // Zero the grown region and the new NUL.
                ptr::write_bytes(raw.add(old as usize), 0, (siz - old) as usize + 1);
            } else {
                ptr::write_bytes(raw.add(siz as usize), 0, (old - siz) as usize);
            }
        }
        self.str_update_size(siz + 1);
    }

    unsafe fn str_assign(&mut self, bytes: &[u8], pool: &mut Pool) {
        let len = bytes.len() as SizeType;
        self.str_reserve(len, pool);
        let raw = self.str_raw_mut();
        ptr::copy_nonoverlapping(bytes.as_ptr(), raw, bytes.len());
        *raw.add(bytes.len()) = 0;
        self.str_update_size(len + 1);
    }

    /************************************************************************
     * sequence
     ***********************************************************************/

    pub fn seq_size(&self) -> Result<SizeType, Error> {
        if self.tag() != Tag::Seq {
            return Err(Error::tag_mismatch(Tag::Seq, self.tag()));
        }
        Ok(unsafe { self.seq.siz })
    }

    pub fn seq_capacity(&self) -> Result<SizeType, Error> {
        if self.tag() != Tag::Seq {
            return Err(Error::tag_mismatch(Tag::Seq, self.tag()));
        }
        Ok(fibonacci::at(unsafe { self.seq.exp }))
    }

    /// Element at `idx`, or `None` when out of range or not a sequence.
    pub fn seq_at(&self, idx: SizeType) -> Option<&Node> {
        if self.tag() != Tag::Seq {
            return None;
        }
        unsafe {
            if idx < self.seq.siz {
                Some(&*self.seq.raw.add(idx as usize))
            } else {
                None
            }
        }
    }

    pub fn seq_push_copy(&mut self, val: &Node, pool: &mut Pool) -> Result<(), Error> {
        if self.tag() == Tag::Null {
            self.construct_as(Tag::Seq, pool);
        }
        if self.tag() != Tag::Seq {
            return Err(Error::tag_mismatch(Tag::Seq, self.tag()));
        }
        unsafe {
            let siz = self.seq.siz;
            self.seq_resize(siz + 1, pool);
            (*self.seq.raw.add(siz as usize)).copy_from(val, pool);
        }
        Ok(())
    }

    /// Append by destructive move; `val` ends up `Null`. `val` must not
    /// alias `self` (the borrow rules enforce this for safe callers).
    pub fn seq_push_move(&mut self, val: &mut Node, pool: &mut Pool) -> Result<(), Error> {
        if self.tag() == Tag::Null {
            self.construct_as(Tag::Seq, pool);
        }
        if self.tag() != Tag::Seq {
            return Err(Error::tag_mismatch(Tag::Seq, self.tag()));
        }
        unsafe {
            let siz = self.seq.siz;
            self.seq_resize(siz + 1, pool);
            (*self.seq.raw.add(siz as usize)).move_from(val, pool);
        }
        Ok(())
    }

    pub fn seq_pop(&mut self, pool: &mut Pool) -> Result<(), Error> {
        if self.tag() != Tag::Seq {
            return Err(Error::tag_mismatch(Tag::Seq, self.tag()));
        }
        let siz = unsafe { self.seq.siz };
        if siz > 0 {
            self.seq_resize(siz - 1, pool);
        }
        Ok(())
    }

    /// Remove `range`, compacting the tail down. Out-of-range bounds are
    /// clamped; an empty or inverted range is a no-op.
    pub fn seq_erase(
        &mut self,
        range: core::ops::Range<SizeType>,
        pool: &mut Pool,
    ) -> Result<(), Error> {
        if self.tag() != Tag::Seq {
            return Err(Error::tag_mismatch(Tag::Seq, self.tag()));
        }
        unsafe {
            let siz = self.seq.siz;
            let fst = range.start.min(siz);
            let lst = range.end.min(siz);
            if fst >= lst {
                return Ok(());
            }
            let removed = lst - fst;
            let raw = self.seq.raw;
            for i in lst..siz {
                let dst = raw.add((i - removed) as usize);
                let src = raw.add(i as usize);
                (*dst).move_from(&mut *src, pool);
            }
            self.seq_resize(siz - removed, pool);
        }
        Ok(())
    }

    /// Drop every element; capacity is kept.
    pub fn seq_clear(&mut self, pool: &mut Pool) -> Result<(), Error> {
        if self.tag() != Tag::Seq {
            return Err(Error::tag_mismatch(Tag::Seq, self.tag()));
        }
        self.seq_resize(0, pool);
        Ok(())
    }

    pub(crate) fn seq_last_ptr(&mut self) -> Option<*mut Node> {
        unsafe {
            if self.tag() != Tag::Seq || self.seq.siz == 0 {
                return None;
            }
            Some(self.seq.raw.add(self.seq.siz as usize - 1))
        }
    }

    fn seq_reserve(&mut self, cap: SizeType, pool: &mut Pool) {
        unsafe {
            if cap <= fibonacci::at(self.seq.exp) {
                return;
            }
            let exp = fibonacci::right(cap);
            let newcap = fibonacci::at(exp);
            let mem = pool.alloc_nodes(newcap);

            // Element-wise move: each source is zeroed as it goes.
            let old = self.seq.raw;
            for i in 0..self.seq.siz as usize {
                let dst = mem.add(i);
                (*dst) = Node::new();
                (*dst).move_from(&mut *old.add(i), pool);
            }
            if !old.is_null() {
                pool.free_nodes(old, fibonacci::at(self.seq.exp));
            }
            self.seq.exp = exp;
            self.seq.raw = mem;
        }
    }

    fn seq_resize(&mut self, siz: SizeType, pool: &mut Pool) {
        self.seq_reserve(siz, pool);
        unsafe {
            let old = self.seq.siz;
            let raw = self.seq.raw;
            for i in old..siz {
                (*raw.add(i as usize)) = Node::new();
            }
            for i in siz..old {
                (*raw.add(i as usize)).destruct(pool);
            }
            self.seq.siz = siz;
        }
    }

    /************************************************************************
     * map
     ***********************************************************************/

    pub fn map_size(&self) -> Result<SizeType, Error> {
        if self.tag() != Tag::Map {
            return Err(Error::tag_mismatch(Tag::Map, self.tag()));
        }
        Ok(unsafe { self.map.siz })
    }

    pub fn map_capacity(&self) -> Result<SizeType, Error> {
        if self.tag() != Tag::Map {
            return Err(Error::tag_mismatch(Tag::Map, self.tag()));
        }
        Ok(fibonacci::at(unsafe { self.map.exp }))
    }

    /// Entry at `idx` in insertion order, or `None`.
    pub fn map_at(&self, idx: SizeType) -> Option<&Pair> {
        if self.tag() != Tag::Map {
            return None;
        }
        unsafe {
            if idx < self.map.siz {
                Some(&*self.map.raw.add(idx as usize))
            } else {
                None
            }
        }
    }

    /// Linear scan; the first entry whose key equals `key`.
    pub fn map_find(&self, key: &Node) -> Option<&Pair> {
        if self.tag() != Tag::Map {
            return None;
        }
        unsafe {
            for i in 0..self.map.siz as usize {
                let pair = &*self.map.raw.add(i);
                if pair.key.equal(key) {
                    return Some(pair);
                }
            }
        }
        None
    }

    /// Linear scan for a string key with the given payload.
    pub fn map_find_bytes(&self, key: &[u8]) -> Option<&Pair> {
        if self.tag() != Tag::Map {
            return None;
        }
        unsafe {
            for i in 0..self.map.siz as usize {
                let pair = &*self.map.raw.add(i);
                if pair.key.tag() == Tag::Str && pair.key.str_payload() == key {
                    return Some(pair);
                }
            }
        }
        None
    }

    /// Append an entry by destructive move; both halves of `pair` end up
    /// `Null`.
    pub fn map_push_move(&mut self, pair: &mut Pair, pool: &mut Pool) -> Result<(), Error> {
        if self.tag() == Tag::Null {
            self.construct_as(Tag::Map, pool);
        }
        if self.tag() != Tag::Map {
            return Err(Error::tag_mismatch(Tag::Map, self.tag()));
        }
        unsafe {
            let siz = self.map.siz;
            self.map_resize(siz + 1, pool);
            let dst = self.map.raw.add(siz as usize);
            (*dst).key.move_from(&mut pair.key, pool);
            (*dst).val.move_from(&mut pair.val, pool);
        }
        Ok(())
    }

    pub fn map_pop(&mut self, pool: &mut Pool) -> Result<(), Error> {
        if self.tag() != Tag::Map {
            return Err(Error::tag_mismatch(Tag::Map, self.tag()));
        }
        let siz = unsafe { self.map.siz };
        if siz > 0 {
            self.map_resize(siz - 1, pool);
        }
        Ok(())
    }

    pub fn map_erase(
        &mut self,
        range: core::ops::Range<SizeType>,
        pool: &mut Pool,
    ) -> Result<(), Error> {
        if self.tag() != Tag::Map {
            return Err(Error::tag_mismatch(Tag::Map, self.tag()));
        }
        unsafe {
            let siz = self.map.siz;
            let fst = range.start.min(siz);
            let lst = range.end.min(siz);
            if fst >= lst {
                return Ok(());
            }
            let removed = lst - fst;
            let raw = self.map.raw;
            for i in lst..siz {
                let dst = raw.add((i - removed) as usize);
                let src = raw.add(i as usize);
                (*dst).key.move_from(&mut (*src).key, pool);
                (*dst).val.move_from(&mut (*src).val, pool);
            }
            self.map_resize(siz - removed, pool);
        }
        Ok(())
    }

    pub fn map_clear(&mut self, pool: &mut Pool) -> Result<(), Error> {
        if self.tag() != Tag::Map {
            return Err(Error::tag_mismatch(Tag::Map, self.tag()));
        }
        self.map_resize(0, pool);
        Ok(())
    }

    pub(crate) fn map_last_ptr(&mut self) -> Option<*mut Pair> {
        unsafe {
            if self.tag() != Tag::Map || self.map.siz == 0 {
                return None;
            }
            Some(self.map.raw.add(self.map.siz as usize - 1))
        }
    }

    fn map_reserve(&mut self, cap: SizeType, pool: &mut Pool) {
        unsafe {
            if cap <= fibonacci::at(self.map.exp) {
                return;
            }
            let exp = fibonacci::right(cap);
            let newcap = fibonacci::at(exp);
            let mem = pool.alloc_nodes(pair_units(newcap)) as *mut Pair;

            let old = self.map.raw;
            for i in 0..self.map.siz as usize {
                let dst = mem.add(i);
                let src = old.add(i);
                (*dst).key = Node::new();
                (*dst).val = Node::new();
                (*dst).key.move_from(&mut (*src).key, pool);
                (*dst).val.move_from(&mut (*src).val, pool);
            }
            if !old.is_null() {
                let cap2 = pair_units(fibonacci::at(self.map.exp));
                pool.free_nodes(old as *mut Node, cap2);
            }
            self.map.exp = exp;
            self.map.raw = mem;
        }
    }

    fn map_resize(&mut self, siz: SizeType, pool: &mut Pool) {
        self.map_reserve(siz, pool);
        unsafe {
            let old = self.map.siz;
            let raw = self.map.raw;
            for i in old..siz {
                let pair = raw.add(i as usize);
                (*pair).key = Node::new();
                (*pair).val = Node::new();
            }
            for i in siz..old {
                let pair = raw.add(i as usize);
                (*pair).key.destruct(pool);
                (*pair).val.destruct(pool);
            }
            self.map.siz = siz;
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Node {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.tag() {
            Tag::Null => write!(f, "Null"),
            Tag::I64 => write!(f, "I64({})", unsafe { self.int.val }),
            Tag::F64 => write!(f, "F64({})", unsafe { self.dbl.val }),
            Tag::Str => write!(
                f,
                "Str({:?})",
                String::from_utf8_lossy(unsafe { self.str_payload() })
            ),
            Tag::Seq => write!(f, "Seq(len={})", unsafe { self.seq.siz }),
            Tag::Map => write!(f, "Map(len={})", unsafe { self.map.siz }),
        }
    }
}

/// `Pair` buffers are allocated from the node allocator: a pair is exactly
/// two nodes.
fn pair_units(pairs: SizeType) -> SizeType {
    match pairs.checked_mul(2) {
        Some(v) => v,
        None => panic!("size `{pairs}` is too large for this allocator"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn str_node(text: &str, pool: &mut Pool) -> Node {
        let mut n = Node::new();
        n.set_str(text.as_bytes(), pool);
        n
    }

    #[test]
    fn test_new_is_null() {
        let n = Node::new();
        assert_eq!(n.tag(), Tag::Null);
        assert!(n.is_null());
    }

    #[test]
    fn test_scalars() {
        let mut pool = Pool::new();
        let mut n = Node::new();

        n.set_i64(-42, &mut pool);
        assert_eq!(n.tag(), Tag::I64);
        assert_eq!(n.i64().unwrap(), -42);
        assert!(n.f64().is_err());

        n.set_f64(2.5, &mut pool);
        assert_eq!(n.tag(), Tag::F64);
        assert_eq!(n.f64().unwrap(), 2.5);
        assert!(n.i64().is_err());

        n.destruct(&mut pool);
        assert!(n.is_null());
    }

    #[test]
    fn test_small_string_stays_inline() {
        let mut pool = Pool::new();
        let mut n = Node::new();
        n.set_str(b"thirteen-byte", &mut pool); // exactly 13 bytes
        assert_eq!(n.str_size().unwrap(), 13);
        assert_eq!(n.str_capacity().unwrap(), SMALL_STR_CAP);
        assert_eq!(n.str_bytes().unwrap(), b"thirteen-byte");

        // The payload lives inside the node itself.
        let node_addr = &n as *const Node as usize;
        let data_addr = n.str_bytes().unwrap().as_ptr() as usize;
        assert!(data_addr >= node_addr && data_addr < node_addr + 16);

        n.destruct(&mut pool);
    }

    #[test]
    fn test_large_string_is_pooled() {
        let mut pool = Pool::new();
        let mut n = Node::new();
        n.set_str(b"fourteen bytes", &mut pool); // 14 > SMALL_STR_CAP
        assert_eq!(n.str_size().unwrap(), 14);
        assert!(n.str_capacity().unwrap() >= 14);
        // Capacity (with the NUL added back) is a Fibonacci number.
        let with_nul = n.str_capacity().unwrap() + 1;
        let exp = fibonacci::right(with_nul);
        assert_eq!(fibonacci::at(exp), with_nul);

        let node_addr = &n as *const Node as usize;
        let data_addr = n.str_bytes().unwrap().as_ptr() as usize;
        assert!(data_addr < node_addr || data_addr >= node_addr + 16);

        n.destruct(&mut pool);
    }

    #[test]
    fn test_string_push_pop_clear() {
        let mut pool = Pool::new();
        let mut n = Node::new();
        for b in b"hello" {
            n.push_str_byte(*b, &mut pool).unwrap();
        }
        assert_eq!(n.str_bytes().unwrap(), b"hello");
        n.pop_str_byte(&mut pool).unwrap();
        assert_eq!(n.str_bytes().unwrap(), b"hell");
        n.clear_str(&mut pool).unwrap();
        assert_eq!(n.str_size().unwrap(), 0);
        n.destruct(&mut pool);
    }

    #[test]
    fn test_string_growth_crosses_inline_boundary() {
        let mut pool = Pool::new();
        let mut n = Node::new();
        let mut expect = Vec::new();
        for i in 0..200u8 {
            n.push_str_byte(b'a' + (i % 26), &mut pool).unwrap();
            expect.push(b'a' + (i % 26));
        }
        assert_eq!(n.str_bytes().unwrap(), expect.as_slice());
        // Shrinking never re-inlines.
        while n.str_size().unwrap() > 1 {
            n.pop_str_byte(&mut pool).unwrap();
        }
        let with_nul = n.str_capacity().unwrap() + 1;
        let exp = fibonacci::right(with_nul);
        assert_eq!(fibonacci::at(exp), with_nul);
        n.destruct(&mut pool);
    }

    #[test]
    fn test_seq_push_and_at() {
        let mut pool = Pool::new();
        let mut seq = Node::new();
        for i in 0..50 {
            let mut v = Node::new();
            v.set_i64(i, &mut pool);
            seq.seq_push_move(&mut v, &mut pool).unwrap();
            assert!(v.is_null());
        }
        assert_eq!(seq.seq_size().unwrap(), 50);
        // Capacity is a Fibonacci number >= size.
        let cap = seq.seq_capacity().unwrap();
        assert_eq!(fibonacci::at(fibonacci::right(cap)), cap);
        assert!(cap >= 50);

        for i in 0..50u32 {
            assert_eq!(seq.seq_at(i).unwrap().i64().unwrap(), i as i64);
        }
        assert!(seq.seq_at(50).is_none());
        seq.destruct(&mut pool);
    }

    #[test]
    fn test_seq_pop_and_erase() {
        let mut pool = Pool::new();
        let mut seq = Node::new();
        for i in 0..10 {
            let mut v = Node::new();
            v.set_i64(i, &mut pool);
            seq.seq_push_move(&mut v, &mut pool).unwrap();
        }
        seq.seq_pop(&mut pool).unwrap(); // 0..9 left
        seq.seq_erase(2..5, &mut pool).unwrap(); // 0 1 5 6 7 8
        assert_eq!(seq.seq_size().unwrap(), 6);
        let got: Vec<i64> = (0..6)
            .map(|i| seq.seq_at(i).unwrap().i64().unwrap())
            .collect();
        assert_eq!(got, vec![0, 1, 5, 6, 7, 8]);

        // Degenerate ranges are no-ops.
        seq.seq_erase(4..4, &mut pool).unwrap();
        seq.seq_erase(100..200, &mut pool).unwrap();
        assert_eq!(seq.seq_size().unwrap(), 6);

        seq.seq_clear(&mut pool).unwrap();
        assert_eq!(seq.seq_size().unwrap(), 0);
        seq.destruct(&mut pool);
    }

    #[test]
    fn test_map_push_find() {
        let mut pool = Pool::new();
        let mut map = Node::new();

        for (k, v) in [("alpha", 1i64), ("beta", 2), ("gamma", 3)] {
            let mut pair = Pair::new();
            pair.key = str_node(k, &mut pool);
            pair.val.set_i64(v, &mut pool);
            map.map_push_move(&mut pair, &mut pool).unwrap();
            assert!(pair.key.is_null() && pair.val.is_null());
        }
        assert_eq!(map.map_size().unwrap(), 3);

        let hit = map.map_find_bytes(b"beta").unwrap();
        assert_eq!(hit.val.i64().unwrap(), 2);
        assert!(map.map_find_bytes(b"delta").is_none());

        let key = str_node("gamma", &mut pool);
        let hit = map.map_find(&key).unwrap();
        assert_eq!(hit.val.i64().unwrap(), 3);
        let mut key = key;
        key.destruct(&mut pool);

        // Insertion order is preserved.
        assert_eq!(map.map_at(0).unwrap().val.i64().unwrap(), 1);
        assert_eq!(map.map_at(2).unwrap().val.i64().unwrap(), 3);

        map.destruct(&mut pool);
    }

    #[test]
    fn test_seq_push_copy_independent() {
        let mut pool = Pool::new();
        let src = str_node("shared source with a pooled payload", &mut pool);
        let mut seq = Node::new();
        seq.seq_push_copy(&src, &mut pool).unwrap();
        seq.seq_push_copy(&src, &mut pool).unwrap();

        // The source is untouched and the copies are independent.
        assert_eq!(
            src.str_bytes().unwrap(),
            b"shared source with a pooled payload" as &[u8]
        );
        unsafe {
            (*seq.seq.raw).push_str_byte(b'!', &mut pool).unwrap();
        }
        assert!(!seq.seq_at(0).unwrap().equal(seq.seq_at(1).unwrap()));
        assert!(seq.seq_at(1).unwrap().equal(&src));

        let mut src = src;
        src.destruct(&mut pool);
        seq.destruct(&mut pool);
    }

    #[test]
    fn test_map_pop_erase_clear() {
        let mut pool = Pool::new();
        let mut map = Node::new();
        for i in 0..6i64 {
            let mut pair = Pair::new();
            pair.key = str_node(&format!("k{i}"), &mut pool);
            pair.val.set_i64(i, &mut pool);
            map.map_push_move(&mut pair, &mut pool).unwrap();
        }
        map.map_pop(&mut pool).unwrap(); // k0..k4
        map.map_erase(1..3, &mut pool).unwrap(); // k0 k3 k4
        assert_eq!(map.map_size().unwrap(), 3);
        assert_eq!(map.map_at(0).unwrap().val.i64().unwrap(), 0);
        assert_eq!(map.map_at(1).unwrap().val.i64().unwrap(), 3);
        assert_eq!(map.map_at(2).unwrap().val.i64().unwrap(), 4);
        assert!(map.map_find_bytes(b"k1").is_none());

        map.map_clear(&mut pool).unwrap();
        assert_eq!(map.map_size().unwrap(), 0);
        // Capacity survives a clear.
        assert!(map.map_capacity().unwrap() >= 3);
        map.destruct(&mut pool);
    }

    #[test]
    fn test_map_first_match_wins() {
        let mut pool = Pool::new();
        let mut map = Node::new();
        for v in [10i64, 20] {
            let mut pair = Pair::new();
            pair.key = str_node("dup", &mut pool);
            pair.val.set_i64(v, &mut pool);
            map.map_push_move(&mut pair, &mut pool).unwrap();
        }
        assert_eq!(map.map_find_bytes(b"dup").unwrap().val.i64().unwrap(), 10);
        map.destruct(&mut pool);
    }

    #[test]
    fn test_equal_and_deep_copy_share_nothing() {
        let mut pool = Pool::new();

        let mut seq = Node::new();
        let mut s = str_node("a string long enough to live in the pool", &mut pool);
        seq.seq_push_move(&mut s, &mut pool).unwrap();
        let mut v = Node::new();
        v.set_i64(7, &mut pool);
        seq.seq_push_move(&mut v, &mut pool).unwrap();

        assert!(seq.equal(&seq));

        let mut copy = Node::new();
        copy.copy_from(&seq, &mut pool);
        assert!(seq.equal(&copy));
        assert!(copy.equal(&seq));

        // Writing into the copy must not affect the original.
        unsafe {
            let first = copy.seq.raw;
            (*first).push_str_byte(b'!', &mut pool).unwrap();
        }
        assert!(!seq.equal(&copy));
        assert_eq!(
            seq.seq_at(0).unwrap().str_bytes().unwrap(),
            b"a string long enough to live in the pool" as &[u8]
        );

        seq.destruct(&mut pool);
        copy.destruct(&mut pool);
    }

    #[test]
    fn test_copy_into_non_null_destination() {
        let mut pool = Pool::new();
        let mut dst = str_node("old contents", &mut pool);
        let src = str_node("new", &mut pool);
        dst.copy_from(&src, &mut pool);
        assert_eq!(dst.str_bytes().unwrap(), b"new");
        let mut src = src;
        src.destruct(&mut pool);
        dst.destruct(&mut pool);
    }

    #[test]
    fn test_move_zeroes_source() {
        let mut pool = Pool::new();
        let mut src = str_node("movable payload beyond inline capacity", &mut pool);
        let mut dst = Node::new();
        dst.move_from(&mut src, &mut pool);
        assert!(src.is_null());
        assert_eq!(
            dst.str_bytes().unwrap(),
            b"movable payload beyond inline capacity" as &[u8]
        );
        dst.destruct(&mut pool);
    }

    #[test]
    fn test_swap() {
        let mut pool = Pool::new();
        let mut a = Node::new();
        a.set_i64(1, &mut pool);
        let mut b = str_node("two", &mut pool);
        a.swap(&mut b);
        assert_eq!(a.str_bytes().unwrap(), b"two");
        assert_eq!(b.i64().unwrap(), 1);
        a.destruct(&mut pool);
        b.destruct(&mut pool);
    }

    #[test]
    fn test_equal_maps_positional() {
        let mut pool = Pool::new();
        let mut m1 = Node::new();
        let mut m2 = Node::new();
        for (map, order) in [(&mut m1, ["a", "b"]), (&mut m2, ["b", "a"])] {
            for k in order {
                let mut pair = Pair::new();
                pair.key = str_node(k, &mut pool);
                pair.val.set_i64(1, &mut pool);
                map.map_push_move(&mut pair, &mut pool).unwrap();
            }
        }
        // Same entries, different order: positionally unequal.
        assert!(!m1.equal(&m2));
        m1.destruct(&mut pool);
        m2.destruct(&mut pool);
    }

    #[test]
    fn test_tag_mismatch_reported() {
        let mut pool = Pool::new();
        let mut n = Node::new();
        n.set_i64(5, &mut pool);
        let err = n.str_bytes().unwrap_err();
        assert_eq!(
            err.to_string(),
            "expect node type `string`, but got `int64`"
        );
        let mut seq = Node::new();
        seq.construct_as(Tag::Seq, &mut pool);
        assert!(seq.map_size().is_err());
        n.destruct(&mut pool);
        seq.destruct(&mut pool);
    }

    #[test]
    fn test_nested_destruct_releases_everything() {
        // The checked pool verifies at drop that nothing leaked.
        let mut pool = Pool::new();
        let mut root = Node::new();
        for _ in 0..3 {
            let mut inner = Node::new();
            for i in 0..20 {
                let mut pair = Pair::new();
                pair.key = str_node(&format!("key-{i}-padded-to-be-long"), &mut pool);
                pair.val = str_node(&format!("value number {i}"), &mut pool);
                inner.map_push_move(&mut pair, &mut pool).unwrap();
            }
            root.seq_push_move(&mut inner, &mut pool).unwrap();
        }
        root.destruct(&mut pool);
        assert!(root.is_null());
    }
}
