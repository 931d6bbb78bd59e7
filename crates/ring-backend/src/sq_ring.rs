//! The SQ ring: single-producer (application), single-consumer (core).
//!
//! Memory layout, mmap'd anonymously (stands in for the memory-mapping
//! subsystem the data model treats as an external collaborator):
//!
//! ```text
//! Page 0:       RingHeader { head, tail, ring_mask, ring_entries, dropped, flags }
//! Page 1..:     indirection array, `sq_entries` x u32
//! Page N..:     Sqe[sq_entries] backing array
//! ```
//!
//! The indirection array lets the application reorder submissions
//! without moving SQE data: the application writes an SQE into any
//! backing slot, then appends that slot's index to the indirection
//! array and advances `tail`.

use ring_core::entry::{RingHeader, Sqe};
use std::sync::atomic::Ordering;

fn round_up_page(n: usize) -> usize {
    let page = 4096;
    (n + page - 1) / page * page
}

/// Owns the mmap'd region backing one SQ.
pub struct SqRingMemory {
    base: *mut u8,
    mmap_len: usize,
    header: *mut RingHeader,
    array: *mut u32,
    sqes: *mut Sqe,
    sq_entries: u32,
    /// Byte offset of the indirection array from `base` — also the
    /// size of the header page, since the array immediately follows it.
    array_offset: usize,
    /// Byte offset of the SQE backing array from `base`.
    sqes_offset: usize,
}

unsafe impl Send for SqRingMemory {}
unsafe impl Sync for SqRingMemory {}

impl SqRingMemory {
    /// Allocate a fresh SQ backed by `sq_entries` slots. `sq_entries`
    /// must already be a power of two (the caller, `setup`, is
    /// responsible for rounding up and capping at 4096).
    pub fn new(sq_entries: u32) -> std::io::Result<Self> {
        debug_assert!(sq_entries.is_power_of_two());
        let header_bytes = round_up_page(std::mem::size_of::<RingHeader>());
        let array_bytes = round_up_page(sq_entries as usize * std::mem::size_of::<u32>());
        let sqes_bytes = round_up_page(sq_entries as usize * std::mem::size_of::<Sqe>());
        let mmap_len = header_bytes + array_bytes + sqes_bytes;

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mmap_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        let base = ptr as *mut u8;

        unsafe {
            std::ptr::write(base as *mut RingHeader, RingHeader::new(sq_entries));
        }

        Ok(Self {
            base,
            mmap_len,
            header: base as *mut RingHeader,
            array: unsafe { base.add(header_bytes) } as *mut u32,
            sqes: unsafe { base.add(header_bytes + array_bytes) } as *mut Sqe,
            sq_entries,
            array_offset: header_bytes,
            sqes_offset: header_bytes + array_bytes,
        })
    }

    #[inline]
    fn header(&self) -> &RingHeader {
        unsafe { &*self.header }
    }

    pub fn sq_entries(&self) -> u32 {
        self.sq_entries
    }

    /// Base address of this ring's mapped region (§6 mmap handle op).
    pub fn base_ptr(&self) -> *const u8 {
        self.base
    }

    /// Byte offset of the indirection array from `base_ptr`.
    pub fn array_offset(&self) -> u32 {
        self.array_offset as u32
    }

    /// Byte offset of the SQE backing array from `base_ptr` (§6's
    /// "SQE backing" mmap region).
    pub fn sqes_offset(&self) -> u32 {
        self.sqes_offset as u32
    }

    /// §6 readiness-poll: true while the SQ still has room for at
    /// least one more entry.
    pub fn has_space(&self) -> bool {
        let tail = self.header().tail.load(Ordering::Acquire);
        let head = self.header().head.load(Ordering::Acquire);
        tail.wrapping_sub(head) < self.sq_entries
    }

    /// The `dropped` counter: entries that referenced an out-of-range
    /// indirection index. Monotonic non-decreasing.
    pub fn dropped(&self) -> u32 {
        self.header().aux_counter.load(Ordering::Relaxed)
    }

    pub fn producer(&self) -> SqProducer<'_> {
        SqProducer {
            mem: self,
            local_tail: self.header().tail.load(Ordering::Relaxed),
        }
    }

    pub fn consumer(&self) -> SqConsumer<'_> {
        SqConsumer {
            mem: self,
            local_head: self.header().head.load(Ordering::Relaxed),
        }
    }
}

impl Drop for SqRingMemory {
    fn drop(&mut self) {
        if !self.base.is_null() {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.mmap_len);
            }
            self.base = std::ptr::null_mut();
        }
    }
}

/// Application-side writer. Single-producer: no CAS needed, just a
/// plain incrementing local tail published with a release store.
pub struct SqProducer<'a> {
    mem: &'a SqRingMemory,
    local_tail: u32,
}

impl<'a> SqProducer<'a> {
    /// Write `sqe` into backing slot `sqe_index` (caller-chosen, must be
    /// `< sq_entries`) and append that index to the indirection array.
    /// Does not publish; call `publish` once per batch.
    pub fn submit(&mut self, sqe_index: u32, sqe: Sqe) {
        debug_assert!(sqe_index < self.mem.sq_entries);
        unsafe {
            std::ptr::write(self.mem.sqes.add(sqe_index as usize), sqe);
        }
        let mask = self.mem.header().ring_mask;
        let slot = (self.local_tail & mask) as usize;
        unsafe {
            std::ptr::write_volatile(self.mem.array.add(slot), sqe_index);
        }
        self.local_tail = self.local_tail.wrapping_add(1);
    }

    /// Publish the new tail so the consumer can observe the entries
    /// written since the last `publish`.
    pub fn publish(&self) {
        self.mem.header().tail.store(self.local_tail, Ordering::Release);
    }

    /// Convenience for the common in-order case: write into the next
    /// sequential backing slot and publish immediately.
    pub fn submit_in_order(&mut self, index_hint: u32, sqe: Sqe) {
        self.submit(index_hint, sqe);
        self.publish();
    }
}

/// What the core observed when trying to reserve one SQE.
pub enum Reserved {
    Sqe(Sqe),
    /// SQ had nothing new to read.
    Empty,
    /// The indirection slot referenced an out-of-range index; the
    /// entry was dropped and `dropped` was incremented. Per the
    /// submit pipeline algorithm, a drop stops the batch loop — the
    /// caller does not keep scanning past it in the same enter call.
    Dropped,
}

/// Core-side reader. Single consumer: the submit pipeline, exactly.
pub struct SqConsumer<'a> {
    mem: &'a SqRingMemory,
    local_head: u32,
}

impl<'a> SqConsumer<'a> {
    /// §4.1 SQ consumer read sequence: snapshot `tail` with an
    /// acquire load, compare with the cached head, read the
    /// indirection slot with a plain load, then read the referenced
    /// SQE as a single volatile snapshot — the application may mutate
    /// the SQE between fields, so every datum used for correctness is
    /// loaded exactly once and trusted only as the loaded value.
    pub fn reserve_one(&mut self) -> Reserved {
        let tail = self.mem.header().tail.load(Ordering::Acquire);
        if self.local_head == tail {
            return Reserved::Empty;
        }
        let mask = self.mem.header().ring_mask;
        let slot = (self.local_head & mask) as usize;
        let sqe_index = unsafe { std::ptr::read(self.mem.array.add(slot)) };
        self.local_head = self.local_head.wrapping_add(1);

        if sqe_index >= self.mem.sq_entries {
            self.mem.header().aux_counter.fetch_add(1, Ordering::Relaxed);
            return Reserved::Dropped;
        }

        let sqe = unsafe { std::ptr::read_volatile(self.mem.sqes.add(sqe_index as usize)) };
        Reserved::Sqe(sqe)
    }

    /// §4.1 SQ consumer commit: publish the new head with a release
    /// store so reads of SQE contents happen-before it.
    pub fn commit(&self) {
        self.mem.header().head.store(self.local_head, Ordering::Release);
    }
}
