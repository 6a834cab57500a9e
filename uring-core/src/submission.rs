use core::{
  ptr::NonNull,
  sync::atomic::{self, Ordering},
};

use crate::{SubmissionEntry, mmap::cursor, sys};

/// Producer state of the submission ring, owned by [`Ring`](crate::Ring).
///
/// Entries are written in place into the mapped entry array and counted by
/// two local cursors: `sqe_tail` advances on every acquisition, `sqe_head`
/// trails it until [`flush`](Self::flush) publishes the pending entries to
/// the kernel-visible tail. `sqe_tail - sqe_head` is always the number of
/// entries acquired but not yet flushed.
///
/// All shared cursors are stored as offsets into the ring mapping and
/// resolved on access.
#[derive(Debug)]
pub(crate) struct SqState {
  ring: NonNull<u8>,
  off: sys::io_sqring_offsets,
  sqes: NonNull<SubmissionEntry>,
  mask: u32,
  entries: u32,
  sqe_head: u32,
  sqe_tail: u32,
}

impl SqState {
  /// # Safety
  /// `ring` must be the base of a live submission ring mapping laid out as
  /// `off` describes, and `sqes` the base of its entry array. Both mappings
  /// must outlive the queue.
  pub(crate) unsafe fn new(
    ring: NonNull<u8>,
    sqes: NonNull<SubmissionEntry>,
    off: &sys::io_sqring_offsets,
  ) -> Self {
    let mask = unsafe { cursor(ring, off.ring_mask) }.load(Ordering::Relaxed);
    let entries =
      unsafe { cursor(ring, off.ring_entries) }.load(Ordering::Relaxed);
    Self { ring, off: *off, sqes, mask, entries, sqe_head: 0, sqe_tail: 0 }
  }

  /// Acquire the next free entry, zeroed.
  ///
  /// Returns `None` when every slot is either pending or still unconsumed by
  /// the kernel. The entry is not visible to the kernel until the next
  /// [`flush`](Self::flush).
  pub(crate) fn acquire(&mut self) -> Option<&mut SubmissionEntry> {
    let khead =
      unsafe { cursor(self.ring, self.off.head) }.load(Ordering::Acquire);
    if self.sqe_tail.wrapping_sub(khead) >= self.entries {
      return None;
    }
    Some(unsafe { self.acquire_unchecked() })
  }

  /// Acquire the entry at `sqe_tail & mask` without checking that the
  /// kernel has consumed it.
  ///
  /// # Safety
  /// The caller must not hold more than [`capacity`](Self::capacity) entries
  /// that the kernel has not yet consumed. Writing into a slot the kernel
  /// still reads is a data race.
  pub(crate) unsafe fn acquire_unchecked(&mut self) -> &mut SubmissionEntry {
    let slot = (self.sqe_tail & self.mask) as usize;
    self.sqe_tail = self.sqe_tail.wrapping_add(1);
    let sqe = unsafe { &mut *self.sqes.as_ptr().add(slot) };
    sqe.clear();
    sqe
  }

  /// Publish every pending entry to the kernel.
  ///
  /// Each pending entry's slot index is written to the index array at the
  /// kernel tail, then the tail is stored with release ordering so the
  /// kernel observes complete entries. Returns the number of entries the
  /// kernel has not consumed yet. With nothing pending the shared tail is
  /// not written.
  pub(crate) fn flush(&mut self) -> u32 {
    let khead = unsafe { cursor(self.ring, self.off.head) };
    let ktail = unsafe { cursor(self.ring, self.off.tail) };
    let mut tail = ktail.load(Ordering::Relaxed);
    let mut to_submit = self.sqe_tail.wrapping_sub(self.sqe_head);

    if to_submit == 0 {
      return tail.wrapping_sub(khead.load(Ordering::Acquire));
    }

    let array = self.array();
    while to_submit > 0 {
      unsafe {
        array
          .as_ptr()
          .add((tail & self.mask) as usize)
          .write(self.sqe_head & self.mask)
      };
      tail = tail.wrapping_add(1);
      self.sqe_head = self.sqe_head.wrapping_add(1);
      to_submit -= 1;
    }

    ktail.store(tail, Ordering::Release);

    // With SQPOLL the kernel may be moving head right now; an outdated value
    // only over-reports what is outstanding.
    tail.wrapping_sub(khead.load(Ordering::Acquire))
  }

  fn array(&self) -> NonNull<u32> {
    unsafe { self.ring.add(self.off.array as usize).cast() }
  }

  /// Entries acquired but not yet flushed.
  pub(crate) fn pending(&self) -> u32 {
    self.sqe_tail.wrapping_sub(self.sqe_head)
  }

  /// Entries that can be acquired before the ring is full.
  pub(crate) fn space_left(&self) -> u32 {
    let khead =
      unsafe { cursor(self.ring, self.off.head) }.load(Ordering::Acquire);
    self.entries - self.sqe_tail.wrapping_sub(khead)
  }

  /// Ring capacity as negotiated with the kernel.
  pub(crate) fn capacity(&self) -> u32 {
    self.entries
  }

  /// Published entries the kernel has not consumed yet.
  pub(crate) fn outstanding(&self) -> u32 {
    let ktail =
      unsafe { cursor(self.ring, self.off.tail) }.load(Ordering::Relaxed);
    let khead =
      unsafe { cursor(self.ring, self.off.head) }.load(Ordering::Acquire);
    ktail.wrapping_sub(khead)
  }

  /// Entries the kernel dropped because they were invalid.
  pub(crate) fn dropped(&self) -> u32 {
    unsafe { cursor(self.ring, self.off.dropped) }.load(Ordering::Acquire)
  }

  /// The `IORING_SQ_*` flags word.
  pub(crate) fn flags(&self) -> u32 {
    unsafe { cursor(self.ring, self.off.flags) }.load(Ordering::Acquire)
  }

  /// Whether the SQPOLL thread went idle and needs an enter call with
  /// `IORING_ENTER_SQ_WAKEUP`.
  pub(crate) fn needs_wakeup(&self) -> bool {
    // Order the tail store before the flags load.
    atomic::fence(Ordering::SeqCst);
    self.flags() & sys::IORING_SQ_NEED_WAKEUP != 0
  }

  /// Whether the kernel flagged completions it could not post because the
  /// completion ring was full.
  pub(crate) fn cq_overflow(&self) -> bool {
    self.flags() & sys::IORING_SQ_CQ_OVERFLOW != 0
  }

  /// Address of every shared cursor, relative to the ring base.
  #[cfg(test)]
  pub(crate) fn cursor_layout(&self) -> [usize; 7] {
    let base = self.ring.as_ptr() as usize;
    let at = |off: u32| unsafe { cursor(self.ring, off) } as *const _ as usize - base;
    [
      at(self.off.head),
      at(self.off.tail),
      at(self.off.ring_mask),
      at(self.off.ring_entries),
      at(self.off.flags),
      at(self.off.dropped),
      self.array().as_ptr() as usize - base,
    ]
  }

  #[cfg(test)]
  pub(crate) fn ring_base(&self) -> NonNull<u8> {
    self.ring
  }
}


/// Producer side of the submission ring.
///
/// A view borrowed from [`Ring::submission`](crate::Ring::submission); the
/// state it drives stays inside the ring.
#[derive(Debug)]
pub struct SubmissionQueue<'a> {
  state: &'a mut SqState,
}

impl<'a> SubmissionQueue<'a> {
  pub(crate) fn new(state: &'a mut SqState) -> Self {
    Self { state }
  }

  /// Acquire the next free entry, zeroed.
  ///
  /// Returns `None` when every slot is either pending or still unconsumed by
  /// the kernel. The entry is not visible to the kernel until the next
  /// [`flush`](Self::flush).
  pub fn acquire(&mut self) -> Option<&mut SubmissionEntry> {
    self.state.acquire()
  }

  /// Acquire the next slot without checking that the kernel has consumed it.
  ///
  /// # Safety
  /// The caller must not hold more than [`capacity`](Self::capacity) entries
  /// that the kernel has not yet consumed. Writing into a slot the kernel
  /// still reads is a data race.
  pub unsafe fn acquire_unchecked(&mut self) -> &mut SubmissionEntry {
    unsafe { self.state.acquire_unchecked() }
  }

  /// Publish every pending entry to the kernel.
  ///
  /// Returns the number of entries the kernel has not consumed yet. With
  /// nothing pending the shared tail is not written.
  pub fn flush(&mut self) -> u32 {
    self.state.flush()
  }

  /// Entries acquired but not yet flushed.
  pub fn pending(&self) -> u32 {
    self.state.pending()
  }

  /// Entries that can be acquired before the ring is full.
  pub fn space_left(&self) -> u32 {
    self.state.space_left()
  }

  /// Ring capacity as negotiated with the kernel.
  pub fn capacity(&self) -> u32 {
    self.state.capacity()
  }

  /// Published entries the kernel has not consumed yet.
  pub fn outstanding(&self) -> u32 {
    self.state.outstanding()
  }

  /// Entries the kernel dropped because they were invalid.
  pub fn dropped(&self) -> u32 {
    self.state.dropped()
  }

  /// The `IORING_SQ_*` flags word.
  pub fn flags(&self) -> u32 {
    self.state.flags()
  }

  /// Whether the SQPOLL thread went idle and needs an enter call with
  /// `IORING_ENTER_SQ_WAKEUP`.
  pub fn needs_wakeup(&self) -> bool {
    self.state.needs_wakeup()
  }

  /// Whether the kernel flagged completions it could not post because the
  /// completion ring was full.
  pub fn cq_overflow(&self) -> bool {
    self.state.cq_overflow()
  }

  #[cfg(test)]
  pub(crate) fn cursor_layout(&self) -> [usize; 7] {
    self.state.cursor_layout()
  }

  #[cfg(test)]
  pub(crate) fn ring_base(&self) -> NonNull<u8> {
    self.state.ring_base()
  }
}
