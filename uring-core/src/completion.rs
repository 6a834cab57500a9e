use core::{ops::Deref, ptr::NonNull, sync::atomic::Ordering};
use std::io;

use crate::{CompletionEntry, mmap::cursor, sys};

/// A completed operation with result and metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
  /// User data that was associated with the submission
  user_data: u64,
  /// Operation result (number of bytes transferred, or negative errno)
  pub res: i32,
  /// Completion flags providing additional context
  pub flags: u32,
}

impl Completion {
  /// Check if the operation succeeded
  pub fn is_ok(&self) -> bool {
    self.res >= 0
  }

  /// Get the result as an io::Result
  pub fn result(&self) -> io::Result<i32> {
    if self.res < 0 {
      Err(io::Error::from_raw_os_error(-self.res))
    } else {
      Ok(self.res)
    }
  }

  /// The correlation tag of the originating submission
  pub fn user_data(&self) -> u64 {
    self.user_data
  }

  /// Check if more data is available (for multishot operations)
  pub fn has_more(&self) -> bool {
    (self.flags & sys::IORING_CQE_F_MORE) != 0
  }

  /// Get the buffer ID (for operations using buffer selection)
  pub fn buffer_id(&self) -> Option<u16> {
    if (self.flags & sys::IORING_CQE_F_BUFFER) != 0 {
      Some((self.flags >> sys::IORING_CQE_BUFFER_SHIFT) as u16)
    } else {
      None
    }
  }
}

impl From<&CompletionEntry> for Completion {
  fn from(cqe: &CompletionEntry) -> Self {
    Self { user_data: cqe.user_data(), res: cqe.res, flags: cqe.flags }
  }
}

/// Consumer state of the completion ring, owned by [`Ring`](crate::Ring).
///
/// The kernel advances the tail; only this state advances the head, one
/// entry per [`CompletionRef::release`].
#[derive(Debug)]
pub(crate) struct CqState {
  ring: NonNull<u8>,
  off: sys::io_cqring_offsets,
  mask: u32,
  entries: u32,
}

impl CqState {
  /// # Safety
  /// `ring` must be the base of a live completion ring mapping laid out as
  /// `off` describes, outliving the state.
  pub(crate) unsafe fn new(
    ring: NonNull<u8>,
    off: &sys::io_cqring_offsets,
  ) -> Self {
    let mask = unsafe { cursor(ring, off.ring_mask) }.load(Ordering::Relaxed);
    let entries =
      unsafe { cursor(ring, off.ring_entries) }.load(Ordering::Relaxed);
    Self { ring, off: *off, mask, entries }
  }

  fn head(&self) -> u32 {
    unsafe { cursor(self.ring, self.off.head) }.load(Ordering::Relaxed)
  }

  fn tail(&self) -> u32 {
    // Pairs with the kernel's release store of new completions.
    unsafe { cursor(self.ring, self.off.tail) }.load(Ordering::Acquire)
  }

  pub(crate) fn available(&self) -> u32 {
    self.tail().wrapping_sub(self.head())
  }

  pub(crate) fn peek(&mut self) -> Option<CompletionRef<'_>> {
    if self.available() == 0 {
      return None;
    }
    Some(self.front())
  }

  /// The entry at the head, without checking that the kernel produced it.
  pub(crate) fn front(&mut self) -> CompletionRef<'_> {
    let head = self.head();
    let entry = unsafe {
      &*self
        .ring
        .add(self.off.cqes as usize)
        .cast::<CompletionEntry>()
        .as_ptr()
        .add((head & self.mask) as usize)
    };
    CompletionRef { state: self, entry, head }
  }

  pub(crate) fn drain(&mut self) -> Drain<'_> {
    Drain { state: self }
  }

  pub(crate) fn capacity(&self) -> u32 {
    self.entries
  }

  pub(crate) fn overflow(&self) -> u32 {
    unsafe { cursor(self.ring, self.off.overflow) }.load(Ordering::Acquire)
  }

  pub(crate) fn flags(&self) -> Option<u32> {
    if self.off.flags == 0 {
      return None;
    }
    Some(unsafe { cursor(self.ring, self.off.flags) }.load(Ordering::Relaxed))
  }
}

/// Consumer side of the completion ring.
///
/// A view borrowed from [`Ring::completion`](crate::Ring::completion); the
/// head it advances belongs to the ring.
#[derive(Debug)]
pub struct CompletionQueue<'a> {
  state: &'a mut CqState,
}

impl<'a> CompletionQueue<'a> {
  pub(crate) fn new(state: &'a mut CqState) -> Self {
    Self { state }
  }

  /// Number of completions ready to be consumed
  pub fn available(&self) -> u32 {
    self.state.available()
  }

  /// The oldest unconsumed completion, or `None` if the ring is empty.
  ///
  /// The entry stays in the ring until [`CompletionRef::release`] is called;
  /// dropping the reference without releasing it makes the next `peek`
  /// return the same entry.
  pub fn peek(&mut self) -> Option<CompletionRef<'_>> {
    self.state.peek()
  }

  /// Iterate over ready completions, releasing each as it is yielded.
  pub fn drain(&mut self) -> Drain<'_> {
    self.state.drain()
  }

  /// Ring capacity as negotiated with the kernel.
  pub fn capacity(&self) -> u32 {
    self.state.capacity()
  }

  /// Completions the kernel had to drop because the ring was full.
  pub fn overflow(&self) -> u32 {
    self.state.overflow()
  }

  /// The `IORING_CQ_*` flags word, if the kernel exposes one.
  pub fn flags(&self) -> Option<u32> {
    self.state.flags()
  }
}

/// A completion borrowed from the ring.
///
/// Must be handed back with [`release`](Self::release) once its fields have
/// been read; that advances the shared head and lets the kernel reuse the
/// slot.
#[derive(Debug)]
pub struct CompletionRef<'a> {
  state: &'a mut CqState,
  entry: &'a CompletionEntry,
  head: u32,
}

impl CompletionRef<'_> {
  /// Mark the entry as seen.
  pub fn release(self) {
    unsafe { cursor(self.state.ring, self.state.off.head) }
      .store(self.head.wrapping_add(1), Ordering::Release);
  }

  /// Copy the entry out and release it.
  pub fn take(self) -> Completion {
    let completion = Completion::from(self.entry);
    self.release();
    completion
  }
}

impl Deref for CompletionRef<'_> {
  type Target = CompletionEntry;

  fn deref(&self) -> &CompletionEntry {
    self.entry
  }
}

/// Iterator returned by [`CompletionQueue::drain`].
pub struct Drain<'a> {
  state: &'a mut CqState,
}

impl Iterator for Drain<'_> {
  type Item = Completion;

  fn next(&mut self) -> Option<Completion> {
    self.state.peek().map(CompletionRef::take)
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    (self.state.available() as usize, None)
  }
}
