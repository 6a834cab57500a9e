use std::{io::IoSlice, os::fd::RawFd};

use crate::{
  CompletionQueue, CompletionRef, Params, SubmissionEntry, SubmissionQueue,
  completion::{CqState, Drain},
  error::{Error, Result},
  kernel::{Kernel, Syscalls},
  mmap::RingMaps,
  submission::SqState,
  sys,
};

/// An io_uring instance: one ring descriptor, its three shared mappings and
/// the submission and completion queues resolved against them.
///
/// Every resource is released exactly once when the ring is dropped. The ring
/// can be moved freely; it is neither `Clone` nor `Sync`.
///
/// `K` is the gateway used for every privileged call. It defaults to the
/// real kernel.
pub struct Ring<K: Kernel = Syscalls> {
  sq: SqState,
  cq: CqState,
  maps: RingMaps,
  params: Params,
  fd: RawFd,
  kernel: K,
}

// The queues point into mappings owned by the ring, not into the ring itself.
unsafe impl<K: Kernel + Send> Send for Ring<K> {}

static_assertions::assert_impl_all!(Ring: Send);
static_assertions::assert_not_impl_any!(Ring: Clone, Copy, Sync);

impl Ring {
  /// Create a ring with `entries` submission slots and the given
  /// `IORING_SETUP_*` flags.
  pub fn new(entries: u32, flags: u32) -> Result<Self> {
    Self::with_params(entries, Params::new(flags))
  }

  /// Create a ring from a parameter builder.
  pub fn with_params(entries: u32, params: Params) -> Result<Self> {
    Ring::with_kernel(Syscalls, entries, params)
  }
}

impl<K: Kernel> Ring<K> {
  /// Create a ring through an explicit kernel gateway.
  ///
  /// On failure, everything acquired so far has been released again.
  pub fn with_kernel(kernel: K, entries: u32, mut params: Params) -> Result<Self> {
    let fd = kernel
      .setup(entries, params.as_raw_mut())
      .map_err(Error::RingCreation)?;

    let maps = match RingMaps::map(&kernel, fd, &params) {
      Ok(maps) => maps,
      Err(err) => {
        kernel.close(fd);
        return Err(err);
      }
    };

    let sq = unsafe {
      SqState::new(
        maps.sq_ring.as_ptr(),
        maps.sqes.as_ptr().cast(),
        params.sq_offsets(),
      )
    };
    let cq = unsafe { CqState::new(maps.cq_base(), params.cq_offsets()) };

    tracing::debug!(
      fd,
      sq_entries = params.sq_entries(),
      cq_entries = params.cq_entries(),
      flags = params.flags(),
      features = params.features(),
      single_mmap = maps.cq_ring.is_none(),
      ring_bytes = maps.sq_ring.len(),
      "io_uring ready"
    );

    Ok(Self { sq, cq, maps, params, fd, kernel })
  }

  /// The ring descriptor.
  pub fn fd(&self) -> RawFd {
    self.fd
  }

  /// The parameters as negotiated with the kernel.
  pub fn params(&self) -> &Params {
    &self.params
  }

  /// The `IORING_SETUP_*` flags the ring was created with.
  pub fn flags(&self) -> u32 {
    self.params.flags()
  }

  /// The `IORING_FEAT_*` bits reported by the kernel.
  pub fn features(&self) -> u32 {
    self.params.features()
  }

  pub fn is_sqpoll(&self) -> bool {
    self.params.is_sqpoll()
  }

  pub fn is_iopoll(&self) -> bool {
    self.params.is_iopoll()
  }

  /// The producer side of the submission ring.
  ///
  /// The queue is a view borrowing this ring, so it cannot outlive the ring
  /// or be moved into another one:
  ///
  /// ```rust,compile_fail
  /// # fn main() -> uring_core::Result<()> {
  /// let mut a = uring_core::with_capacity(4)?;
  /// let mut b = uring_core::with_capacity(4)?;
  /// std::mem::swap(a.submission(), b.submission());
  /// # Ok(())
  /// # }
  /// ```
  pub fn submission(&mut self) -> SubmissionQueue<'_> {
    SubmissionQueue::new(&mut self.sq)
  }

  /// The consumer side of the completion ring, borrowed like
  /// [`submission`](Self::submission).
  ///
  /// ```rust,compile_fail
  /// # fn main() -> uring_core::Result<()> {
  /// let mut a = uring_core::with_capacity(4)?;
  /// let mut cq = a.completion();
  /// drop(a);
  /// cq.peek();
  /// # Ok(())
  /// # }
  /// ```
  pub fn completion(&mut self) -> CompletionQueue<'_> {
    CompletionQueue::new(&mut self.cq)
  }

  /// Next free submission entry, or `None` if the ring is full.
  pub fn get_sqe(&mut self) -> Option<&mut SubmissionEntry> {
    self.sq.acquire()
  }

  /// Next submission entry without a capacity check.
  ///
  /// # Safety
  /// See [`SubmissionQueue::acquire_unchecked`].
  pub unsafe fn get_sqe_unchecked(&mut self) -> &mut SubmissionEntry {
    unsafe { self.sq.acquire_unchecked() }
  }

  /// The oldest ready completion, without entering the kernel.
  pub fn peek(&mut self) -> Option<CompletionRef<'_>> {
    self.cq.peek()
  }

  /// Drain every ready completion.
  pub fn completions(&mut self) -> Drain<'_> {
    self.cq.drain()
  }

  /// Whether the kernel has dropped completions because the completion ring
  /// was full.
  pub fn cq_overflowed(&self) -> bool {
    self.sq.cq_overflow() || self.cq.overflow() > 0
  }

  /// Flush pending entries and enter the kernel if it needs to be told.
  ///
  /// Returns the number of submissions the kernel has not consumed yet.
  pub fn submit(&mut self) -> Result<u32> {
    self.submit_and_wait(0)
  }

  /// Like [`submit`](Self::submit), also waiting for at least `min_complete`
  /// completions.
  pub fn submit_and_wait(&mut self, min_complete: u32) -> Result<u32> {
    let submitted = self.sq.flush();
    let need_wakeup = self.params.is_sqpoll() && self.sq.needs_wakeup();

    let Some(flags) = enter_flags(self.params.flags(), need_wakeup, min_complete)
    else {
      return Ok(submitted);
    };

    unsafe { self.kernel.enter(self.fd, submitted, min_complete, flags) }
      .map_err(|err| {
        tracing::trace!(error = %err, submitted, min_complete, "enter failed");
        Error::Enter(err)
      })?;
    Ok(submitted)
  }

  /// Block until a completion is ready and return it.
  ///
  /// Pending submissions are flushed first.
  pub fn wait(&mut self) -> Result<CompletionRef<'_>> {
    while self.cq.available() == 0 {
      self.submit_and_wait(1)?;
    }
    if self.cq_overflowed() {
      tracing::warn!(
        dropped = self.cq.overflow(),
        "completion ring overflowed"
      );
    }
    Ok(self.cq.front())
  }

  /// Raw `io_uring_register(2)` call.
  ///
  /// # Safety
  /// `arg` must point to `nr_args` elements of the type `opcode` expects, and
  /// whatever the kernel keeps referencing must outlive the registration.
  pub unsafe fn register(
    &self,
    opcode: u32,
    arg: *const libc::c_void,
    nr_args: u32,
  ) -> Result<u32> {
    unsafe { self.kernel.register(self.fd, opcode, arg, nr_args) }
      .map_err(|source| Error::Register { opcode, source })
  }

  /// Register fixed buffers for `READ_FIXED` / `WRITE_FIXED`.
  ///
  /// # Safety
  /// The buffers must stay valid until they are unregistered or the ring is
  /// dropped.
  pub unsafe fn register_buffers(&self, buffers: &[IoSlice<'_>]) -> Result<()> {
    unsafe {
      self.register(
        sys::IORING_REGISTER_BUFFERS,
        buffers.as_ptr().cast(),
        buffers.len() as u32,
      )
    }?;
    Ok(())
  }

  pub fn unregister_buffers(&self) -> Result<()> {
    unsafe {
      self.register(sys::IORING_UNREGISTER_BUFFERS, core::ptr::null(), 0)
    }?;
    Ok(())
  }

  /// Register a fixed file table. Entries may be `-1` to reserve a slot.
  pub fn register_files(&self, fds: &[RawFd]) -> Result<()> {
    unsafe {
      self.register(
        sys::IORING_REGISTER_FILES,
        fds.as_ptr().cast(),
        fds.len() as u32,
      )
    }?;
    Ok(())
  }

  /// Replace fixed file slots starting at `offset`. Returns how many slots
  /// the kernel updated.
  pub fn register_files_update(&self, offset: u32, fds: &[RawFd]) -> Result<u32> {
    let update = sys::io_uring_files_update {
      offset,
      resv: 0,
      fds: fds.as_ptr() as u64,
    };
    unsafe {
      self.register(
        sys::IORING_REGISTER_FILES_UPDATE,
        (&raw const update).cast(),
        fds.len() as u32,
      )
    }
  }

  pub fn unregister_files(&self) -> Result<()> {
    unsafe { self.register(sys::IORING_UNREGISTER_FILES, core::ptr::null(), 0) }?;
    Ok(())
  }

  /// Have the kernel signal `eventfd` on every posted completion.
  pub fn register_eventfd(&self, eventfd: RawFd) -> Result<()> {
    unsafe {
      self.register(
        sys::IORING_REGISTER_EVENTFD,
        (&raw const eventfd).cast(),
        1,
      )
    }?;
    Ok(())
  }

  pub fn unregister_eventfd(&self) -> Result<()> {
    unsafe {
      self.register(sys::IORING_UNREGISTER_EVENTFD, core::ptr::null(), 0)
    }?;
    Ok(())
  }
}

impl<K: Kernel> Drop for Ring<K> {
  fn drop(&mut self) {
    unsafe { self.maps.unmap(&self.kernel) };
    self.kernel.close(self.fd);
    tracing::debug!(fd = self.fd, "io_uring closed");
  }
}

impl<K: Kernel> core::fmt::Debug for Ring<K> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Ring")
      .field("fd", &self.fd)
      .field("params", &self.params)
      .field("sq", &self.sq)
      .field("cq", &self.cq)
      .finish_non_exhaustive()
  }
}

/// Decide whether a submit has to call `io_uring_enter`, and with which
/// flags.
///
/// Without SQPOLL the kernel only sees new entries through an enter call.
/// With SQPOLL the poller thread picks them up on its own unless it went to
/// sleep, so an enter is needed only to wake it, to wait for completions, or
/// to reap completions under IOPOLL.
fn enter_flags(setup_flags: u32, need_wakeup: bool, min_complete: u32) -> Option<u32> {
  let sqpoll = setup_flags & sys::IORING_SETUP_SQPOLL != 0;
  let iopoll = setup_flags & sys::IORING_SETUP_IOPOLL != 0;
  let wakeup = sqpoll && need_wakeup;

  if sqpoll && !wakeup && min_complete == 0 && !iopoll {
    tracing::trace!("sq poller awake, skipping enter");
    return None;
  }

  let mut flags = 0;
  if wakeup {
    flags |= sys::IORING_ENTER_SQ_WAKEUP;
  }
  if iopoll || min_complete > 0 {
    flags |= sys::IORING_ENTER_GETEVENTS;
  }
  tracing::trace!(flags, min_complete, "entering kernel");
  Some(flags)
}
