//! Ring parameters.

use crate::sys;

/// Setup options passed to `io_uring_setup(2)`, and the negotiated ring shape
/// the kernel writes back.
///
/// Before setup only the request side (`flags`, SQPOLL thread settings, CQ
/// size) is meaningful. After setup [`Ring::params`](crate::Ring::params)
/// exposes the record as filled in by the kernel: entry counts, feature bits
/// and the cursor offsets every mapped pointer is computed from.
///
/// ```rust
/// use uring_core::Params;
///
/// // Kernel-side submission polling, thread idles after one second.
/// let params = Params::default().sqpoll(1000).cq_size(256);
/// assert!(params.is_sqpoll());
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Params {
  raw: sys::io_uring_params,
}

impl Params {
  /// Parameters with the given `IORING_SETUP_*` flags and everything else
  /// zeroed.
  pub fn new(flags: u32) -> Self {
    Self { raw: sys::io_uring_params { flags, ..Default::default() } }
  }

  /// Enable kernel-side submission polling (`IORING_SETUP_SQPOLL`).
  ///
  /// The poller thread goes to sleep after `idle_ms` milliseconds without
  /// work and must then be woken by an enter call.
  pub fn sqpoll(mut self, idle_ms: u32) -> Self {
    self.raw.flags |= sys::IORING_SETUP_SQPOLL;
    self.raw.sq_thread_idle = idle_ms;
    self
  }

  /// Pin the SQPOLL thread to `cpu` (`IORING_SETUP_SQ_AFF`).
  pub fn sq_thread_cpu(mut self, cpu: u32) -> Self {
    self.raw.flags |= sys::IORING_SETUP_SQ_AFF;
    self.raw.sq_thread_cpu = cpu;
    self
  }

  /// Busy-poll for completions (`IORING_SETUP_IOPOLL`). Only valid for
  /// `O_DIRECT` files on devices that support polling.
  pub fn iopoll(mut self) -> Self {
    self.raw.flags |= sys::IORING_SETUP_IOPOLL;
    self
  }

  /// Request a completion ring of `entries` instead of twice the submission
  /// ring size (`IORING_SETUP_CQSIZE`).
  pub fn cq_size(mut self, entries: u32) -> Self {
    self.raw.flags |= sys::IORING_SETUP_CQSIZE;
    self.raw.cq_entries = entries;
    self
  }

  /// Clamp oversized entry counts to the kernel maximum instead of failing
  /// (`IORING_SETUP_CLAMP`).
  pub fn clamp(mut self) -> Self {
    self.raw.flags |= sys::IORING_SETUP_CLAMP;
    self
  }

  /// The `IORING_SETUP_*` flags.
  pub fn flags(&self) -> u32 {
    self.raw.flags
  }

  /// `IORING_FEAT_*` bits reported by the kernel. Zero before setup.
  pub fn features(&self) -> u32 {
    self.raw.features
  }

  pub fn is_sqpoll(&self) -> bool {
    self.raw.flags & sys::IORING_SETUP_SQPOLL != 0
  }

  pub fn is_iopoll(&self) -> bool {
    self.raw.flags & sys::IORING_SETUP_IOPOLL != 0
  }

  /// Whether the kernel maps both rings with one mapping.
  pub fn has_single_mmap(&self) -> bool {
    self.raw.features & sys::IORING_FEAT_SINGLE_MMAP != 0
  }

  /// Submission ring capacity as negotiated by the kernel.
  pub fn sq_entries(&self) -> u32 {
    self.raw.sq_entries
  }

  /// Completion ring capacity as negotiated by the kernel.
  pub fn cq_entries(&self) -> u32 {
    self.raw.cq_entries
  }

  pub fn sq_offsets(&self) -> &sys::io_sqring_offsets {
    &self.raw.sq_off
  }

  pub fn cq_offsets(&self) -> &sys::io_cqring_offsets {
    &self.raw.cq_off
  }

  /// Byte length of the submission ring mapping: the header up to and
  /// including the index array.
  pub fn sq_ring_size(&self) -> usize {
    self.raw.sq_off.array as usize
      + self.raw.sq_entries as usize * core::mem::size_of::<u32>()
  }

  /// Byte length of the completion ring mapping: the header up to and
  /// including the CQE array.
  pub fn cq_ring_size(&self) -> usize {
    self.raw.cq_off.cqes as usize
      + self.raw.cq_entries as usize
        * core::mem::size_of::<crate::CompletionEntry>()
  }

  /// Byte length of the submission entry array mapping.
  pub fn sqes_size(&self) -> usize {
    self.raw.sq_entries as usize * core::mem::size_of::<crate::SubmissionEntry>()
  }

  pub fn as_raw(&self) -> &sys::io_uring_params {
    &self.raw
  }

  pub(crate) fn as_raw_mut(&mut self) -> &mut sys::io_uring_params {
    &mut self.raw
  }
}

impl From<sys::io_uring_params> for Params {
  fn from(raw: sys::io_uring_params) -> Self {
    Self { raw }
  }
}
