//! Submission and completion entry views.
//!
//! Both records are laid out byte-for-byte like the kernel's `io_uring_sqe`
//! and `io_uring_cqe`. They are never allocated on their own: a
//! [`SubmissionEntry`] is always a slot in the mapped entry array handed out
//! by the submission queue, and a [`CompletionEntry`] is always a slot of the
//! mapped completion ring.
//!
//! # Safety
//!
//! The `prep_*` methods that take buffers are `unsafe`: the kernel reads or
//! writes those buffers asynchronously, so they must stay valid (and not be
//! accessed in conflicting ways) until the matching completion is reaped.
//!
//! # Examples
//!
//! ```rust,no_run
//! use uring_core::{Ring, SqeFlags};
//! use std::os::fd::AsRawFd;
//!
//! # fn main() -> std::io::Result<()> {
//! let mut ring = Ring::new(8, 0)?;
//! let file = std::fs::File::open("/etc/hostname")?;
//! let mut buf = vec![0u8; 256];
//!
//! let sqe = ring.get_sqe().expect("ring has room");
//! unsafe { sqe.prep_read(file.as_raw_fd(), buf.as_mut_ptr(), buf.len() as u32, 0) }
//!   .set_user_data(42)
//!   .set_flags(SqeFlags::ASYNC);
//! ring.submit()?;
//!
//! let cqe = ring.wait()?;
//! assert_eq!(cqe.user_data(), 42);
//! cqe.release();
//! # Ok(())
//! # }
//! ```

use core::{mem, ops};
use std::os::fd::RawFd;

use static_assertions::const_assert_eq;

use crate::sys;

/// Request kinds with an encoder in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[non_exhaustive]
pub enum Opcode {
  Nop = sys::IORING_OP_NOP,
  Readv = sys::IORING_OP_READV,
  Writev = sys::IORING_OP_WRITEV,
  Fsync = sys::IORING_OP_FSYNC,
  ReadFixed = sys::IORING_OP_READ_FIXED,
  WriteFixed = sys::IORING_OP_WRITE_FIXED,
  Read = sys::IORING_OP_READ,
  Write = sys::IORING_OP_WRITE,
}

/// Submission Queue Entry flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqeFlags(u8);

impl SqeFlags {
  /// No flags set
  pub const NONE: Self = Self(0);

  /// `fd` is an index into the registered file table
  pub const FIXED_FILE: Self = Self(1 << sys::IOSQE_FIXED_FILE_BIT);

  /// Execute after previous operations complete (ordering barrier)
  pub const IO_DRAIN: Self = Self(1 << sys::IOSQE_IO_DRAIN_BIT);

  /// Link next SQE - next operation won't start until this one completes
  pub const IO_LINK: Self = Self(1 << sys::IOSQE_IO_LINK_BIT);

  /// Like `IO_LINK`, but the chain is not broken when this one fails
  pub const IO_HARDLINK: Self = Self(1 << sys::IOSQE_IO_HARDLINK_BIT);

  /// Issue operation asynchronously
  pub const ASYNC: Self = Self(1 << sys::IOSQE_ASYNC_BIT);

  /// Pick a buffer from a provided buffer group
  pub const BUFFER_SELECT: Self = Self(1 << sys::IOSQE_BUFFER_SELECT_BIT);

  /// Don't generate completion event unless operation fails
  pub const CQE_SKIP_SUCCESS: Self =
    Self(1 << sys::IOSQE_CQE_SKIP_SUCCESS_BIT);

  /// Combine flags using bitwise OR
  pub const fn or(self, other: Self) -> Self {
    Self(self.0 | other.0)
  }

  /// Check if a flag is set
  pub const fn contains(self, other: Self) -> bool {
    (self.0 & other.0) == other.0
  }

  pub const fn bits(self) -> u8 {
    self.0
  }

  pub const fn from_bits(bits: u8) -> Self {
    Self(bits)
  }
}

impl ops::BitOr for SqeFlags {
  type Output = Self;
  fn bitor(self, rhs: Self) -> Self::Output {
    self.or(rhs)
  }
}

impl ops::BitOrAssign for SqeFlags {
  fn bitor_assign(&mut self, rhs: Self) {
    *self = self.or(rhs);
  }
}

/// `struct io_uring_sqe`, with the kernel's single-type unions flattened to
/// one field each.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionEntry {
  opcode: u8,
  flags: u8,
  ioprio: u16,
  fd: i32,
  /// `off` / `addr2`
  off: u64,
  /// `addr` / `splice_off_in`
  addr: u64,
  len: u32,
  /// `rw_flags`, `fsync_flags`, `poll_events`, ...
  op_flags: u32,
  user_data: u64,
  /// `buf_index` / `buf_group`
  buf_index: u16,
  personality: u16,
  /// `splice_fd_in` / `file_index`
  file_index: u32,
  addr3: u64,
  __pad2: [u64; 1],
}

const_assert_eq!(mem::size_of::<SubmissionEntry>(), 64);
const_assert_eq!(mem::offset_of!(SubmissionEntry, fd), 4);
const_assert_eq!(mem::offset_of!(SubmissionEntry, off), 8);
const_assert_eq!(mem::offset_of!(SubmissionEntry, addr), 16);
const_assert_eq!(mem::offset_of!(SubmissionEntry, len), 24);
const_assert_eq!(mem::offset_of!(SubmissionEntry, op_flags), 28);
const_assert_eq!(mem::offset_of!(SubmissionEntry, user_data), 32);
const_assert_eq!(mem::offset_of!(SubmissionEntry, buf_index), 40);
const_assert_eq!(mem::offset_of!(SubmissionEntry, personality), 42);
const_assert_eq!(mem::offset_of!(SubmissionEntry, file_index), 44);
const_assert_eq!(mem::offset_of!(SubmissionEntry, addr3), 48);

impl SubmissionEntry {
  /// Zero every field, including the reserved padding.
  #[inline]
  pub(crate) fn clear(&mut self) {
    *self = Self::default();
  }

  /// Generic read/write style preparation.
  ///
  /// Writes every field of the entry: the opcode and the
  /// `fd`/`addr`/`len`/`off` quadruple are set from the arguments, all other
  /// fields (flags, tag, union members, padding) are reset to zero, so nothing
  /// from a previous use of the slot reaches the kernel.
  ///
  /// # Safety
  /// `addr` is handed to the kernel as-is; whatever it points to must stay
  /// valid for the access `opcode` implies until the completion is reaped.
  #[inline]
  pub unsafe fn prep_rw(
    &mut self,
    opcode: Opcode,
    fd: RawFd,
    addr: *const libc::c_void,
    len: u32,
    offset: u64,
  ) -> &mut Self {
    *self = Self {
      opcode: opcode as u8,
      fd,
      off: offset,
      addr: addr as u64,
      len,
      ..Self::default()
    };
    self
  }

  /// Do not perform any I/O.
  pub fn prep_nop(&mut self) -> &mut Self {
    unsafe { self.prep_rw(Opcode::Nop, -1, core::ptr::null(), 0, 0) }
  }

  /// Equivalent to `pread(2)`. An `offset` of `u64::MAX` (-1) uses and
  /// advances the file position.
  ///
  /// # Safety
  /// `buf` must be valid for writes of `len` bytes until completion.
  pub unsafe fn prep_read(
    &mut self,
    fd: RawFd,
    buf: *mut u8,
    len: u32,
    offset: u64,
  ) -> &mut Self {
    unsafe { self.prep_rw(Opcode::Read, fd, buf.cast(), len, offset) }
  }

  /// Equivalent to `pwrite(2)`.
  ///
  /// # Safety
  /// `buf` must be valid for reads of `len` bytes until completion.
  pub unsafe fn prep_write(
    &mut self,
    fd: RawFd,
    buf: *const u8,
    len: u32,
    offset: u64,
  ) -> &mut Self {
    unsafe { self.prep_rw(Opcode::Write, fd, buf.cast(), len, offset) }
  }

  /// Vectored read, equivalent to `preadv2(2)`.
  ///
  /// # Safety
  /// `iovecs` and every buffer it describes must stay valid until completion.
  pub unsafe fn prep_readv(
    &mut self,
    fd: RawFd,
    iovecs: &[libc::iovec],
    offset: u64,
  ) -> &mut Self {
    unsafe {
      self.prep_rw(
        Opcode::Readv,
        fd,
        iovecs.as_ptr().cast(),
        iovecs.len() as u32,
        offset,
      )
    }
  }

  /// Vectored write, equivalent to `pwritev2(2)`.
  ///
  /// # Safety
  /// `iovecs` and every buffer it describes must stay valid until completion.
  pub unsafe fn prep_writev(
    &mut self,
    fd: RawFd,
    iovecs: &[libc::iovec],
    offset: u64,
  ) -> &mut Self {
    unsafe {
      self.prep_rw(
        Opcode::Writev,
        fd,
        iovecs.as_ptr().cast(),
        iovecs.len() as u32,
        offset,
      )
    }
  }

  /// Read into a registered buffer. `buf` must lie inside the buffer
  /// registered at `buf_index`.
  ///
  /// # Safety
  /// Same as [`prep_read`](Self::prep_read).
  pub unsafe fn prep_read_fixed(
    &mut self,
    fd: RawFd,
    buf: *mut u8,
    len: u32,
    offset: u64,
    buf_index: u16,
  ) -> &mut Self {
    unsafe { self.prep_rw(Opcode::ReadFixed, fd, buf.cast(), len, offset) };
    self.buf_index = buf_index;
    self
  }

  /// Write from a registered buffer.
  ///
  /// # Safety
  /// Same as [`prep_write`](Self::prep_write).
  pub unsafe fn prep_write_fixed(
    &mut self,
    fd: RawFd,
    buf: *const u8,
    len: u32,
    offset: u64,
    buf_index: u16,
  ) -> &mut Self {
    unsafe { self.prep_rw(Opcode::WriteFixed, fd, buf.cast(), len, offset) };
    self.buf_index = buf_index;
    self
  }

  /// File sync, equivalent to `fsync(2)`, or `fdatasync(2)` with
  /// [`IORING_FSYNC_DATASYNC`](sys::IORING_FSYNC_DATASYNC).
  pub fn prep_fsync(&mut self, fd: RawFd, fsync_flags: u32) -> &mut Self {
    unsafe { self.prep_rw(Opcode::Fsync, fd, core::ptr::null(), 0, 0) };
    self.op_flags = fsync_flags;
    self
  }

  /// Set the correlation tag echoed back in the completion.
  #[inline]
  pub fn set_user_data(&mut self, user_data: u64) -> &mut Self {
    self.user_data = user_data;
    self
  }

  /// Replace the `IOSQE_*` flags.
  #[inline]
  pub fn set_flags(&mut self, flags: SqeFlags) -> &mut Self {
    self.flags = flags.bits();
    self
  }

  #[inline]
  pub fn set_ioprio(&mut self, ioprio: u16) -> &mut Self {
    self.ioprio = ioprio;
    self
  }

  /// Address the target by its index in the registered file table instead of
  /// by descriptor.
  pub fn set_fixed_file(&mut self, index: u32) -> &mut Self {
    self.fd = index as i32;
    self.flags |= SqeFlags::FIXED_FILE.bits();
    self
  }

  /// Install the descriptor a request creates into slot `index` of the
  /// registered file table. Stored as `index + 1`; zero means "not fixed".
  ///
  /// `u32::MAX` saturates to an index no file table can hold, so the kernel
  /// fails the request instead of treating it as unfixed.
  pub fn set_target_fixed_file(&mut self, index: u32) -> &mut Self {
    self.file_index = index.saturating_add(1);
    self
  }

  pub fn opcode(&self) -> u8 {
    self.opcode
  }

  pub fn flags(&self) -> SqeFlags {
    SqeFlags(self.flags)
  }

  pub fn fd(&self) -> RawFd {
    self.fd
  }

  pub fn user_data(&self) -> u64 {
    self.user_data
  }

  pub fn addr(&self) -> u64 {
    self.addr
  }

  pub fn len(&self) -> u32 {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn offset(&self) -> u64 {
    self.off
  }

  pub fn buf_index(&self) -> u16 {
    self.buf_index
  }

  pub fn file_index(&self) -> u32 {
    self.file_index
  }

  pub fn op_flags(&self) -> u32 {
    self.op_flags
  }
}

/// `struct io_uring_cqe`
///
/// `res` is negative errno on failure, otherwise an opcode-dependent success
/// value (bytes transferred for reads and writes).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompletionEntry {
  user_data: u64,
  pub res: i32,
  pub flags: u32,
}

const_assert_eq!(mem::size_of::<CompletionEntry>(), 16);
const_assert_eq!(mem::offset_of!(CompletionEntry, res), 8);
const_assert_eq!(mem::offset_of!(CompletionEntry, flags), 12);

impl CompletionEntry {
  pub fn new(user_data: u64, res: i32, flags: u32) -> Self {
    Self { user_data, res, flags }
  }

  /// The correlation tag of the originating submission.
  #[inline]
  pub fn user_data(&self) -> u64 {
    self.user_data
  }
}
