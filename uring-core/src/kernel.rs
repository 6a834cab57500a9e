//! Kernel call gateway.
//!
//! Every privileged call the ring makes goes through [`Kernel`]: the three
//! io_uring system calls plus the mapping and descriptor calls needed to set
//! up and tear down a ring. [`Syscalls`] is the real implementation; tests
//! substitute an in-process fake.

use core::ptr::{self, NonNull};
use std::{io, os::fd::RawFd};

use crate::sys;

/// The privileged calls the ring engine depends on.
///
/// Each method maps 1:1 onto one underlying call and reports failure as the
/// `io::Error` of that call. Implementations never retry.
pub trait Kernel {
  /// `io_uring_setup(2)`. Fills in `params` and returns the ring descriptor.
  fn setup(
    &self,
    entries: u32,
    params: &mut sys::io_uring_params,
  ) -> io::Result<RawFd>;

  /// `io_uring_enter(2)`. Returns the number of submissions consumed.
  ///
  /// # Safety
  /// Every entry published to the submission ring must reference memory that
  /// stays valid until its completion is reaped.
  unsafe fn enter(
    &self,
    fd: RawFd,
    to_submit: u32,
    min_complete: u32,
    flags: u32,
  ) -> io::Result<u32>;

  /// `io_uring_register(2)`.
  ///
  /// # Safety
  /// `arg` must point to `nr_args` elements of the type `opcode` expects.
  unsafe fn register(
    &self,
    fd: RawFd,
    opcode: u32,
    arg: *const libc::c_void,
    nr_args: u32,
  ) -> io::Result<u32>;

  /// Maps `len` bytes of the ring at `offset` shared and read/write.
  fn map(&self, fd: RawFd, len: usize, offset: u64) -> io::Result<NonNull<u8>>;

  /// Unmaps a region returned by [`Kernel::map`].
  ///
  /// # Safety
  /// `ptr`/`len` must describe exactly one live mapping, which must not be
  /// accessed afterwards.
  unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize);

  /// Closes the ring descriptor.
  fn close(&self, fd: RawFd);
}

impl<K: Kernel + ?Sized> Kernel for &K {
  fn setup(
    &self,
    entries: u32,
    params: &mut sys::io_uring_params,
  ) -> io::Result<RawFd> {
    (**self).setup(entries, params)
  }

  unsafe fn enter(
    &self,
    fd: RawFd,
    to_submit: u32,
    min_complete: u32,
    flags: u32,
  ) -> io::Result<u32> {
    unsafe { (**self).enter(fd, to_submit, min_complete, flags) }
  }

  unsafe fn register(
    &self,
    fd: RawFd,
    opcode: u32,
    arg: *const libc::c_void,
    nr_args: u32,
  ) -> io::Result<u32> {
    unsafe { (**self).register(fd, opcode, arg, nr_args) }
  }

  fn map(&self, fd: RawFd, len: usize, offset: u64) -> io::Result<NonNull<u8>> {
    (**self).map(fd, len, offset)
  }

  unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) {
    unsafe { (**self).unmap(ptr, len) }
  }

  fn close(&self, fd: RawFd) {
    (**self).close(fd)
  }
}

/// The real kernel, reached through `libc`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Syscalls;

impl Kernel for Syscalls {
  fn setup(
    &self,
    entries: u32,
    params: &mut sys::io_uring_params,
  ) -> io::Result<RawFd> {
    let ret = unsafe {
      libc::syscall(
        libc::SYS_io_uring_setup,
        entries,
        params as *mut sys::io_uring_params,
      )
    };
    if ret < 0 {
      return Err(io::Error::last_os_error());
    }
    Ok(ret as RawFd)
  }

  unsafe fn enter(
    &self,
    fd: RawFd,
    to_submit: u32,
    min_complete: u32,
    flags: u32,
  ) -> io::Result<u32> {
    let ret = unsafe {
      libc::syscall(
        libc::SYS_io_uring_enter,
        fd,
        to_submit,
        min_complete,
        flags,
        ptr::null::<libc::sigset_t>(),
        0usize,
      )
    };
    if ret < 0 {
      return Err(io::Error::last_os_error());
    }
    Ok(ret as u32)
  }

  unsafe fn register(
    &self,
    fd: RawFd,
    opcode: u32,
    arg: *const libc::c_void,
    nr_args: u32,
  ) -> io::Result<u32> {
    let ret = unsafe {
      libc::syscall(libc::SYS_io_uring_register, fd, opcode, arg, nr_args)
    };
    if ret < 0 {
      return Err(io::Error::last_os_error());
    }
    Ok(ret as u32)
  }

  fn map(&self, fd: RawFd, len: usize, offset: u64) -> io::Result<NonNull<u8>> {
    let ptr = unsafe {
      libc::mmap(
        ptr::null_mut(),
        len,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_SHARED | libc::MAP_POPULATE,
        fd,
        offset as libc::off_t,
      )
    };
    if ptr == libc::MAP_FAILED {
      return Err(io::Error::last_os_error());
    }
    NonNull::new(ptr.cast())
      .ok_or_else(|| io::Error::other("mmap returned a null mapping"))
  }

  unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) {
    unsafe { libc::munmap(ptr.as_ptr().cast(), len) };
  }

  fn close(&self, fd: RawFd) {
    unsafe { libc::close(fd) };
  }
}
