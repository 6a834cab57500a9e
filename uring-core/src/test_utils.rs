//! In-process stand-in for the kernel side of io_uring.
//!
//! [`FakeKernel`] implements [`Kernel`] on heap memory laid out like the
//! kernel's `struct io_rings`: it hands out mappings, plays the consumer of
//! the submission ring and the producer of the completion ring, counts open
//! descriptors and live mappings, and can be told to fail any step.

use core::{
  cell::RefCell,
  ptr::NonNull,
  sync::atomic::{AtomicU32, Ordering},
};
use std::{
  alloc::{self, Layout},
  io,
  os::fd::RawFd,
};

use crate::{CompletionEntry, SubmissionEntry, kernel::Kernel, sys};

const MAX_ENTRIES: u32 = 4096;
const CACHELINE: usize = 64;

/// One `io_uring_enter` call as seen by the fake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EnterCall {
  pub to_submit: u32,
  pub min_complete: u32,
  pub flags: u32,
}

struct Allocation {
  offset: u64,
  ptr: NonNull<u8>,
  layout: Layout,
}

#[derive(Default)]
struct State {
  dual_mapping: bool,
  fail_setup: Option<i32>,
  fail_map: Option<u64>,
  fail_enter: Option<i32>,
  complete_on_enter: bool,
  next_fd: RawFd,
  open_fds: Vec<RawFd>,
  params: sys::io_uring_params,
  allocations: Vec<Allocation>,
  enters: Vec<EnterCall>,
  registers: Vec<(u32, u32)>,
}

pub(crate) struct FakeKernel {
  state: RefCell<State>,
}

/// Offsets the way the kernel lays out `struct io_rings`: each cursor on its
/// own cache line, then the shared header words, the CQE array, and the SQ
/// index array after it.
fn ring_offsets(
  cq_entries: u32,
) -> (sys::io_sqring_offsets, sys::io_cqring_offsets) {
  let cqes = 320u32;
  let cqes_end = cqes as usize
    + cq_entries as usize * core::mem::size_of::<CompletionEntry>();
  let array = cqes_end.next_multiple_of(CACHELINE) as u32;
  let sq = sys::io_sqring_offsets {
    head: 0,
    tail: 64,
    ring_mask: 256,
    ring_entries: 264,
    dropped: 272,
    flags: 276,
    array,
    ..Default::default()
  };
  let cq = sys::io_cqring_offsets {
    head: 128,
    tail: 192,
    ring_mask: 260,
    ring_entries: 268,
    flags: 280,
    overflow: 284,
    cqes,
    ..Default::default()
  };
  (sq, cq)
}

fn errno(code: i32) -> io::Error {
  io::Error::from_raw_os_error(code)
}

impl FakeKernel {
  /// A kernel reporting `IORING_FEAT_SINGLE_MMAP`.
  pub(crate) fn new() -> Self {
    Self { state: RefCell::new(State { next_fd: 100, ..Default::default() }) }
  }

  /// A kernel without `IORING_FEAT_SINGLE_MMAP`: both rings are mapped
  /// separately.
  pub(crate) fn dual_mapping(self) -> Self {
    self.state.borrow_mut().dual_mapping = true;
    self
  }

  /// Every `io_uring_enter` consumes all published submissions and completes
  /// them.
  pub(crate) fn completing(self) -> Self {
    self.state.borrow_mut().complete_on_enter = true;
    self
  }

  pub(crate) fn fail_setup(&self, code: i32) {
    self.state.borrow_mut().fail_setup = Some(code);
  }

  /// Fail the mapping at `offset` (one of the `IORING_OFF_*` constants).
  pub(crate) fn fail_map(&self, offset: u64) {
    self.state.borrow_mut().fail_map = Some(offset);
  }

  pub(crate) fn fail_enter(&self, code: Option<i32>) {
    self.state.borrow_mut().fail_enter = code;
  }

  pub(crate) fn open_fds(&self) -> usize {
    self.state.borrow().open_fds.len()
  }

  pub(crate) fn live_mappings(&self) -> usize {
    self.state.borrow().allocations.len()
  }

  pub(crate) fn mapped_offsets(&self) -> Vec<u64> {
    self.state.borrow().allocations.iter().map(|a| a.offset).collect()
  }

  pub(crate) fn mapping_base(&self, offset: u64) -> Option<NonNull<u8>> {
    self
      .state
      .borrow()
      .allocations
      .iter()
      .find(|a| a.offset == offset)
      .map(|a| a.ptr)
  }

  pub(crate) fn enter_calls(&self) -> Vec<EnterCall> {
    self.state.borrow().enters.clone()
  }

  pub(crate) fn register_calls(&self) -> Vec<(u32, u32)> {
    self.state.borrow().registers.clone()
  }

  fn params(&self) -> sys::io_uring_params {
    self.state.borrow().params
  }

  fn sq_base(&self) -> NonNull<u8> {
    self.mapping_base(sys::IORING_OFF_SQ_RING).expect("SQ ring not mapped")
  }

  fn cq_base(&self) -> NonNull<u8> {
    self
      .mapping_base(sys::IORING_OFF_CQ_RING)
      .unwrap_or_else(|| self.sq_base())
  }

  fn word(&self, base: NonNull<u8>, offset: u32) -> &AtomicU32 {
    unsafe { &*base.as_ptr().add(offset as usize).cast::<AtomicU32>() }
  }

  pub(crate) fn sq_head(&self) -> u32 {
    self.word(self.sq_base(), self.params().sq_off.head).load(Ordering::Acquire)
  }

  pub(crate) fn sq_tail(&self) -> u32 {
    self.word(self.sq_base(), self.params().sq_off.tail).load(Ordering::Acquire)
  }

  /// The index array slot for logical ring position `pos`.
  pub(crate) fn sq_array(&self, pos: u32) -> u32 {
    let p = self.params();
    let mask = p.sq_entries - 1;
    unsafe {
      self
        .sq_base()
        .as_ptr()
        .add(p.sq_off.array as usize)
        .cast::<u32>()
        .add((pos & mask) as usize)
        .read()
    }
  }

  pub(crate) fn set_sq_flags(&self, bits: u32) {
    self
      .word(self.sq_base(), self.params().sq_off.flags)
      .store(bits, Ordering::Release);
  }

  pub(crate) fn cq_head(&self) -> u32 {
    self.word(self.cq_base(), self.params().cq_off.head).load(Ordering::Acquire)
  }

  /// Consumes up to `max` published submissions, oldest first.
  pub(crate) fn consume(&self, max: usize) -> Vec<SubmissionEntry> {
    let p = self.params();
    let sq = self.sq_base();
    let khead = self.word(sq, p.sq_off.head);
    let ktail = self.word(sq, p.sq_off.tail);
    let sqes = self
      .mapping_base(sys::IORING_OFF_SQES)
      .expect("SQE array not mapped")
      .cast::<SubmissionEntry>();

    let mut head = khead.load(Ordering::Relaxed);
    let tail = ktail.load(Ordering::Acquire);
    let mut taken = Vec::new();
    while head != tail && taken.len() < max {
      let idx = self.sq_array(head);
      assert!(idx < p.sq_entries, "index array points outside the SQE array");
      taken.push(unsafe { sqes.as_ptr().add(idx as usize).read() });
      head = head.wrapping_add(1);
    }
    khead.store(head, Ordering::Release);
    taken
  }

  /// Posts one completion. Returns `false` (and records an overflow) when the
  /// completion ring is full.
  pub(crate) fn complete(&self, user_data: u64, res: i32, flags: u32) -> bool {
    let p = self.params();
    let cq = self.cq_base();
    let khead = self.word(cq, p.cq_off.head).load(Ordering::Acquire);
    let ktail = self.word(cq, p.cq_off.tail);
    let tail = ktail.load(Ordering::Relaxed);

    if tail.wrapping_sub(khead) == p.cq_entries {
      self.word(cq, p.cq_off.overflow).fetch_add(1, Ordering::Release);
      self
        .word(self.sq_base(), p.sq_off.flags)
        .fetch_or(sys::IORING_SQ_CQ_OVERFLOW, Ordering::Release);
      return false;
    }

    let slot = (tail & (p.cq_entries - 1)) as usize;
    unsafe {
      cq.as_ptr()
        .add(p.cq_off.cqes as usize)
        .cast::<CompletionEntry>()
        .add(slot)
        .write(CompletionEntry::new(user_data, res, flags));
    }
    ktail.store(tail.wrapping_add(1), Ordering::Release);
    true
  }

  /// Consumes every published submission and completes it: reads and writes
  /// report their full length, everything else succeeds with 0.
  pub(crate) fn run(&self) -> u32 {
    let taken = self.consume(usize::MAX);
    for sqe in &taken {
      let res = match sqe.opcode() {
        sys::IORING_OP_READ
        | sys::IORING_OP_WRITE
        | sys::IORING_OP_READ_FIXED
        | sys::IORING_OP_WRITE_FIXED => sqe.len() as i32,
        _ => 0,
      };
      self.complete(sqe.user_data(), res, 0);
    }
    taken.len() as u32
  }
}

impl Kernel for FakeKernel {
  fn setup(
    &self,
    entries: u32,
    params: &mut sys::io_uring_params,
  ) -> io::Result<RawFd> {
    let mut st = self.state.borrow_mut();
    if let Some(code) = st.fail_setup {
      return Err(errno(code));
    }

    let clamp = params.flags & sys::IORING_SETUP_CLAMP != 0;
    if entries == 0 || (entries > MAX_ENTRIES && !clamp) {
      return Err(errno(libc::EINVAL));
    }
    let sq_entries = entries.min(MAX_ENTRIES).next_power_of_two();
    let cq_entries = if params.flags & sys::IORING_SETUP_CQSIZE != 0 {
      if params.cq_entries < sq_entries {
        return Err(errno(libc::EINVAL));
      }
      params.cq_entries.next_power_of_two()
    } else {
      sq_entries * 2
    };

    let (sq_off, cq_off) = ring_offsets(cq_entries);
    params.sq_entries = sq_entries;
    params.cq_entries = cq_entries;
    params.features =
      if st.dual_mapping { 0 } else { sys::IORING_FEAT_SINGLE_MMAP };
    params.sq_off = sq_off;
    params.cq_off = cq_off;
    st.params = *params;

    let fd = st.next_fd;
    st.next_fd += 1;
    st.open_fds.push(fd);
    Ok(fd)
  }

  unsafe fn enter(
    &self,
    fd: RawFd,
    to_submit: u32,
    min_complete: u32,
    flags: u32,
  ) -> io::Result<u32> {
    let complete = {
      let mut st = self.state.borrow_mut();
      assert!(st.open_fds.contains(&fd), "enter on a closed ring");
      st.enters.push(EnterCall { to_submit, min_complete, flags });
      if let Some(code) = st.fail_enter {
        return Err(errno(code));
      }
      st.complete_on_enter
    };
    if complete { Ok(self.run()) } else { Ok(to_submit) }
  }

  unsafe fn register(
    &self,
    fd: RawFd,
    opcode: u32,
    _arg: *const libc::c_void,
    nr_args: u32,
  ) -> io::Result<u32> {
    let mut st = self.state.borrow_mut();
    if !st.open_fds.contains(&fd) {
      return Err(errno(libc::EBADF));
    }
    st.registers.push((opcode, nr_args));
    Ok(0)
  }

  fn map(&self, fd: RawFd, len: usize, offset: u64) -> io::Result<NonNull<u8>> {
    let mut st = self.state.borrow_mut();
    if !st.open_fds.contains(&fd) {
      return Err(errno(libc::EBADF));
    }
    if st.fail_map == Some(offset) {
      return Err(errno(libc::ENOMEM));
    }

    let p = st.params;
    let sq_size = p.sq_off.array as usize + p.sq_entries as usize * 4;
    let cq_size = p.cq_off.cqes as usize + p.cq_entries as usize * 16;
    let needed = match offset {
      sys::IORING_OFF_SQ_RING => sq_size,
      sys::IORING_OFF_CQ_RING => cq_size,
      sys::IORING_OFF_SQES => p.sq_entries as usize * 64,
      _ => return Err(errno(libc::EINVAL)),
    };
    if len < needed {
      return Err(errno(libc::EINVAL));
    }

    let layout = Layout::from_size_align(len, CACHELINE)
      .map_err(|_| errno(libc::EINVAL))?;
    let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
      .ok_or_else(|| errno(libc::ENOMEM))?;

    if offset != sys::IORING_OFF_SQES {
      // Both ring mappings see the same header in the real kernel.
      let write = |off: u32, val: u32| unsafe {
        ptr.as_ptr().add(off as usize).cast::<u32>().write(val)
      };
      write(p.sq_off.ring_mask, p.sq_entries - 1);
      write(p.sq_off.ring_entries, p.sq_entries);
      write(p.cq_off.ring_mask, p.cq_entries - 1);
      write(p.cq_off.ring_entries, p.cq_entries);
    }

    st.allocations.push(Allocation { offset, ptr, layout });
    Ok(ptr)
  }

  unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) {
    let mut st = self.state.borrow_mut();
    let pos = st
      .allocations
      .iter()
      .position(|a| a.ptr == ptr)
      .expect("unmap of an address that is not mapped");
    let alloc = st.allocations.remove(pos);
    assert_eq!(alloc.layout.size(), len, "unmap length differs from map");
    unsafe { alloc::dealloc(alloc.ptr.as_ptr(), alloc.layout) };
  }

  fn close(&self, fd: RawFd) {
    let mut st = self.state.borrow_mut();
    let pos = st
      .open_fds
      .iter()
      .position(|&open| open == fd)
      .expect("close of a descriptor that is not open");
    st.open_fds.remove(pos);
  }
}

impl Drop for FakeKernel {
  fn drop(&mut self) {
    for alloc in self.state.get_mut().allocations.drain(..) {
      unsafe { alloc::dealloc(alloc.ptr.as_ptr(), alloc.layout) };
    }
  }
}
