//! The shared memory regions backing a ring.

use core::{ptr::NonNull, sync::atomic::AtomicU32};
use std::os::fd::RawFd;

use crate::{
  Params,
  error::{Error, Region, Result},
  kernel::Kernel,
  sys,
};

/// Resolves a shared `u32` cursor at `offset` bytes past `base`.
///
/// # Safety
/// `base + offset` must be a 4-byte aligned `u32` inside a live mapping that
/// outlives `'a`.
#[inline]
pub(crate) unsafe fn cursor<'a>(base: NonNull<u8>, offset: u32) -> &'a AtomicU32 {
  unsafe { &*base.as_ptr().add(offset as usize).cast::<AtomicU32>() }
}

/// One live mapping: base address and byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Mmap {
  ptr: NonNull<u8>,
  len: usize,
}

impl Mmap {
  fn new<K: Kernel>(
    kernel: &K,
    fd: RawFd,
    len: usize,
    offset: u64,
    region: Region,
  ) -> Result<Self> {
    let ptr = kernel
      .map(fd, len, offset)
      .map_err(|source| Error::Mapping { region, source })?;
    Ok(Self { ptr, len })
  }

  #[inline]
  pub(crate) fn as_ptr(&self) -> NonNull<u8> {
    self.ptr
  }

  #[inline]
  pub(crate) fn len(&self) -> usize {
    self.len
  }

  /// # Safety
  /// Must be called once, and nothing may read through this mapping
  /// afterwards.
  unsafe fn unmap<K: Kernel>(self, kernel: &K) {
    unsafe { kernel.unmap(self.ptr, self.len) };
  }
}

/// The three regions of a ring.
///
/// `cq_ring` is `None` when the kernel supports `IORING_FEAT_SINGLE_MMAP` and
/// the completion ring lives in the submission ring mapping.
#[derive(Debug)]
pub(crate) struct RingMaps {
  pub(crate) sq_ring: Mmap,
  pub(crate) cq_ring: Option<Mmap>,
  pub(crate) sqes: Mmap,
}

impl RingMaps {
  /// Maps every region described by `params`.
  ///
  /// On failure, every region mapped so far is unmapped again before the
  /// error is returned. The descriptor is left open; closing it is the
  /// caller's job.
  pub(crate) fn map<K: Kernel>(
    kernel: &K,
    fd: RawFd,
    params: &Params,
  ) -> Result<Self> {
    let mut sq_len = params.sq_ring_size();
    let mut cq_len = params.cq_ring_size();
    let single = params.has_single_mmap();
    if single {
      sq_len = sq_len.max(cq_len);
      cq_len = sq_len;
    }

    let sq_ring =
      Mmap::new(kernel, fd, sq_len, sys::IORING_OFF_SQ_RING, Region::SqRing)?;

    let cq_ring = if single {
      None
    } else {
      match Mmap::new(kernel, fd, cq_len, sys::IORING_OFF_CQ_RING, Region::CqRing)
      {
        Ok(map) => Some(map),
        Err(err) => {
          tracing::warn!(error = %err, "unwinding ring setup");
          unsafe { sq_ring.unmap(kernel) };
          return Err(err);
        }
      }
    };

    let sqes = match Mmap::new(
      kernel,
      fd,
      params.sqes_size(),
      sys::IORING_OFF_SQES,
      Region::Sqes,
    ) {
      Ok(map) => map,
      Err(err) => {
        tracing::warn!(error = %err, "unwinding ring setup");
        unsafe {
          if let Some(cq_ring) = cq_ring {
            cq_ring.unmap(kernel);
          }
          sq_ring.unmap(kernel);
        }
        return Err(err);
      }
    };

    Ok(Self { sq_ring, cq_ring, sqes })
  }

  /// Base of the completion ring, which may be the submission ring mapping.
  pub(crate) fn cq_base(&self) -> NonNull<u8> {
    self.cq_ring.unwrap_or(self.sq_ring).as_ptr()
  }

  /// Unmaps the entry array, then the completion ring if it is a separate
  /// mapping, then the submission ring.
  ///
  /// # Safety
  /// Must be called at most once; the queues resolved against these regions
  /// must not be used afterwards.
  pub(crate) unsafe fn unmap<K: Kernel>(&self, kernel: &K) {
    unsafe {
      self.sqes.unmap(kernel);
      if let Some(cq_ring) = self.cq_ring {
        cq_ring.unmap(kernel);
      }
      self.sq_ring.unmap(kernel);
    }
  }
}
