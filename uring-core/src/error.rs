//! Error types for ring setup, submission and registration.

use core::fmt;
use std::io;

use thiserror::Error;

/// Result type alias for ring operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The shared memory region a mapping step was producing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
  /// Submission ring header, cursors and index array.
  SqRing,
  /// Completion ring header, cursors and CQE array.
  CqRing,
  /// The physical submission entry array.
  Sqes,
}

impl fmt::Display for Region {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Region::SqRing => "submission ring",
      Region::CqRing => "completion ring",
      Region::Sqes => "submission entry array",
    })
  }
}

/// Failure of a ring operation.
///
/// Setup errors (`RingCreation`, `Mapping`) are terminal for that creation
/// attempt: every resource acquired before the failure has already been
/// released when the error is returned. `Enter` and `Register` leave the ring
/// intact and usable.
#[derive(Debug, Error)]
pub enum Error {
  /// The kernel refused the ring parameters.
  #[error("io_uring_setup failed: {0}")]
  RingCreation(#[source] io::Error),

  /// Mapping one of the shared regions failed after the ring was created.
  #[error("failed to map the {region}: {source}")]
  Mapping {
    region: Region,
    #[source]
    source: io::Error,
  },

  /// `io_uring_enter` returned an error. Not retried.
  #[error("io_uring_enter failed: {0}")]
  Enter(#[source] io::Error),

  /// `io_uring_register` returned an error.
  #[error("io_uring_register (opcode {opcode}) failed: {source}")]
  Register {
    opcode: u32,
    #[source]
    source: io::Error,
  },
}

impl Error {
  /// The underlying OS error code, if any.
  pub fn raw_os_error(&self) -> Option<i32> {
    self.io_error().raw_os_error()
  }

  /// The io error that caused this failure.
  pub fn io_error(&self) -> &io::Error {
    match self {
      Error::RingCreation(e) | Error::Enter(e) => e,
      Error::Mapping { source, .. } | Error::Register { source, .. } => source,
    }
  }
}

impl From<Error> for io::Error {
  fn from(err: Error) -> Self {
    io::Error::new(err.io_error().kind(), err)
  }
}

static_assertions::assert_impl_all!(Error: Send, Sync);
