//! # uring-core
//!
//! A typed io_uring ring engine for Linux.
//!
//! [`Ring`] owns one kernel ring: it negotiates the ring shape, maps the
//! submission ring, completion ring and submission entry array, and drives
//! the producer/consumer protocol on both rings. Requests are written in
//! place into the mapped entry array through [`SubmissionEntry`] and results
//! are read in place through [`CompletionRef`].
//!
//! ```rust,no_run
//! use std::os::fd::AsRawFd;
//!
//! # fn main() -> std::io::Result<()> {
//! let mut ring = uring_core::with_capacity(32)?;
//! let file = std::fs::File::open("Cargo.toml")?;
//! let mut buf = vec![0u8; 4096];
//!
//! let sqe = ring.get_sqe().expect("empty ring has room");
//! unsafe { sqe.prep_read(file.as_raw_fd(), buf.as_mut_ptr(), buf.len() as u32, 0) }
//!   .set_user_data(1);
//! ring.submit()?;
//!
//! let cqe = ring.wait()?;
//! let read = cqe.res;
//! cqe.release();
//! println!("read {read} bytes");
//! # Ok(())
//! # }
//! ```
//!
//! Every privileged call goes through the [`Kernel`] trait. [`Syscalls`] is
//! the real kernel; [`Ring::with_kernel`] accepts any other implementation.

pub mod sys;

mod completion;
mod entry;
mod error;
mod kernel;
mod mmap;
mod params;
mod ring;
mod submission;

#[cfg(test)]
mod test_utils;

pub use completion::{Completion, CompletionQueue, CompletionRef, Drain};
pub use entry::{CompletionEntry, Opcode, SqeFlags, SubmissionEntry};
pub use error::{Error, Region, Result};
pub use kernel::{Kernel, Syscalls};
pub use params::Params;
pub use ring::Ring;
pub use submission::SubmissionQueue;

/// Create a ring with `entries` submission slots and default parameters.
pub fn with_capacity(entries: u32) -> Result<Ring> {
  Ring::new(entries, 0)
}

/// Create a ring with `entries` submission slots from a parameter builder.
pub fn with_params(entries: u32, params: Params) -> Result<Ring> {
  Ring::with_params(entries, params)
}
