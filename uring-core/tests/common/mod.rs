#![allow(dead_code)]

use std::{fs::File, io::Write, path::PathBuf};

use tracing_subscriber::EnvFilter;
use uring_core::{Params, Ring};

pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

/// Errors meaning io_uring is unavailable here (old kernel, seccomp,
/// `io_uring_disabled` sysctl), not that the crate is broken.
pub fn unsupported(errno: Option<i32>) -> bool {
  matches!(errno, Some(libc::ENOSYS | libc::EPERM | libc::EACCES))
}

/// A real ring, or `None` if the kernel refuses io_uring altogether.
pub fn ring_with(entries: u32, params: Params) -> Option<Ring> {
  init_tracing();
  match Ring::with_params(entries, params) {
    Ok(ring) => Some(ring),
    Err(err) if unsupported(err.raw_os_error()) => {
      eprintln!("skipping: io_uring unavailable ({err})");
      None
    }
    Err(err) => panic!("ring setup failed: {err}"),
  }
}

pub fn ring(entries: u32) -> Option<Ring> {
  ring_with(entries, Params::default())
}

/// Scratch file removed on drop.
pub struct TempFile {
  pub path: PathBuf,
  pub file: File,
}

impl TempFile {
  pub fn new(contents: &[u8]) -> Self {
    let path = std::env::temp_dir()
      .join(format!("uring_core_test_{:016x}", fastrand::u64(..)));
    let mut file = File::options()
      .read(true)
      .write(true)
      .create_new(true)
      .open(&path)
      .unwrap();
    file.write_all(contents).unwrap();
    Self { path, file }
  }
}

impl Drop for TempFile {
  fn drop(&mut self) {
    let _ = std::fs::remove_file(&self.path);
  }
}
