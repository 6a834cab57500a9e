//! `cat` over io_uring: one vectored read per file, 1 KiB blocks.
//!
//! ```sh
//! cargo run --example cat -- Cargo.toml src/lib.rs
//! ```

use std::{
  fs::File,
  io::{self, Write},
  os::fd::AsRawFd,
  path::Path,
};

use uring_core::Ring;

const BLOCK_SZ: usize = 1024;

struct FileRead {
  file: File,
  blocks: Vec<Vec<u8>>,
  iovecs: Vec<libc::iovec>,
}

impl FileRead {
  fn open(path: &Path) -> io::Result<Self> {
    let file = File::open(path)?;
    let size = file.metadata()?.len() as usize;

    let mut blocks: Vec<Vec<u8>> = (0..size.div_ceil(BLOCK_SZ))
      .map(|i| vec![0u8; BLOCK_SZ.min(size - i * BLOCK_SZ)])
      .collect();
    let iovecs = blocks
      .iter_mut()
      .map(|b| libc::iovec { iov_base: b.as_mut_ptr().cast(), iov_len: b.len() })
      .collect();
    Ok(Self { file, blocks, iovecs })
  }
}

fn cat(ring: &mut Ring, path: &Path, tag: u64) -> io::Result<()> {
  let read = FileRead::open(path)?;

  let Some(sqe) = ring.get_sqe() else {
    return Err(io::Error::other("submission ring full"));
  };
  unsafe { sqe.prep_readv(read.file.as_raw_fd(), &read.iovecs, 0) }
    .set_user_data(tag);
  ring.submit()?;

  let cqe = ring.wait()?;
  assert_eq!(cqe.user_data(), tag);
  let completion = cqe.take();
  let mut left = completion.result()? as usize;

  let mut out = io::stdout().lock();
  for block in &read.blocks {
    let n = left.min(block.len());
    out.write_all(&block[..n])?;
    left -= n;
  }
  out.flush()
}

fn main() -> io::Result<()> {
  let paths: Vec<String> = std::env::args().skip(1).collect();
  if paths.is_empty() {
    eprintln!("usage: cat <file> [<file> ...]");
    std::process::exit(1);
  }

  let mut ring = Ring::new(4, 0)?;
  for (tag, path) in paths.iter().enumerate() {
    if let Err(err) = cat(&mut ring, Path::new(path), tag as u64) {
      eprintln!("{path}: {err}");
    }
  }
  Ok(())
}
