//! Kernel-side submission polling.
//!
//! With SQPOLL a kernel thread consumes the submission ring on its own, so
//! `submit` only calls `io_uring_enter` when that thread has gone idle and
//! must be woken. Needs CAP_SYS_NICE on kernels older than 5.11.

use std::{io, os::fd::AsRawFd};

use uring_core::{Params, Ring, SqeFlags};

fn queue_print(ring: &mut Ring, msg: &'static str, link: bool) -> io::Result<()> {
  let stdout = io::stdout().as_raw_fd();
  let Some(sqe) = ring.get_sqe() else {
    return Err(io::Error::other("submission ring full"));
  };
  let sqe =
    unsafe { sqe.prep_write(stdout, msg.as_ptr(), msg.len() as u32, u64::MAX) }
      .set_user_data(999);
  if link {
    sqe.set_flags(SqeFlags::IO_LINK);
  }
  Ok(())
}

fn reap(ring: &mut Ring, count: usize) -> io::Result<()> {
  for _ in 0..count {
    ring.wait()?.take().result()?;
  }
  Ok(())
}

fn main() -> io::Result<()> {
  // The poller thread sleeps after one second without work.
  let params = Params::default().sqpoll(1000);

  let mut ring = match Ring::with_params(64, params) {
    Ok(ring) => ring,
    Err(e) if e.raw_os_error() == Some(libc::EPERM) => {
      eprintln!("SQPOLL not permitted here");
      return Ok(());
    }
    Err(e) => return Err(e.into()),
  };

  queue_print(&mut ring, "SQPOLL enabled\n", false)?;
  ring.submit()?;
  reap(&mut ring, 1)?;

  for _ in 0..10 {
    let Some(sqe) = ring.get_sqe() else { break };
    sqe.prep_nop();
  }
  // Usually no system call: the poller picks the entries up.
  ring.submit()?;
  for _ in 0..10 {
    let completion = ring.wait()?.take();
    assert!(completion.is_ok());
  }

  // Linked, so they hit stdout in order.
  queue_print(&mut ring, "Submitted operations\n", true)?;
  queue_print(&mut ring, "Completed all operations\n", true)?;
  queue_print(&mut ring, "Poller wakeups are only paid when it slept\n", false)?;
  ring.submit()?;
  reap(&mut ring, 3)?;

  Ok(())
}
