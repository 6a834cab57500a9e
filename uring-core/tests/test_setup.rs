mod common;

use uring_core::{Error, Params, Ring, sys};

#[test]
fn test_entries_round_up_to_power_of_two() {
  let Some(ring) = common::ring(5) else { return };

  let params = ring.params();
  assert_eq!(params.sq_entries(), 8);
  assert_eq!(params.cq_entries(), 16);
  assert!(ring.fd() >= 0);
  assert_eq!(ring.flags(), 0);
}

#[test]
fn test_custom_cq_size() {
  let Some(mut ring) = common::ring_with(4, Params::default().cq_size(64))
  else {
    return;
  };
  assert_eq!(ring.params().sq_entries(), 4);
  assert_eq!(ring.params().cq_entries(), 64);
  assert_eq!(ring.completion().capacity(), 64);
}

#[test]
fn test_zero_entries_is_rejected() {
  common::init_tracing();
  match Ring::new(0, 0) {
    Err(err) if common::unsupported(err.raw_os_error()) => {}
    Err(Error::RingCreation(source)) => {
      assert_eq!(source.raw_os_error(), Some(libc::EINVAL));
    }
    Err(err) => panic!("unexpected error: {err}"),
    Ok(_) => panic!("a ring without entries was created"),
  }
}

#[test]
fn test_ring_reports_features() {
  let Some(ring) = common::ring(2) else { return };
  // Every kernel new enough for IORING_OP_READ maps both rings at once.
  assert!(ring.features() & sys::IORING_FEAT_SINGLE_MMAP != 0);
  assert!(!ring.is_sqpoll());
  assert!(!ring.is_iopoll());
}

#[test]
fn test_many_rings_open_and_close() {
  for _ in 0..64 {
    let Some(ring) = common::ring(32) else { return };
    drop(ring);
  }
}

#[test]
fn test_crate_shortcuts() {
  common::init_tracing();
  match uring_core::with_capacity(8) {
    Ok(ring) => assert_eq!(ring.params().sq_entries(), 8),
    Err(err) => assert!(common::unsupported(err.raw_os_error()), "{err}"),
  }
  match uring_core::with_params(8, Params::default().clamp()) {
    Ok(ring) => assert!(ring.flags() & sys::IORING_SETUP_CLAMP != 0),
    Err(err) => assert!(common::unsupported(err.raw_os_error()), "{err}"),
  }
}
