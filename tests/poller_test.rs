//! Fd readiness poller driven over a real pipe.

use std::os::fd::AsRawFd;
use std::time::Duration;

use syncvisor::{Bus, EventKind, FdInterest, FdPoller};

#[tokio::test(flavor = "multi_thread")]
async fn pipe_write_latches_read_readiness() {
    let bus = Bus::new();
    let owner = bus.register();
    let poller = FdPoller::new(&bus, owner.id(), Duration::from_millis(50));

    let (read_end, write_end) = nix::unistd::pipe().unwrap();
    poller.set(read_end.as_raw_fd(), FdInterest::READ);

    nix::unistd::write(&write_end, b"x").unwrap();

    let ev = owner
        .pop_wait(Some(Duration::from_secs(5)))
        .await
        .expect("readiness event expected");
    assert_eq!(ev.kind(), EventKind::FdReady);

    // is_set reports once, then the latch is clear.
    assert!(poller.is_set(read_end.as_raw_fd(), FdInterest::READ));
    assert!(!poller.is_set(read_end.as_raw_fd(), FdInterest::READ));
    assert!(!poller.is_set(read_end.as_raw_fd(), FdInterest::WRITE));

    poller.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn at_most_one_readiness_event_pending() {
    let bus = Bus::new();
    let owner = bus.register();
    let poller = FdPoller::new(&bus, owner.id(), Duration::from_millis(20));

    let (read_end, write_end) = nix::unistd::pipe().unwrap();
    poller.set(read_end.as_raw_fd(), FdInterest::READ);
    nix::unistd::write(&write_end, b"x").unwrap();

    // Let several poll cycles fire without draining the inbox.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(owner
        .pop_wait(Some(Duration::from_secs(5)))
        .await
        .is_some());
    assert!(owner.pop().is_none());

    poller.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn set_clears_stale_latch_and_clear_removes_interest() {
    let bus = Bus::new();
    let owner = bus.register();
    let poller = FdPoller::new(&bus, owner.id(), Duration::from_millis(20));

    let (read_end, write_end) = nix::unistd::pipe().unwrap();
    poller.set(read_end.as_raw_fd(), FdInterest::READ);
    nix::unistd::write(&write_end, b"x").unwrap();

    owner
        .pop_wait(Some(Duration::from_secs(5)))
        .await
        .expect("readiness event expected");

    // Drain the pipe so no further cycle can re-latch, then re-arm:
    // whatever was latched in the meantime is discarded.
    let mut sink = [0u8; 8];
    nix::unistd::read(read_end.as_raw_fd(), &mut sink).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    poller.set(read_end.as_raw_fd(), FdInterest::READ);
    assert!(!poller.is_set(read_end.as_raw_fd(), FdInterest::READ));

    poller.clear(read_end.as_raw_fd());
    assert!(!poller.is_set(read_end.as_raw_fd(), FdInterest::READ));

    poller.shutdown().await;
}
