use super::{Counters, CountingFile, errno};
use anyhow::Result;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst};
use std::sync::{Arc, Barrier};
use std::time::Duration;
use wasip1_host::rights::{self, FdRights};
use wasip1_host::types::{Advice, Errno, Filetype};
use wasip1_host::{Error, WasiCtx, WasiFile, WasiSnapshotPreview1};

const ITERATIONS: usize = 10_000;

#[test_log::test]
fn advise_racing_close() -> Result<()> {
    let counters = Arc::new(Counters::default());
    let ctx = WasiCtx::builder().build()?;
    let fd = ctx.push_file(
        Box::new(CountingFile(counters.clone())),
        FdRights::from_base(rights::REGULAR_FILE_BASE),
    )?;
    assert_eq!(fd, 3);

    let successes = AtomicUsize::new(0);
    std::thread::scope(|s| {
        let (ctx, successes) = (&ctx, &successes);
        let advisers = (0..4)
            .map(|_| {
                s.spawn(move || {
                    let mut closed = false;
                    for _ in 0..ITERATIONS {
                        match ctx.fd_advise(3, 0, 0, Advice::Normal) {
                            Ok(()) => {
                                assert!(!closed, "advise succeeded after the fd was closed");
                                successes.fetch_add(1, SeqCst);
                            }
                            Err(e) => {
                                assert_eq!(errno(e), Errno::Badf);
                                closed = true;
                            }
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        s.spawn(move || {
            std::thread::yield_now();
            ctx.fd_close(3).unwrap();
        });
        for adviser in advisers {
            adviser.join().unwrap();
        }
    });

    assert_eq!(errno(ctx.fd_advise(3, 0, 0, Advice::Normal).unwrap_err()), Errno::Badf);
    assert_eq!(errno(ctx.fd_close(3).unwrap_err()), Errno::Badf);
    // Every success reached the host, nothing after the close did, and the
    // handle was released exactly once.
    assert_eq!(counters.calls(), successes.load(SeqCst));
    assert_eq!(counters.drops(), 1);
    Ok(())
}

#[test_log::test]
fn distinct_descriptors_do_not_collide() -> Result<()> {
    let counters = Arc::new(Counters::default());
    let ctx = WasiCtx::builder().build()?;
    let rights = FdRights::from_base(rights::REGULAR_FILE_BASE);

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..1000 {
                    let fd = ctx
                        .push_file(Box::new(CountingFile(counters.clone())), rights)
                        .unwrap();
                    // Any other thread holding the same number would make one
                    // of these fail.
                    ctx.fd_advise(fd, 0, 0, Advice::Sequential).unwrap();
                    ctx.fd_datasync(fd).unwrap();
                    ctx.fd_close(fd).unwrap();
                }
            });
        }
    });

    assert_eq!(counters.calls(), 8 * 1000 * 2);
    assert_eq!(counters.drops(), 8 * 1000);
    assert_eq!(ctx.table().len(), 3);
    Ok(())
}

#[test_log::test]
fn renumbers_and_calls_interleave() -> Result<()> {
    let counters = Arc::new(Counters::default());
    let ctx = WasiCtx::builder().build()?;
    let rights = FdRights::from_base(rights::REGULAR_FILE_BASE);
    for _ in 0..4 {
        ctx.push_file(Box::new(CountingFile(counters.clone())), rights)?;
    }

    // Each thread owns one descriptor and bounces it between a dense and a
    // sparse number while the others do the same.
    std::thread::scope(|s| {
        for (low, high) in [(3, 100), (4, 200), (5, 300), (6, 400)] {
            let ctx = &ctx;
            s.spawn(move || {
                for _ in 0..500 {
                    ctx.fd_renumber(low, high).unwrap();
                    ctx.fd_datasync(high).unwrap();
                    ctx.fd_renumber(high, low).unwrap();
                    ctx.fd_datasync(low).unwrap();
                }
            });
        }
    });

    assert_eq!(counters.calls(), 4 * 500 * 2);
    assert_eq!(counters.drops(), 0);
    assert_eq!(ctx.table().len(), 7);
    Ok(())
}

/// A file whose `advise` parks until the test lets it go, recording whether
/// its handle had been released while it was still running.
struct ParkedFile {
    entered: Arc<Barrier>,
    dropped: Arc<AtomicBool>,
    dropped_while_running: Arc<AtomicBool>,
}

impl WasiFile for ParkedFile {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn get_filetype(&self) -> Result<Filetype, Error> {
        Ok(Filetype::RegularFile)
    }
    fn advise(&self, _offset: u64, _len: u64, _advice: Advice) -> Result<(), Error> {
        self.entered.wait();
        std::thread::sleep(Duration::from_millis(50));
        self.dropped_while_running
            .store(self.dropped.load(SeqCst), SeqCst);
        Ok(())
    }
}

impl Drop for ParkedFile {
    fn drop(&mut self) {
        self.dropped.store(true, SeqCst);
    }
}

#[test_log::test]
fn close_waits_for_in_flight_call() -> Result<()> {
    let entered = Arc::new(Barrier::new(2));
    let dropped = Arc::new(AtomicBool::new(false));
    let dropped_while_running = Arc::new(AtomicBool::new(false));
    let ctx = WasiCtx::builder().build()?;
    let fd = ctx.push_file(
        Box::new(ParkedFile {
            entered: entered.clone(),
            dropped: dropped.clone(),
            dropped_while_running: dropped_while_running.clone(),
        }),
        FdRights::from_base(rights::REGULAR_FILE_BASE),
    )?;

    std::thread::scope(|s| {
        let call = s.spawn(|| ctx.fd_advise(fd, 0, 0, Advice::Normal));
        entered.wait();
        let close = s.spawn(|| ctx.fd_close(fd));
        call.join().unwrap().unwrap();
        close.join().unwrap().unwrap();
    });

    assert!(!dropped_while_running.load(SeqCst));
    assert!(dropped.load(SeqCst));
    assert_eq!(errno(ctx.fd_advise(fd, 0, 0, Advice::Normal).unwrap_err()), Errno::Badf);
    Ok(())
}

#[test_log::test]
fn other_descriptors_proceed_during_a_long_call() -> Result<()> {
    let entered = Arc::new(Barrier::new(2));
    let counters = Arc::new(Counters::default());
    let ctx = WasiCtx::builder().build()?;
    let rights = FdRights::from_base(rights::REGULAR_FILE_BASE);
    let parked = ctx.push_file(
        Box::new(ParkedFile {
            entered: entered.clone(),
            dropped: Arc::new(AtomicBool::new(false)),
            dropped_while_running: Arc::new(AtomicBool::new(false)),
        }),
        rights,
    )?;
    let other = ctx.push_file(Box::new(CountingFile(counters.clone())), rights)?;

    std::thread::scope(|s| {
        let call = s.spawn(|| ctx.fd_advise(parked, 0, 0, Advice::Normal));
        entered.wait();
        // The parked call holds only its own record lock.
        for _ in 0..100 {
            ctx.fd_advise(other, 0, 0, Advice::Normal).unwrap();
        }
        let fd = ctx
            .push_file(Box::new(CountingFile(counters.clone())), rights)
            .unwrap();
        ctx.fd_close(fd).unwrap();
        call.join().unwrap().unwrap();
    });

    assert_eq!(counters.calls(), 100);
    Ok(())
}
