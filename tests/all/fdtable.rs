use super::{Counters, CountingFile, errno};
use anyhow::Result;
use std::sync::Arc;
use wasip1_host::dir::OpenResult;
use wasip1_host::fdtable::FdRecord;
use wasip1_host::rights::{self, FdRights};
use wasip1_host::types::{Advice, Errno, FdFlags, Filetype, OFlags, Rights};
use wasip1_host::{WasiCtx, WasiSnapshotPreview1, sync};

fn open_a_txt(ctx: &WasiCtx, dir: &tempfile::TempDir, rights: FdRights) -> Result<i32> {
    let host = sync::open_ambient_dir(dir.path())?;
    let OpenResult::File(file) =
        host.open_file(false, "a.txt", OFlags::CREAT, true, true, FdFlags::empty())?
    else {
        panic!("a.txt should open as a file");
    };
    Ok(ctx.push_file(file, rights)?)
}

#[test_log::test]
fn open_close_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ctx = WasiCtx::builder().build()?;

    let granted = FdRights::from_base(rights::REGULAR_FILE_BASE);
    let fd = open_a_txt(&ctx, &dir, granted)?;
    assert_eq!(fd, 3);
    let stat = ctx.fd_fdstat_get(3)?;
    assert_eq!(stat.fs_filetype, Filetype::RegularFile);
    assert_eq!(stat.fs_rights_base, rights::REGULAR_FILE_BASE);
    assert_eq!(stat.fs_rights_inheriting, Rights::empty());

    ctx.fd_close(3)?;
    assert_eq!(errno(ctx.fd_fdstat_get(3).unwrap_err()), Errno::Badf);
    assert_eq!(errno(ctx.fd_close(3).unwrap_err()), Errno::Badf);

    // The slot comes back with only what the new open grants.
    let fd = open_a_txt(&ctx, &dir, FdRights::from_base(Rights::FD_READ))?;
    assert_eq!(fd, 3);
    let stat = ctx.fd_fdstat_get(3)?;
    assert_eq!(stat.fs_filetype, Filetype::RegularFile);
    assert_eq!(stat.fs_rights_base, Rights::FD_READ);
    Ok(())
}

#[test_log::test]
fn renumber_far_away() -> Result<()> {
    let counters = Arc::new(Counters::default());
    let ctx = WasiCtx::builder().build()?;
    let fd = ctx.push_file(
        Box::new(CountingFile(counters.clone())),
        FdRights::from_base(rights::REGULAR_FILE_BASE),
    )?;
    assert_eq!(fd, 3);
    let record = ctx.table().resolve(3)?;

    ctx.fd_renumber(3, 1_000_000)?;
    let moved = ctx.table().resolve(1_000_000)?;
    assert!(Arc::ptr_eq(&record, &moved));
    assert!(ctx.table().resolve_and_lock(1_000_000).is_ok());
    let stale = ctx.table().resolve_and_lock(3).err().expect("fd 3 was moved away");
    assert_eq!(errno(stale), Errno::Badf);

    ctx.fd_advise(1_000_000, 0, 0, Advice::Normal)?;
    assert_eq!(counters.calls(), 1);
    assert_eq!(counters.drops(), 0);

    // The freed slot is the next one handed out.
    let fd = ctx.push_file(
        Box::new(CountingFile(Arc::new(Counters::default()))),
        FdRights::from_base(Rights::FD_READ),
    )?;
    assert_eq!(fd, 3);

    ctx.fd_close(1_000_000)?;
    assert_eq!(counters.drops(), 1);
    assert!(!ctx.table().is_open(1_000_000));
    Ok(())
}

#[test_log::test]
fn renumber_closes_the_target() -> Result<()> {
    let first = Arc::new(Counters::default());
    let second = Arc::new(Counters::default());
    let ctx = WasiCtx::builder().build()?;
    let rights = FdRights::from_base(rights::REGULAR_FILE_BASE);
    let a = ctx.push_file(Box::new(CountingFile(first.clone())), rights)?;
    let b = ctx.push_file(Box::new(CountingFile(second.clone())), rights)?;

    ctx.fd_renumber(a, b)?;
    assert_eq!(second.drops(), 1);
    assert_eq!(first.drops(), 0);
    ctx.fd_datasync(b)?;
    assert_eq!(first.calls(), 1);
    assert_eq!(errno(ctx.fd_datasync(a).unwrap_err()), Errno::Badf);
    Ok(())
}

#[test_log::test]
fn renumber_onto_an_occupied_far_number() -> Result<()> {
    let first = Arc::new(Counters::default());
    let second = Arc::new(Counters::default());
    let ctx = WasiCtx::builder().build()?;
    let rights = FdRights::from_base(rights::REGULAR_FILE_BASE);
    let a = ctx.push_file(Box::new(CountingFile(first.clone())), rights)?;
    let b = ctx.push_file(Box::new(CountingFile(second.clone())), rights)?;
    let moving = ctx.table().resolve(b)?;

    ctx.fd_renumber(a, 1_000_000)?;
    ctx.fd_renumber(b, 1_000_000)?;
    assert_eq!(first.drops(), 1);
    assert_eq!(second.drops(), 0);
    assert!(Arc::ptr_eq(&moving, &ctx.table().resolve(1_000_000)?));
    // stdio plus the one far descriptor
    assert_eq!(ctx.table().len(), 4);

    ctx.fd_datasync(1_000_000)?;
    assert_eq!(second.calls(), 1);
    assert_eq!(first.calls(), 0);
    ctx.fd_close(1_000_000)?;
    assert_eq!(first.drops(), 1);
    assert_eq!(second.drops(), 1);
    assert_eq!(ctx.table().len(), 3);
    Ok(())
}

#[test_log::test]
fn renumber_onto_stdout_keeps_the_pipe() -> Result<()> {
    let stdout = wasip1_host::pipe::WritePipe::new_in_memory();
    let ctx = WasiCtx::builder().stdout(Box::new(stdout.clone())).build()?;
    let counters = Arc::new(Counters::default());
    let fd = ctx.push_file(
        Box::new(CountingFile(counters.clone())),
        FdRights::from_base(rights::REGULAR_FILE_BASE),
    )?;

    ctx.fd_renumber(fd, 1)?;
    let n = ctx.fd_write(1, &[std::io::IoSlice::new(b"to the file")])?;
    assert_eq!(n, 11);
    assert_eq!(counters.calls(), 1);
    // Stdout was only observed by the table, so it is still usable.
    assert!(stdout.contents().is_empty());
    Ok(())
}

#[test_log::test]
fn missing_rights_never_reach_the_host() -> Result<()> {
    let counters = Arc::new(Counters::default());
    let ctx = WasiCtx::builder().build()?;
    let fd = ctx.push_file(
        Box::new(CountingFile(counters.clone())),
        FdRights::from_base(Rights::FD_READ),
    )?;

    assert_eq!(
        errno(ctx.fd_advise(fd, 0, 0, Advice::Random).unwrap_err()),
        Errno::Notcapable
    );
    assert_eq!(
        errno(ctx.fd_write(fd, &[std::io::IoSlice::new(b"x")]).unwrap_err()),
        Errno::Notcapable
    );
    assert_eq!(errno(ctx.fd_datasync(fd).unwrap_err()), Errno::Notcapable);
    assert_eq!(counters.calls(), 0);

    ctx.fd_read(fd, &mut [])?;
    assert_eq!(counters.calls(), 1);
    Ok(())
}

#[test_log::test]
fn records_do_not_move_as_the_table_grows() -> Result<()> {
    let ctx = WasiCtx::builder().build()?;
    let rights = FdRights::from_base(Rights::FD_READ);
    let fd = ctx.push_file(Box::new(CountingFile(Arc::new(Counters::default()))), rights)?;
    let before = ctx.table().resolve(fd)?;
    let before_ptr = {
        let record = before.lock();
        &*record as *const FdRecord
    };

    for _ in 0..1000 {
        ctx.push_file(Box::new(CountingFile(Arc::new(Counters::default()))), rights)?;
    }

    let after = ctx.table().resolve(fd)?;
    assert!(Arc::ptr_eq(&before, &after));
    let after_ptr = {
        let record = after.lock();
        &*record as *const FdRecord
    };
    assert_eq!(before_ptr, after_ptr);
    assert_eq!(ctx.table().len(), 1004);
    Ok(())
}
