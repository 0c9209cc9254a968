use super::{errno, sandbox};
use anyhow::Result;
use std::io::{IoSlice, IoSliceMut};
use wasip1_host::rights;
use wasip1_host::snapshots::preview_1::wasi_snapshot_preview1 as abi;
use wasip1_host::types::{
    Advice, Errno, FdFlags, Filetype, LookupFlags, OFlags, Prestat, Rights, Whence,
};
use wasip1_host::{Error, WasiCtx, WasiSnapshotPreview1};

fn create(ctx: &WasiCtx, dirfd: i32, path: &str, base: Rights) -> Result<i32, Error> {
    ctx.path_open(
        dirfd,
        LookupFlags::empty(),
        path,
        OFlags::CREAT,
        base,
        Rights::empty(),
        FdFlags::empty(),
    )
}

#[test_log::test]
fn write_seek_read() -> Result<()> {
    let (dir, ctx) = sandbox()?;
    let fd = create(&ctx, 3, "a.txt", rights::REGULAR_FILE_BASE)?;
    assert_eq!(fd, 4);

    let stat = ctx.fd_fdstat_get(fd)?;
    assert_eq!(stat.fs_filetype, Filetype::RegularFile);
    assert_eq!(stat.fs_rights_base, rights::REGULAR_FILE_BASE);

    assert_eq!(ctx.fd_write(fd, &[IoSlice::new(b"hello "), IoSlice::new(b"world")])?, 11);
    assert_eq!(ctx.fd_tell(fd)?, 11);
    assert_eq!(ctx.fd_seek(fd, 0, Whence::Set)?, 0);

    let mut buf = [0u8; 32];
    let n = ctx.fd_read(fd, &mut [IoSliceMut::new(&mut buf)])?;
    assert_eq!(&buf[..n as usize], b"hello world");

    let mut buf = [0u8; 5];
    let n = ctx.fd_pread(fd, &mut [IoSliceMut::new(&mut buf)], 6)?;
    assert_eq!(&buf[..n as usize], b"world");

    ctx.fd_filestat_set_size(fd, 5)?;
    assert_eq!(ctx.fd_filestat_get(fd)?.size, 5);
    ctx.fd_sync(fd)?;
    ctx.fd_close(fd)?;

    assert_eq!(std::fs::read(dir.path().join("a.txt"))?, b"hello");
    Ok(())
}

#[test_log::test]
fn negative_set_offset_is_inval() -> Result<()> {
    let (_dir, ctx) = sandbox()?;
    let fd = create(&ctx, 3, "a.txt", rights::REGULAR_FILE_BASE)?;
    assert_eq!(errno(ctx.fd_seek(fd, -1, Whence::Set).unwrap_err()), Errno::Inval);
    Ok(())
}

#[test_log::test]
fn opened_directories_get_directory_rights() -> Result<()> {
    let (dir, ctx) = sandbox()?;
    ctx.path_create_directory(3, "sub")?;
    let sub = ctx.path_open(
        3,
        LookupFlags::empty(),
        "sub",
        OFlags::DIRECTORY,
        rights::DIRECTORY_BASE | Rights::FD_READ,
        rights::REGULAR_FILE_BASE,
        FdFlags::empty(),
    )?;
    let stat = ctx.fd_fdstat_get(sub)?;
    assert_eq!(stat.fs_filetype, Filetype::Directory);
    assert_eq!(stat.fs_rights_base, rights::DIRECTORY_BASE);
    assert_eq!(stat.fs_rights_inheriting, rights::REGULAR_FILE_BASE);

    // Only the preopen itself has a prestat.
    assert_eq!(errno(ctx.fd_prestat_get(sub).unwrap_err()), Errno::Notdir);

    let f = create(&ctx, sub, "f", Rights::FD_READ | Rights::FD_WRITE)?;
    assert_eq!(
        ctx.fd_fdstat_get(f)?.fs_rights_base,
        Rights::FD_READ | Rights::FD_WRITE
    );
    let stat = ctx.path_filestat_get(3, LookupFlags::empty(), "sub/f")?;
    assert_eq!(stat.filetype, Filetype::RegularFile);
    assert!(dir.path().join("sub").join("f").is_file());
    Ok(())
}

#[test_log::test]
fn advice_and_flags_on_a_directory() -> Result<()> {
    let (_dir, ctx) = sandbox()?;
    ctx.fd_advise(3, 0, 0, Advice::Normal)?;
    ctx.fd_fdstat_set_flags(3, FdFlags::empty())?;
    #[cfg(unix)]
    ctx.fd_fdstat_set_flags(3, FdFlags::NONBLOCK)?;
    assert_eq!(
        errno(ctx.fd_fdstat_set_flags(3, FdFlags::DSYNC).unwrap_err()),
        Errno::Inval
    );

    // Both calls are still gated by the directory's rights.
    let stat = ctx.fd_fdstat_get(3)?;
    ctx.fd_fdstat_set_rights(
        3,
        stat.fs_rights_base - (Rights::FD_ADVISE | Rights::FD_FDSTAT_SET_FLAGS),
        stat.fs_rights_inheriting,
    )?;
    assert_eq!(
        errno(ctx.fd_advise(3, 0, 0, Advice::Normal).unwrap_err()),
        Errno::Notcapable
    );
    assert_eq!(
        errno(ctx.fd_fdstat_set_flags(3, FdFlags::empty()).unwrap_err()),
        Errno::Notcapable
    );
    Ok(())
}

#[test_log::test]
fn inheriting_rights_bound_new_descriptors() -> Result<()> {
    let (dir, ctx) = sandbox()?;
    ctx.path_create_directory(3, "sub")?;
    let sub = ctx.path_open(
        3,
        LookupFlags::empty(),
        "sub",
        OFlags::DIRECTORY,
        rights::DIRECTORY_BASE,
        Rights::FD_READ,
        FdFlags::empty(),
    )?;

    let err = create(&ctx, sub, "g", Rights::FD_READ | Rights::FD_WRITE).unwrap_err();
    assert_eq!(errno(err), Errno::Notcapable);
    // Refused before anything was created on the host.
    assert!(!dir.path().join("sub").join("g").exists());
    Ok(())
}

#[test_log::test]
fn files_cannot_open_paths() -> Result<()> {
    let (_dir, ctx) = sandbox()?;
    let fd = create(&ctx, 3, "a.txt", rights::REGULAR_FILE_BASE)?;
    assert_eq!(
        errno(create(&ctx, fd, "b.txt", Rights::FD_READ).unwrap_err()),
        Errno::Notcapable
    );
    assert_eq!(
        errno(ctx.path_create_directory(fd, "d").unwrap_err()),
        Errno::Notcapable
    );
    Ok(())
}

#[test_log::test]
fn path_open_argument_checks() -> Result<()> {
    let (_dir, ctx) = sandbox()?;
    let open = |path: &str, oflags: OFlags, base: Rights, fdflags: FdFlags| {
        ctx.path_open(3, LookupFlags::empty(), path, oflags, base, Rights::empty(), fdflags)
            .map_err(errno)
    };
    let rw = Rights::FD_READ | Rights::FD_WRITE;

    assert_eq!(open("", OFlags::CREAT, rw, FdFlags::empty()), Err(Errno::Inval));
    assert_eq!(open("/etc/passwd", OFlags::empty(), rw, FdFlags::empty()), Err(Errno::Perm));
    assert_eq!(
        open("a", OFlags::CREAT | OFlags::TRUNC, Rights::FD_READ, FdFlags::empty()),
        Err(Errno::Inval)
    );
    assert_eq!(open("a", OFlags::EXCL, rw, FdFlags::empty()), Err(Errno::Inval));
    assert_eq!(
        open(".", OFlags::DIRECTORY, Rights::empty(), FdFlags::APPEND),
        Err(Errno::Inval)
    );
    assert_eq!(open("missing", OFlags::empty(), rw, FdFlags::empty()), Err(Errno::Noent));

    open("a", OFlags::CREAT | OFlags::EXCL, rw, FdFlags::empty())?;
    assert_eq!(
        open("a", OFlags::CREAT | OFlags::EXCL, rw, FdFlags::empty()),
        Err(Errno::Exist)
    );
    Ok(())
}

#[test_log::test]
fn prestat() -> Result<()> {
    let (_dir, ctx) = sandbox()?;
    assert_eq!(ctx.fd_prestat_get(3)?, Prestat::Dir { pr_name_len: 8 });
    assert_eq!(ctx.fd_prestat_dir_name(3, 8)?, "/sandbox");
    assert_eq!(
        errno(ctx.fd_prestat_dir_name(3, 7).unwrap_err()),
        Errno::Nametoolong
    );
    assert_eq!(errno(ctx.fd_prestat_get(0).unwrap_err()), Errno::Notdir);
    assert_eq!(errno(ctx.fd_prestat_get(4).unwrap_err()), Errno::Badf);

    let mut mem = vec![0u8; 32];
    assert_eq!(abi::fd_prestat_get(&ctx, &mut mem, 3, 0), Errno::Success);
    assert_eq!(mem[0], 0);
    assert_eq!(&mem[4..8], &8u32.to_le_bytes());
    assert_eq!(abi::fd_prestat_dir_name(&ctx, &mut mem, 3, 16, 8), Errno::Success);
    assert_eq!(&mem[16..24], b"/sandbox");
    Ok(())
}

#[test_log::test]
fn remove_and_unlink() -> Result<()> {
    let (dir, ctx) = sandbox()?;
    ctx.path_create_directory(3, "d")?;
    let fd = create(&ctx, 3, "f", Rights::FD_WRITE)?;
    ctx.fd_close(fd)?;

    assert_eq!(
        errno(ctx.path_create_directory(3, "d").unwrap_err()),
        Errno::Exist
    );
    ctx.path_remove_directory(3, "d")?;
    ctx.path_unlink_file(3, "f")?;
    assert!(!dir.path().join("d").exists());
    assert!(!dir.path().join("f").exists());
    assert_eq!(errno(ctx.path_unlink_file(3, "f").unwrap_err()), Errno::Noent);
    Ok(())
}

fn dirent_names(buf: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    let mut at = 0;
    while at + 24 <= buf.len() {
        let namlen = u32::from_le_bytes(buf[at + 16..at + 20].try_into().unwrap()) as usize;
        let name = &buf[at + 24..at + 24 + namlen];
        names.push(String::from_utf8(name.to_vec()).unwrap());
        at += 24 + namlen;
    }
    names.sort();
    names
}

// Readdir does not work on windows, so we won't test it there.
#[cfg(not(windows))]
#[test_log::test]
fn readdir() -> Result<()> {
    let (_dir, ctx) = sandbox()?;
    ctx.path_create_directory(3, "x")?;
    ctx.fd_close(create(&ctx, 3, "y", Rights::FD_WRITE)?)?;

    let mut buf = vec![0u8; 4096];
    let used = ctx.fd_readdir(3, &mut buf, 0)?;
    assert_eq!(dirent_names(&buf[..used as usize]), [".", "..", "x", "y"]);

    // A buffer too small for the first entry is reported full.
    let mut small = [0u8; 10];
    assert_eq!(ctx.fd_readdir(3, &mut small, 0)?, 10);

    let fd = create(&ctx, 3, "z", rights::REGULAR_FILE_BASE)?;
    assert_eq!(
        errno(ctx.fd_readdir(fd, &mut buf, 0).unwrap_err()),
        Errno::Notcapable
    );
    Ok(())
}

#[test_log::test]
fn raw_abi_path_open() -> Result<()> {
    let (dir, ctx) = sandbox()?;
    let mut mem = vec![0u8; 64];
    mem[0..5].copy_from_slice(b"a.txt");
    let base = (Rights::FD_READ | Rights::FD_WRITE).bits() as i64;
    let errno = abi::path_open(
        &ctx,
        &mut mem,
        3,
        0,
        0,
        5,
        OFlags::CREAT.bits().into(),
        base,
        0,
        0,
        8,
    );
    assert_eq!(errno, Errno::Success);
    assert_eq!(&mem[8..12], &4u32.to_le_bytes());
    assert!(dir.path().join("a.txt").is_file());

    assert_eq!(abi::fd_fdstat_get(&ctx, &mut mem, 4, 16), Errno::Success);
    assert_eq!(mem[16], Filetype::RegularFile as u8);
    assert_eq!(&mem[24..32], &(base as u64).to_le_bytes());

    // Unknown oflags bits and a path running off the end of memory.
    assert_eq!(
        abi::path_open(&ctx, &mut mem, 3, 0, 0, 5, 0x10, base, 0, 0, 8),
        Errno::Inval
    );
    assert_eq!(
        abi::path_open(&ctx, &mut mem, 3, 0, 60, 8, 0, base, 0, 0, 8),
        Errno::Fault
    );
    Ok(())
}

#[test_log::test]
fn trace_calls_does_not_change_results() -> Result<()> {
    let ctx = WasiCtx::builder().trace_calls(true).build()?;
    assert_eq!(abi::fd_close(&ctx, 3), Errno::Badf);
    assert_eq!(abi::fd_renumber(&ctx, 2, 2), Errno::Success);
    assert_eq!(abi::fd_close(&ctx, 2), Errno::Success);
    assert_eq!(abi::fd_close(&ctx, 2), Errno::Badf);
    Ok(())
}

#[cfg(unix)]
mod sockets {
    use super::*;
    use std::io::{Read, Write};
    use wasip1_host::sync::net::Socket;
    use wasip1_host::types::{RiFlags, SdFlags, SiFlags};

    #[test_log::test]
    fn accept_recv_send() -> Result<()> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let listener = Socket::from(cap_std::net::TcpListener::from_std(listener));
        let ctx = WasiCtx::builder()
            .preopened_socket(3, listener.into())
            .build()?;
        assert_eq!(ctx.fd_fdstat_get(3)?.fs_filetype, Filetype::SocketStream);

        let mut client = std::net::TcpStream::connect(addr)?;
        let conn = ctx.sock_accept(3, FdFlags::empty())?;
        assert_eq!(conn, 4);
        assert_eq!(ctx.fd_fdstat_get(conn)?.fs_rights_base, rights::SOCKET_BASE);

        client.write_all(b"ping")?;
        let mut buf = [0u8; 4];
        let (n, _) = ctx.sock_recv(
            conn,
            &mut [IoSliceMut::new(&mut buf)],
            RiFlags::RECV_WAITALL,
        )?;
        assert_eq!(&buf[..n as usize], b"ping");

        assert_eq!(ctx.sock_send(conn, &[IoSlice::new(b"pong")], SiFlags::empty())?, 4);
        ctx.sock_shutdown(conn, SdFlags::WR)?;
        let mut reply = Vec::new();
        client.read_to_end(&mut reply)?;
        assert_eq!(reply, b"pong");

        assert_eq!(
            errno(ctx.sock_accept(3, FdFlags::APPEND).unwrap_err()),
            Errno::Inval
        );
        Ok(())
    }

    #[test_log::test]
    fn socket_calls_on_files() -> Result<()> {
        let (_dir, ctx) = sandbox()?;
        let fd = create(&ctx, 3, "a.txt", rights::REGULAR_FILE_BASE)?;
        // A file lacks the socket rights outright.
        assert_eq!(
            errno(ctx.sock_shutdown(fd, SdFlags::RD).unwrap_err()),
            Errno::Notcapable
        );
        // With the right read right, the type check is what fails.
        assert_eq!(
            errno(ctx.sock_recv(fd, &mut [], RiFlags::empty()).unwrap_err()),
            Errno::Notsock
        );
        Ok(())
    }
}
