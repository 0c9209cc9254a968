//! The `wasi_snapshot_preview1` descriptor calls.
//!
//! [`WasiSnapshotPreview1`] is the typed surface: arguments are already
//! decoded and guest buffers are plain host slices. The
//! [`wasi_snapshot_preview1`] module underneath it is the raw ABI an engine
//! links against, taking the integers off the wasm stack and reading and
//! writing guest memory.
//!
//! Every call resolves and locks its descriptor first, checks rights second
//! and only then touches the host resource, all under the one record lock.

use crate::ctx::WasiCtx;
use crate::dir::{DirStack, OpenResult, ReaddirCursor, WasiDir};
use crate::error::invariant_violation;
use crate::file::SystemTimeSpec;
use crate::native::NativeResource;
use crate::rights::{self, FdRights};
use crate::types::{
    self, Advice, Dircookie, Fd, FdFlags, Fdstat, Filedelta, Filesize, Filetype, FstFlags,
    LookupFlags, OFlags, Prestat, RiFlags, Rights, RoFlags, SdFlags, SiFlags, Size, Timestamp,
    Whence,
};
use crate::{Error, ErrorExt};
use std::io::{IoSlice, IoSliceMut, SeekFrom};
use std::time::{Duration, SystemTime};
use tracing::instrument;

pub trait WasiSnapshotPreview1 {
    fn fd_advise(&self, fd: Fd, offset: Filesize, len: Filesize, advice: Advice)
    -> Result<(), Error>;
    fn fd_allocate(&self, fd: Fd, offset: Filesize, len: Filesize) -> Result<(), Error>;
    fn fd_close(&self, fd: Fd) -> Result<(), Error>;
    fn fd_datasync(&self, fd: Fd) -> Result<(), Error>;
    fn fd_fdstat_get(&self, fd: Fd) -> Result<Fdstat, Error>;
    fn fd_fdstat_set_flags(&self, fd: Fd, flags: FdFlags) -> Result<(), Error>;
    fn fd_fdstat_set_rights(
        &self,
        fd: Fd,
        fs_rights_base: Rights,
        fs_rights_inheriting: Rights,
    ) -> Result<(), Error>;
    fn fd_filestat_get(&self, fd: Fd) -> Result<types::Filestat, Error>;
    fn fd_filestat_set_size(&self, fd: Fd, size: Filesize) -> Result<(), Error>;
    fn fd_filestat_set_times(
        &self,
        fd: Fd,
        atim: Timestamp,
        mtim: Timestamp,
        fst_flags: FstFlags,
    ) -> Result<(), Error>;
    fn fd_pread(
        &self,
        fd: Fd,
        iovs: &mut [IoSliceMut<'_>],
        offset: Filesize,
    ) -> Result<Size, Error>;
    fn fd_pwrite(&self, fd: Fd, ciovs: &[IoSlice<'_>], offset: Filesize) -> Result<Size, Error>;
    fn fd_prestat_get(&self, fd: Fd) -> Result<Prestat, Error>;
    fn fd_prestat_dir_name(&self, fd: Fd, path_max_len: Size) -> Result<String, Error>;
    fn fd_read(&self, fd: Fd, iovs: &mut [IoSliceMut<'_>]) -> Result<Size, Error>;
    fn fd_readdir(&self, fd: Fd, buf: &mut [u8], cookie: Dircookie) -> Result<Size, Error>;
    fn fd_renumber(&self, from: Fd, to: Fd) -> Result<(), Error>;
    fn fd_seek(&self, fd: Fd, offset: Filedelta, whence: Whence) -> Result<Filesize, Error>;
    fn fd_sync(&self, fd: Fd) -> Result<(), Error>;
    fn fd_tell(&self, fd: Fd) -> Result<Filesize, Error>;
    fn fd_write(&self, fd: Fd, ciovs: &[IoSlice<'_>]) -> Result<Size, Error>;
    fn path_create_directory(&self, dirfd: Fd, path: &str) -> Result<(), Error>;
    fn path_filestat_get(
        &self,
        dirfd: Fd,
        flags: LookupFlags,
        path: &str,
    ) -> Result<types::Filestat, Error>;
    #[allow(clippy::too_many_arguments)]
    fn path_open(
        &self,
        dirfd: Fd,
        dirflags: LookupFlags,
        path: &str,
        oflags: OFlags,
        fs_rights_base: Rights,
        fs_rights_inheriting: Rights,
        fdflags: FdFlags,
    ) -> Result<Fd, Error>;
    fn path_remove_directory(&self, dirfd: Fd, path: &str) -> Result<(), Error>;
    fn path_unlink_file(&self, dirfd: Fd, path: &str) -> Result<(), Error>;
    fn sock_accept(&self, fd: Fd, flags: FdFlags) -> Result<Fd, Error>;
    fn sock_recv(
        &self,
        fd: Fd,
        ri_data: &mut [IoSliceMut<'_>],
        ri_flags: RiFlags,
    ) -> Result<(Size, RoFlags), Error>;
    fn sock_send(&self, fd: Fd, si_data: &[IoSlice<'_>], si_flags: SiFlags) -> Result<Size, Error>;
    fn sock_shutdown(&self, fd: Fd, how: SdFlags) -> Result<(), Error>;
}

impl WasiSnapshotPreview1 for WasiCtx {
    #[instrument(level = "trace", skip(self))]
    fn fd_advise(
        &self,
        fd: Fd,
        offset: Filesize,
        len: Filesize,
        advice: Advice,
    ) -> Result<(), Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        entry.check_rights(Rights::FD_ADVISE)?;
        match entry.native()? {
            // Advice on a directory is accepted and ignored.
            NativeResource::DirStack(_) => Ok(()),
            native => native.file()?.advise(offset, len, advice),
        }
    }

    #[instrument(level = "trace", skip(self))]
    fn fd_allocate(&self, fd: Fd, offset: Filesize, len: Filesize) -> Result<(), Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        entry.check_rights(Rights::FD_ALLOCATE)?;
        entry.native()?.file()?.allocate(offset, len)
    }

    #[instrument(level = "trace", skip(self))]
    fn fd_close(&self, fd: Fd) -> Result<(), Error> {
        self.table().close(fd)
    }

    #[instrument(level = "trace", skip(self))]
    fn fd_datasync(&self, fd: Fd) -> Result<(), Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        entry.check_rights(Rights::FD_DATASYNC)?;
        entry.native()?.file()?.datasync()
    }

    #[instrument(level = "trace", skip(self))]
    fn fd_fdstat_get(&self, fd: Fd) -> Result<Fdstat, Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        let native = entry.native()?;
        let fs_flags = match native {
            NativeResource::DirStack(_) => FdFlags::empty(),
            _ => native.file()?.get_fdflags()?,
        };
        let rights = entry.rights();
        Ok(Fdstat {
            fs_filetype: native.filetype()?,
            fs_flags,
            fs_rights_base: rights.base,
            fs_rights_inheriting: rights.inheriting,
        })
    }

    #[instrument(level = "trace", skip(self))]
    fn fd_fdstat_set_flags(&self, fd: Fd, flags: FdFlags) -> Result<(), Error> {
        let mut entry = self.table().resolve_and_lock(fd)?;
        entry.check_rights(Rights::FD_FDSTAT_SET_FLAGS)?;
        match entry.native_mut()? {
            NativeResource::DirStack(stack) => top_dir(stack)?.set_fdflags(flags),
            native => native.file_mut()?.set_fdflags(flags),
        }
    }

    #[instrument(level = "trace", skip(self))]
    fn fd_fdstat_set_rights(
        &self,
        fd: Fd,
        fs_rights_base: Rights,
        fs_rights_inheriting: Rights,
    ) -> Result<(), Error> {
        let mut entry = self.table().resolve_and_lock(fd)?;
        entry.set_rights(FdRights::new(fs_rights_base, fs_rights_inheriting))
    }

    #[instrument(level = "trace", skip(self))]
    fn fd_filestat_get(&self, fd: Fd) -> Result<types::Filestat, Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        entry.check_rights(Rights::FD_FILESTAT_GET)?;
        let stat = match entry.native()? {
            NativeResource::DirStack(stack) => top_dir(stack)?.get_filestat()?,
            native => native.file()?.get_filestat()?,
        };
        Ok(stat.into())
    }

    #[instrument(level = "trace", skip(self))]
    fn fd_filestat_set_size(&self, fd: Fd, size: Filesize) -> Result<(), Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        entry.check_rights(Rights::FD_FILESTAT_SET_SIZE)?;
        entry.native()?.file()?.set_filestat_size(size)
    }

    #[instrument(level = "trace", skip(self))]
    fn fd_filestat_set_times(
        &self,
        fd: Fd,
        atim: Timestamp,
        mtim: Timestamp,
        fst_flags: FstFlags,
    ) -> Result<(), Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        entry.check_rights(Rights::FD_FILESTAT_SET_TIMES)?;
        let atim = systimespec(
            fst_flags.contains(FstFlags::ATIM),
            atim,
            fst_flags.contains(FstFlags::ATIM_NOW),
        )?;
        let mtim = systimespec(
            fst_flags.contains(FstFlags::MTIM),
            mtim,
            fst_flags.contains(FstFlags::MTIM_NOW),
        )?;
        entry.native()?.file()?.set_times(atim, mtim)
    }

    #[instrument(level = "trace", skip(self, iovs))]
    fn fd_pread(
        &self,
        fd: Fd,
        iovs: &mut [IoSliceMut<'_>],
        offset: Filesize,
    ) -> Result<Size, Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        entry.check_rights(Rights::FD_READ | Rights::FD_SEEK)?;
        let n = entry.native()?.file_for_io()?.read_vectored_at(iovs, offset)?;
        Ok(Size::try_from(n)?)
    }

    #[instrument(level = "trace", skip(self, ciovs))]
    fn fd_pwrite(&self, fd: Fd, ciovs: &[IoSlice<'_>], offset: Filesize) -> Result<Size, Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        entry.check_rights(Rights::FD_WRITE | Rights::FD_SEEK)?;
        let n = entry
            .native()?
            .file_for_io()?
            .write_vectored_at(ciovs, offset)?;
        Ok(Size::try_from(n)?)
    }

    #[instrument(level = "trace", skip(self))]
    fn fd_prestat_get(&self, fd: Fd) -> Result<Prestat, Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        let name = preopen_name(entry.native()?)?;
        Ok(Prestat::Dir {
            pr_name_len: Size::try_from(name.len())?,
        })
    }

    #[instrument(level = "trace", skip(self))]
    fn fd_prestat_dir_name(&self, fd: Fd, path_max_len: Size) -> Result<String, Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        let name = preopen_name(entry.native()?)?;
        if name.len() > usize::try_from(path_max_len)? {
            return Err(Error::name_too_long()
                .context(format!("preopen name is {} bytes", name.len())));
        }
        Ok(name.to_owned())
    }

    #[instrument(level = "trace", skip(self, iovs))]
    fn fd_read(&self, fd: Fd, iovs: &mut [IoSliceMut<'_>]) -> Result<Size, Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        entry.check_rights(Rights::FD_READ)?;
        let n = entry.native()?.file_for_io()?.read_vectored(iovs)?;
        Ok(Size::try_from(n)?)
    }

    #[instrument(level = "trace", skip(self, buf))]
    fn fd_readdir(&self, fd: Fd, buf: &mut [u8], cookie: Dircookie) -> Result<Size, Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        entry.check_rights(Rights::FD_READDIR)?;
        let dir = top_dir(entry.native()?.dir_stack()?)?;

        let buf_len = buf.len();
        let mut bufused = 0;
        for entity in dir.readdir(ReaddirCursor::from(cookie))? {
            let entity = entity?;
            let name_raw = entity.name.as_bytes();
            let dirent_raw = types::Dirent {
                d_next: u64::from(entity.next),
                d_ino: entity.inode,
                d_namlen: u32::try_from(name_raw.len())?,
                d_type: entity.filetype,
            }
            .to_bytes();

            // Copy as much of the header and then the name as fits. A partial
            // entry reports a full buffer so the guest knows it is not at the
            // end of the directory.
            for raw in [&dirent_raw[..], name_raw] {
                let copy_len = raw.len().min(buf_len - bufused);
                buf[bufused..bufused + copy_len].copy_from_slice(&raw[..copy_len]);
                bufused += copy_len;
                if copy_len < raw.len() {
                    return Ok(Size::try_from(buf_len)?);
                }
            }
        }
        Ok(Size::try_from(bufused)?)
    }

    #[instrument(level = "trace", skip(self))]
    fn fd_renumber(&self, from: Fd, to: Fd) -> Result<(), Error> {
        self.table().renumber(from, to)
    }

    #[instrument(level = "trace", skip(self))]
    fn fd_seek(&self, fd: Fd, offset: Filedelta, whence: Whence) -> Result<Filesize, Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        let required = if whence == Whence::Cur && offset == 0 {
            Rights::FD_TELL
        } else {
            Rights::FD_SEEK | Rights::FD_TELL
        };
        entry.check_rights(required)?;
        let pos = match whence {
            Whence::Set => SeekFrom::Start(
                u64::try_from(offset)
                    .map_err(|_| Error::invalid_argument().context("negative offset"))?,
            ),
            Whence::Cur => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset),
        };
        entry.native()?.file_for_io()?.seek(pos)
    }

    #[instrument(level = "trace", skip(self))]
    fn fd_sync(&self, fd: Fd) -> Result<(), Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        entry.check_rights(Rights::FD_SYNC)?;
        match entry.native()? {
            // Nothing to flush for a directory handle.
            NativeResource::DirStack(_) => Ok(()),
            native => native.file()?.sync(),
        }
    }

    #[instrument(level = "trace", skip(self))]
    fn fd_tell(&self, fd: Fd) -> Result<Filesize, Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        entry.check_rights(Rights::FD_TELL)?;
        entry.native()?.file_for_io()?.seek(SeekFrom::Current(0))
    }

    #[instrument(level = "trace", skip(self, ciovs))]
    fn fd_write(&self, fd: Fd, ciovs: &[IoSlice<'_>]) -> Result<Size, Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        entry.check_rights(Rights::FD_WRITE)?;
        let n = entry.native()?.file_for_io()?.write_vectored(ciovs)?;
        Ok(Size::try_from(n)?)
    }

    #[instrument(level = "trace", skip(self))]
    fn path_create_directory(&self, dirfd: Fd, path: &str) -> Result<(), Error> {
        let entry = self.table().resolve_and_lock(dirfd)?;
        entry.check_rights(Rights::PATH_CREATE_DIRECTORY)?;
        let path = guest_path(path)?;
        top_dir(entry.native()?.dir_stack()?)?.create_dir(path)
    }

    #[instrument(level = "trace", skip(self))]
    fn path_filestat_get(
        &self,
        dirfd: Fd,
        flags: LookupFlags,
        path: &str,
    ) -> Result<types::Filestat, Error> {
        let entry = self.table().resolve_and_lock(dirfd)?;
        entry.check_rights(Rights::PATH_FILESTAT_GET)?;
        let path = guest_path(path)?;
        let stat = top_dir(entry.native()?.dir_stack()?)?
            .get_path_filestat(path, flags.contains(LookupFlags::SYMLINK_FOLLOW))?;
        Ok(stat.into())
    }

    #[instrument(level = "trace", skip(self))]
    fn path_open(
        &self,
        dirfd: Fd,
        dirflags: LookupFlags,
        path: &str,
        oflags: OFlags,
        fs_rights_base: Rights,
        fs_rights_inheriting: Rights,
        fdflags: FdFlags,
    ) -> Result<Fd, Error> {
        let (native, rights) = {
            let entry = self.table().resolve_and_lock(dirfd)?;
            entry.check_rights(rights::required_for_open(oflags))?;
            let path = guest_path(path)?;

            let requested = FdRights::new(fs_rights_base, fs_rights_inheriting);
            entry.rights().check_inheritable(&requested)?;

            if oflags.contains(OFlags::TRUNC) && !fs_rights_base.contains(Rights::FD_WRITE) {
                return Err(Error::invalid_argument().context("TRUNC without FD_WRITE"));
            }
            if oflags.contains(OFlags::EXCL) && !oflags.contains(OFlags::CREAT) {
                return Err(Error::invalid_argument().context("EXCL without CREAT"));
            }
            if oflags.contains(OFlags::DIRECTORY)
                && (oflags.intersects(OFlags::CREAT | OFlags::EXCL | OFlags::TRUNC)
                    || fdflags.contains(FdFlags::APPEND))
            {
                return Err(Error::invalid_argument()
                    .context("DIRECTORY with CREAT, EXCL, TRUNC or APPEND"));
            }

            let stack = entry.native()?.dir_stack()?;
            let (read, write) = rights::access_mode(fs_rights_base);
            let symlink_follow = dirflags.contains(LookupFlags::SYMLINK_FOLLOW);
            match top_dir(stack)?.open_file(symlink_follow, path, oflags, read, write, fdflags)? {
                OpenResult::File(file) => {
                    let filetype = file.get_filetype()?;
                    (NativeResource::File(file), requested.clamp_to(filetype))
                }
                OpenResult::Dir(dir) => (
                    NativeResource::DirStack(stack.child(dir, path)),
                    requested.clamp_to(Filetype::Directory),
                ),
            }
        };
        // The directory's record lock is released; the table lock comes next.
        self.table().open(native, rights)
    }

    #[instrument(level = "trace", skip(self))]
    fn path_remove_directory(&self, dirfd: Fd, path: &str) -> Result<(), Error> {
        let entry = self.table().resolve_and_lock(dirfd)?;
        entry.check_rights(Rights::PATH_REMOVE_DIRECTORY)?;
        let path = guest_path(path)?;
        top_dir(entry.native()?.dir_stack()?)?.remove_dir(path)
    }

    #[instrument(level = "trace", skip(self))]
    fn path_unlink_file(&self, dirfd: Fd, path: &str) -> Result<(), Error> {
        let entry = self.table().resolve_and_lock(dirfd)?;
        entry.check_rights(Rights::PATH_UNLINK_FILE)?;
        let path = guest_path(path)?;
        top_dir(entry.native()?.dir_stack()?)?.unlink_file(path)
    }

    #[instrument(level = "trace", skip(self))]
    fn sock_accept(&self, fd: Fd, flags: FdFlags) -> Result<Fd, Error> {
        let (stream, rights) = {
            let entry = self.table().resolve_and_lock(fd)?;
            entry.check_rights(Rights::SOCK_ACCEPT)?;
            if !(flags - FdFlags::NONBLOCK).is_empty() {
                return Err(Error::invalid_argument().context("only NONBLOCK may be set"));
            }
            let stream = entry.native()?.socket()?.sock_accept(flags)?;
            let parent = entry.rights();
            let base = parent.base & parent.inheriting;
            (stream, FdRights::new(base, base))
        };
        self.table().open(NativeResource::Socket(stream), rights)
    }

    #[instrument(level = "trace", skip(self, ri_data))]
    fn sock_recv(
        &self,
        fd: Fd,
        ri_data: &mut [IoSliceMut<'_>],
        ri_flags: RiFlags,
    ) -> Result<(Size, RoFlags), Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        entry.check_rights(Rights::FD_READ)?;
        let (n, ro_flags) = entry.native()?.socket()?.sock_recv(ri_data, ri_flags)?;
        Ok((Size::try_from(n)?, ro_flags))
    }

    #[instrument(level = "trace", skip(self, si_data))]
    fn sock_send(&self, fd: Fd, si_data: &[IoSlice<'_>], si_flags: SiFlags) -> Result<Size, Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        entry.check_rights(Rights::FD_WRITE)?;
        let n = entry.native()?.socket()?.sock_send(si_data, si_flags)?;
        Ok(Size::try_from(n)?)
    }

    #[instrument(level = "trace", skip(self))]
    fn sock_shutdown(&self, fd: Fd, how: SdFlags) -> Result<(), Error> {
        let entry = self.table().resolve_and_lock(fd)?;
        entry.check_rights(Rights::SOCK_SHUTDOWN)?;
        entry.native()?.socket()?.sock_shutdown(how)
    }
}

fn top_dir(stack: &DirStack) -> Result<&dyn WasiDir, Error> {
    stack
        .top()
        .map(|frame| &*frame.dir)
        .ok_or_else(|| invariant_violation("empty directory stack"))
}

/// Only preopened directories have a prestat; anything else is `Notdir`.
fn preopen_name(native: &NativeResource) -> Result<&str, Error> {
    native
        .dir_stack()?
        .preopen_name()
        .ok_or_else(|| Error::not_dir().context("not a preopened directory"))
}

/// Guest paths are always relative to the directory descriptor.
fn guest_path(path: &str) -> Result<&str, Error> {
    if path.is_empty() {
        return Err(Error::invalid_argument().context("empty path"));
    }
    if path.starts_with('/') {
        return Err(Error::perm().context("absolute path"));
    }
    Ok(path)
}

fn systimespec(set: bool, ts: Timestamp, now: bool) -> Result<Option<SystemTimeSpec>, Error> {
    if set && now {
        Err(Error::invalid_argument().context("both a time and NOW were given"))
    } else if set {
        Ok(Some(SystemTimeSpec::Absolute(
            SystemTime::UNIX_EPOCH + Duration::from_nanos(ts),
        )))
    } else if now {
        Ok(Some(SystemTimeSpec::SymbolicNow))
    } else {
        Ok(None)
    }
}

/// The raw ABI of the `wasi_snapshot_preview1` descriptor calls.
///
/// Each function takes exactly the wasm-level arguments of the import of the
/// same name and returns the errno the guest sees. Out-pointers are only
/// written when the call succeeds.
pub mod wasi_snapshot_preview1 {
    use super::WasiSnapshotPreview1;
    use crate::ctx::WasiCtx;
    use crate::error::to_errno;
    use crate::memory::{GuestError, GuestMemory};
    use crate::types::{
        Advice, Errno, FdFlags, FstFlags, LookupFlags, OFlags, RiFlags, Rights, SdFlags, SiFlags,
        Size, Whence,
    };
    use crate::Error;
    use std::io::{IoSlice, IoSliceMut};

    fn finish(ctx: &WasiCtx, call: &'static str, result: Result<(), Error>) -> Errno {
        let errno = match result {
            Ok(()) => Errno::Success,
            Err(e) => to_errno(e),
        };
        if ctx.trace_calls {
            tracing::debug!(call, errno = ?errno, "wasi call returned");
        }
        errno
    }

    fn flags<R, T>(raw: i32, name: &'static str) -> Result<T, Error>
    where
        R: TryFrom<i32>,
        T: TryFrom<R, Error = GuestError>,
    {
        let raw = R::try_from(raw).map_err(|_| GuestError::InvalidFlagValue(name))?;
        Ok(T::try_from(raw)?)
    }

    fn enum_arg<T>(raw: i32, name: &'static str) -> Result<T, Error>
    where
        T: TryFrom<u8, Error = GuestError>,
    {
        let raw = u8::try_from(raw).map_err(|_| GuestError::InvalidEnumValue(name))?;
        Ok(T::try_from(raw)?)
    }

    /// Run `f` over the first non-empty buffer of an `iovec` array. Reads
    /// are allowed to be short, so one buffer is enough.
    fn with_iovs<T>(
        mem: &mut dyn GuestMemory,
        iovs: i32,
        iovs_len: i32,
        f: impl FnOnce(&mut [IoSliceMut<'_>]) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let iovs = mem.read_iovecs(iovs as u32, iovs_len as u32)?;
        match iovs.into_iter().find(|iov| iov.buf_len != 0) {
            Some(iov) => {
                let buf = mem.slice_mut(iov.buf, iov.buf_len)?;
                f(&mut [IoSliceMut::new(buf)])
            }
            None => f(&mut []),
        }
    }

    fn ciovs<'m>(
        mem: &'m dyn GuestMemory,
        ciovs: i32,
        ciovs_len: i32,
    ) -> Result<Vec<IoSlice<'m>>, Error> {
        mem.read_iovecs(ciovs as u32, ciovs_len as u32)?
            .into_iter()
            .map(|iov| -> Result<IoSlice<'m>, Error> {
                Ok(IoSlice::new(mem.slice(iov.buf, iov.buf_len)?))
            })
            .collect()
    }

    pub fn fd_advise(ctx: &WasiCtx, fd: i32, offset: i64, len: i64, advice: i32) -> Errno {
        let result = (|| -> Result<(), Error> {
            let advice = enum_arg::<Advice>(advice, "Advice")?;
            ctx.fd_advise(fd, offset as u64, len as u64, advice)
        })();
        finish(ctx, "fd_advise", result)
    }

    pub fn fd_allocate(ctx: &WasiCtx, fd: i32, offset: i64, len: i64) -> Errno {
        let result = ctx.fd_allocate(fd, offset as u64, len as u64);
        finish(ctx, "fd_allocate", result)
    }

    pub fn fd_close(ctx: &WasiCtx, fd: i32) -> Errno {
        let result = ctx.fd_close(fd);
        finish(ctx, "fd_close", result)
    }

    pub fn fd_datasync(ctx: &WasiCtx, fd: i32) -> Errno {
        let result = ctx.fd_datasync(fd);
        finish(ctx, "fd_datasync", result)
    }

    pub fn fd_fdstat_get(ctx: &WasiCtx, mem: &mut dyn GuestMemory, fd: i32, buf: i32) -> Errno {
        let result = (|| -> Result<(), Error> {
            let fdstat = ctx.fd_fdstat_get(fd)?;
            mem.write_bytes(buf as u32, &fdstat.to_bytes())?;
            Ok(())
        })();
        finish(ctx, "fd_fdstat_get", result)
    }

    pub fn fd_fdstat_set_flags(ctx: &WasiCtx, fd: i32, fdflags: i32) -> Errno {
        let result = (|| -> Result<(), Error> {
            let fdflags = flags::<u16, FdFlags>(fdflags, "FdFlags")?;
            ctx.fd_fdstat_set_flags(fd, fdflags)
        })();
        finish(ctx, "fd_fdstat_set_flags", result)
    }

    pub fn fd_fdstat_set_rights(
        ctx: &WasiCtx,
        fd: i32,
        fs_rights_base: i64,
        fs_rights_inheriting: i64,
    ) -> Errno {
        let result = (|| -> Result<(), Error> {
            let base = Rights::try_from(fs_rights_base as u64)?;
            let inheriting = Rights::try_from(fs_rights_inheriting as u64)?;
            ctx.fd_fdstat_set_rights(fd, base, inheriting)
        })();
        finish(ctx, "fd_fdstat_set_rights", result)
    }

    pub fn fd_filestat_get(ctx: &WasiCtx, mem: &mut dyn GuestMemory, fd: i32, buf: i32) -> Errno {
        let result = (|| -> Result<(), Error> {
            let filestat = ctx.fd_filestat_get(fd)?;
            mem.write_bytes(buf as u32, &filestat.to_bytes())?;
            Ok(())
        })();
        finish(ctx, "fd_filestat_get", result)
    }

    pub fn fd_filestat_set_size(ctx: &WasiCtx, fd: i32, size: i64) -> Errno {
        let result = ctx.fd_filestat_set_size(fd, size as u64);
        finish(ctx, "fd_filestat_set_size", result)
    }

    pub fn fd_filestat_set_times(
        ctx: &WasiCtx,
        fd: i32,
        atim: i64,
        mtim: i64,
        fst_flags: i32,
    ) -> Errno {
        let result = (|| -> Result<(), Error> {
            let fst_flags = flags::<u16, FstFlags>(fst_flags, "FstFlags")?;
            ctx.fd_filestat_set_times(fd, atim as u64, mtim as u64, fst_flags)
        })();
        finish(ctx, "fd_filestat_set_times", result)
    }

    pub fn fd_pread(
        ctx: &WasiCtx,
        mem: &mut dyn GuestMemory,
        fd: i32,
        iovs: i32,
        iovs_len: i32,
        offset: i64,
        nread: i32,
    ) -> Errno {
        let result = (|| -> Result<(), Error> {
            let n = with_iovs(mem, iovs, iovs_len, |bufs| {
                ctx.fd_pread(fd, bufs, offset as u64)
            })?;
            mem.write_u32(nread as u32, n)?;
            Ok(())
        })();
        finish(ctx, "fd_pread", result)
    }

    pub fn fd_prestat_get(ctx: &WasiCtx, mem: &mut dyn GuestMemory, fd: i32, buf: i32) -> Errno {
        let result = (|| -> Result<(), Error> {
            let prestat = ctx.fd_prestat_get(fd)?;
            mem.write_bytes(buf as u32, &prestat.to_bytes())?;
            Ok(())
        })();
        finish(ctx, "fd_prestat_get", result)
    }

    pub fn fd_prestat_dir_name(
        ctx: &WasiCtx,
        mem: &mut dyn GuestMemory,
        fd: i32,
        path: i32,
        path_len: i32,
    ) -> Errno {
        let result = (|| -> Result<(), Error> {
            let name = ctx.fd_prestat_dir_name(fd, path_len as u32)?;
            mem.write_bytes(path as u32, name.as_bytes())?;
            Ok(())
        })();
        finish(ctx, "fd_prestat_dir_name", result)
    }

    pub fn fd_pwrite(
        ctx: &WasiCtx,
        mem: &mut dyn GuestMemory,
        fd: i32,
        iovs: i32,
        iovs_len: i32,
        offset: i64,
        nwritten: i32,
    ) -> Errno {
        let result = (|| -> Result<(), Error> {
            let n = {
                let bufs = ciovs(&*mem, iovs, iovs_len)?;
                ctx.fd_pwrite(fd, &bufs, offset as u64)?
            };
            mem.write_u32(nwritten as u32, n)?;
            Ok(())
        })();
        finish(ctx, "fd_pwrite", result)
    }

    pub fn fd_read(
        ctx: &WasiCtx,
        mem: &mut dyn GuestMemory,
        fd: i32,
        iovs: i32,
        iovs_len: i32,
        nread: i32,
    ) -> Errno {
        let result = (|| -> Result<(), Error> {
            let n = with_iovs(mem, iovs, iovs_len, |bufs| ctx.fd_read(fd, bufs))?;
            mem.write_u32(nread as u32, n)?;
            Ok(())
        })();
        finish(ctx, "fd_read", result)
    }

    pub fn fd_readdir(
        ctx: &WasiCtx,
        mem: &mut dyn GuestMemory,
        fd: i32,
        buf: i32,
        buf_len: i32,
        cookie: i64,
        bufused: i32,
    ) -> Errno {
        let result = (|| -> Result<(), Error> {
            let used = {
                let buf = mem.slice_mut(buf as u32, buf_len as u32)?;
                ctx.fd_readdir(fd, buf, cookie as u64)?
            };
            mem.write_u32(bufused as u32, used)?;
            Ok(())
        })();
        finish(ctx, "fd_readdir", result)
    }

    pub fn fd_renumber(ctx: &WasiCtx, from: i32, to: i32) -> Errno {
        let result = ctx.fd_renumber(from, to);
        finish(ctx, "fd_renumber", result)
    }

    pub fn fd_seek(
        ctx: &WasiCtx,
        mem: &mut dyn GuestMemory,
        fd: i32,
        offset: i64,
        whence: i32,
        newoffset: i32,
    ) -> Errno {
        let result = (|| -> Result<(), Error> {
            let whence = enum_arg::<Whence>(whence, "Whence")?;
            let pos = ctx.fd_seek(fd, offset, whence)?;
            mem.write_u64(newoffset as u32, pos)?;
            Ok(())
        })();
        finish(ctx, "fd_seek", result)
    }

    pub fn fd_sync(ctx: &WasiCtx, fd: i32) -> Errno {
        let result = ctx.fd_sync(fd);
        finish(ctx, "fd_sync", result)
    }

    pub fn fd_tell(ctx: &WasiCtx, mem: &mut dyn GuestMemory, fd: i32, offset: i32) -> Errno {
        let result = (|| -> Result<(), Error> {
            let pos = ctx.fd_tell(fd)?;
            mem.write_u64(offset as u32, pos)?;
            Ok(())
        })();
        finish(ctx, "fd_tell", result)
    }

    pub fn fd_write(
        ctx: &WasiCtx,
        mem: &mut dyn GuestMemory,
        fd: i32,
        iovs: i32,
        iovs_len: i32,
        nwritten: i32,
    ) -> Errno {
        let result = (|| -> Result<(), Error> {
            let n = {
                let bufs = ciovs(&*mem, iovs, iovs_len)?;
                ctx.fd_write(fd, &bufs)?
            };
            mem.write_u32(nwritten as u32, n)?;
            Ok(())
        })();
        finish(ctx, "fd_write", result)
    }

    pub fn path_create_directory(
        ctx: &WasiCtx,
        mem: &mut dyn GuestMemory,
        fd: i32,
        path: i32,
        path_len: i32,
    ) -> Errno {
        let result = (|| -> Result<(), Error> {
            let path = mem.read_str(path as u32, path_len as u32)?;
            ctx.path_create_directory(fd, path)
        })();
        finish(ctx, "path_create_directory", result)
    }

    pub fn path_filestat_get(
        ctx: &WasiCtx,
        mem: &mut dyn GuestMemory,
        fd: i32,
        lookup_flags: i32,
        path: i32,
        path_len: i32,
        buf: i32,
    ) -> Errno {
        let result = (|| -> Result<(), Error> {
            let lookup_flags = flags::<u32, LookupFlags>(lookup_flags, "LookupFlags")?;
            let filestat = {
                let path = mem.read_str(path as u32, path_len as u32)?;
                ctx.path_filestat_get(fd, lookup_flags, path)?
            };
            mem.write_bytes(buf as u32, &filestat.to_bytes())?;
            Ok(())
        })();
        finish(ctx, "path_filestat_get", result)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn path_open(
        ctx: &WasiCtx,
        mem: &mut dyn GuestMemory,
        fd: i32,
        dirflags: i32,
        path: i32,
        path_len: i32,
        oflags: i32,
        fs_rights_base: i64,
        fs_rights_inheriting: i64,
        fdflags: i32,
        opened_fd: i32,
    ) -> Errno {
        let result = (|| -> Result<(), Error> {
            let dirflags = flags::<u32, LookupFlags>(dirflags, "LookupFlags")?;
            let oflags = flags::<u16, OFlags>(oflags, "OFlags")?;
            let base = Rights::try_from(fs_rights_base as u64)?;
            let inheriting = Rights::try_from(fs_rights_inheriting as u64)?;
            let fdflags = flags::<u16, FdFlags>(fdflags, "FdFlags")?;
            let new_fd = {
                let path = mem.read_str(path as u32, path_len as u32)?;
                ctx.path_open(fd, dirflags, path, oflags, base, inheriting, fdflags)?
            };
            mem.write_u32(opened_fd as u32, new_fd as u32)?;
            Ok(())
        })();
        finish(ctx, "path_open", result)
    }

    pub fn path_remove_directory(
        ctx: &WasiCtx,
        mem: &mut dyn GuestMemory,
        fd: i32,
        path: i32,
        path_len: i32,
    ) -> Errno {
        let result = (|| -> Result<(), Error> {
            let path = mem.read_str(path as u32, path_len as u32)?;
            ctx.path_remove_directory(fd, path)
        })();
        finish(ctx, "path_remove_directory", result)
    }

    pub fn path_unlink_file(
        ctx: &WasiCtx,
        mem: &mut dyn GuestMemory,
        fd: i32,
        path: i32,
        path_len: i32,
    ) -> Errno {
        let result = (|| -> Result<(), Error> {
            let path = mem.read_str(path as u32, path_len as u32)?;
            ctx.path_unlink_file(fd, path)
        })();
        finish(ctx, "path_unlink_file", result)
    }

    pub fn sock_accept(
        ctx: &WasiCtx,
        mem: &mut dyn GuestMemory,
        fd: i32,
        fdflags: i32,
        ro_fd: i32,
    ) -> Errno {
        let result = (|| -> Result<(), Error> {
            let fdflags = flags::<u16, FdFlags>(fdflags, "FdFlags")?;
            let new_fd = ctx.sock_accept(fd, fdflags)?;
            mem.write_u32(ro_fd as u32, new_fd as u32)?;
            Ok(())
        })();
        finish(ctx, "sock_accept", result)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn sock_recv(
        ctx: &WasiCtx,
        mem: &mut dyn GuestMemory,
        fd: i32,
        ri_data: i32,
        ri_data_len: i32,
        ri_flags: i32,
        ro_datalen: i32,
        ro_flags: i32,
    ) -> Errno {
        let result = (|| -> Result<(), Error> {
            let ri_flags = flags::<u16, RiFlags>(ri_flags, "RiFlags")?;
            let (n, ro): (Size, _) =
                with_iovs(mem, ri_data, ri_data_len, |bufs| ctx.sock_recv(fd, bufs, ri_flags))?;
            mem.write_u32(ro_datalen as u32, n)?;
            mem.write_bytes(ro_flags as u32, &ro.bits().to_le_bytes())?;
            Ok(())
        })();
        finish(ctx, "sock_recv", result)
    }

    pub fn sock_send(
        ctx: &WasiCtx,
        mem: &mut dyn GuestMemory,
        fd: i32,
        si_data: i32,
        si_data_len: i32,
        si_flags: i32,
        so_datalen: i32,
    ) -> Errno {
        let result = (|| -> Result<(), Error> {
            let si_flags = flags::<u16, SiFlags>(si_flags, "SiFlags")?;
            let n = {
                let bufs = ciovs(&*mem, si_data, si_data_len)?;
                ctx.sock_send(fd, &bufs, si_flags)?
            };
            mem.write_u32(so_datalen as u32, n)?;
            Ok(())
        })();
        finish(ctx, "sock_send", result)
    }

    pub fn sock_shutdown(ctx: &WasiCtx, fd: i32, how: i32) -> Errno {
        let result = (|| -> Result<(), Error> {
            let how = flags::<u8, SdFlags>(how, "SdFlags")?;
            ctx.sock_shutdown(fd, how)
        })();
        finish(ctx, "sock_shutdown", result)
    }
}

#[cfg(test)]
mod test {
    use super::wasi_snapshot_preview1 as abi;
    use super::*;
    use crate::pipe::{ReadPipe, WritePipe};
    use crate::types::Errno;

    fn ctx_with_pipes(stdin: &str) -> (WasiCtx, WritePipe<std::io::Cursor<Vec<u8>>>) {
        let stdout = WritePipe::new_in_memory();
        let ctx = WasiCtx::builder()
            .stdin(Box::new(ReadPipe::from(stdin)))
            .stdout(Box::new(stdout.clone()))
            .build()
            .unwrap();
        (ctx, stdout)
    }

    fn errno(err: Error) -> Errno {
        err.downcast().unwrap()
    }

    #[test]
    fn stdio_rights_follow_direction() {
        let (ctx, _) = ctx_with_pipes("");
        let stdin = ctx.fd_fdstat_get(0).unwrap();
        assert!(stdin.fs_rights_base.contains(Rights::FD_READ));
        assert!(!stdin.fs_rights_base.contains(Rights::FD_WRITE));
        let stdout = ctx.fd_fdstat_get(1).unwrap();
        assert!(stdout.fs_rights_base.contains(Rights::FD_WRITE));
        assert!(!stdout.fs_rights_base.contains(Rights::FD_READ));

        let err = ctx.fd_read(1, &mut []).unwrap_err();
        assert_eq!(errno(err), Errno::Notcapable);
    }

    #[test]
    fn write_through_raw_abi() {
        let (ctx, stdout) = ctx_with_pipes("");
        let mut mem = vec![0u8; 64];
        // ciovec { buf: 32, len: 5 } at 0, payload at 32.
        mem[0..4].copy_from_slice(&32u32.to_le_bytes());
        mem[4..8].copy_from_slice(&5u32.to_le_bytes());
        mem[32..37].copy_from_slice(b"hello");

        let errno = abi::fd_write(&ctx, &mut mem, 1, 0, 1, 16);
        assert_eq!(errno, Errno::Success);
        assert_eq!(&mem[16..20], &5u32.to_le_bytes());
        assert_eq!(stdout.contents(), b"hello");
    }

    #[test]
    fn read_fills_first_nonempty_iovec() {
        let (ctx, _) = ctx_with_pipes("abc");
        let mut mem = vec![0u8; 64];
        // An empty iovec, then { buf: 40, len: 8 }.
        mem[8..12].copy_from_slice(&40u32.to_le_bytes());
        mem[12..16].copy_from_slice(&8u32.to_le_bytes());

        let errno = abi::fd_read(&ctx, &mut mem, 0, 0, 2, 20);
        assert_eq!(errno, Errno::Success);
        assert_eq!(&mem[20..24], &3u32.to_le_bytes());
        assert_eq!(&mem[40..43], b"abc");
    }

    #[test]
    fn bad_pointers_and_values_are_reported() {
        let (ctx, _) = ctx_with_pipes("");
        let mut mem = vec![0u8; 16];
        assert_eq!(abi::fd_fdstat_get(&ctx, &mut mem, 1, 8), Errno::Fault);
        assert_eq!(abi::fd_advise(&ctx, 0, 0, 0, 9), Errno::Inval);
        assert_eq!(abi::fd_fdstat_set_flags(&ctx, 1, 0x100), Errno::Inval);
        assert_eq!(abi::fd_close(&ctx, 42), Errno::Badf);
    }

    #[test]
    fn seek_needs_tell_or_seek() {
        let (ctx, _) = ctx_with_pipes("");
        ctx.fd_fdstat_set_rights(0, Rights::FD_READ, Rights::empty())
            .unwrap();
        let err = ctx.fd_seek(0, 0, Whence::Cur).unwrap_err();
        assert_eq!(errno(err), Errno::Notcapable);
        let err = ctx.fd_tell(0).unwrap_err();
        assert_eq!(errno(err), Errno::Notcapable);
    }

    #[test]
    fn rights_cannot_grow() {
        let (ctx, _) = ctx_with_pipes("");
        ctx.fd_fdstat_set_rights(1, Rights::FD_WRITE, Rights::empty())
            .unwrap();
        let err = ctx
            .fd_fdstat_set_rights(1, Rights::FD_WRITE | Rights::FD_SYNC, Rights::empty())
            .unwrap_err();
        assert_eq!(errno(err), Errno::Notcapable);
        assert_eq!(
            ctx.fd_fdstat_get(1).unwrap().fs_rights_base,
            Rights::FD_WRITE
        );
    }

    #[test]
    fn prestat_on_a_pipe_is_notdir() {
        let (ctx, _) = ctx_with_pipes("");
        assert_eq!(errno(ctx.fd_prestat_get(0).unwrap_err()), Errno::Notdir);
    }

    #[test]
    fn set_times_rejects_time_and_now() {
        assert!(systimespec(true, 1, true).is_err());
        assert!(matches!(
            systimespec(false, 0, true),
            Ok(Some(SystemTimeSpec::SymbolicNow))
        ));
        assert!(matches!(systimespec(false, 0, false), Ok(None)));
    }

    #[test]
    fn guest_paths_are_relative() {
        assert_eq!(errno(guest_path("").unwrap_err()), Errno::Inval);
        assert_eq!(errno(guest_path("/etc").unwrap_err()), Errno::Perm);
        assert_eq!(guest_path("a/b").unwrap(), "a/b");
    }
}
