use crate::file::{Filestat, SystemTimeSpec, WasiFile};
use crate::types::{Advice, FdFlags, Filetype};
use crate::{Error, ErrorExt};
use cap_fs_ext::MetadataExt;
use fs_set_times::SetTimes;
use io_lifetimes::AsFilelike;
use std::any::Any;
use std::io::{self, IsTerminal};
use system_interface::fs::{FileIoExt, GetSetFdFlags};

/// A regular file (or character device) opened from a [`super::dir::Dir`].
pub struct File(cap_std::fs::File);

impl File {
    pub fn from_cap_std(file: cap_std::fs::File) -> Self {
        File(file)
    }
}

impl WasiFile for File {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn isatty(&self) -> bool {
        self.0.as_filelike_view::<std::fs::File>().is_terminal()
    }
    fn datasync(&self) -> Result<(), Error> {
        self.0.sync_data()?;
        Ok(())
    }
    fn sync(&self) -> Result<(), Error> {
        self.0.sync_all()?;
        Ok(())
    }
    fn get_filetype(&self) -> Result<Filetype, Error> {
        let meta = self.0.metadata()?;
        Ok(filetype_from(&meta.file_type()))
    }
    fn get_fdflags(&self) -> Result<FdFlags, Error> {
        Ok(get_fd_flags(&self.0)?)
    }
    fn set_fdflags(&mut self, fdflags: FdFlags) -> Result<(), Error> {
        if fdflags.intersects(FdFlags::DSYNC | FdFlags::SYNC | FdFlags::RSYNC) {
            return Err(Error::invalid_argument().context("cannot set DSYNC, SYNC, or RSYNC flag"));
        }
        let set_fd_flags = self.0.new_set_fd_flags(to_sysif_fdflags(fdflags))?;
        self.0.set_fd_flags(set_fd_flags)?;
        Ok(())
    }
    fn get_filestat(&self) -> Result<Filestat, Error> {
        let meta = self.0.metadata()?;
        Ok(filestat_from(&meta))
    }
    fn set_filestat_size(&self, size: u64) -> Result<(), Error> {
        self.0.set_len(size)?;
        Ok(())
    }
    fn advise(&self, offset: u64, len: u64, advice: Advice) -> Result<(), Error> {
        FileIoExt::advise(&self.0, offset, len, convert_advice(advice))?;
        Ok(())
    }
    fn allocate(&self, offset: u64, len: u64) -> Result<(), Error> {
        FileIoExt::allocate(&self.0, offset, len)?;
        Ok(())
    }
    fn set_times(
        &self,
        atime: Option<SystemTimeSpec>,
        mtime: Option<SystemTimeSpec>,
    ) -> Result<(), Error> {
        SetTimes::set_times(
            &self.0,
            convert_systimespec(atime),
            convert_systimespec(mtime),
        )?;
        Ok(())
    }
    fn read_vectored<'a>(&self, bufs: &mut [io::IoSliceMut<'a>]) -> Result<u64, Error> {
        let n = io::Read::read_vectored(&mut &self.0, bufs)?;
        Ok(n.try_into()?)
    }
    fn read_vectored_at<'a>(
        &self,
        bufs: &mut [io::IoSliceMut<'a>],
        offset: u64,
    ) -> Result<u64, Error> {
        let n = FileIoExt::read_vectored_at(&self.0, bufs, offset)?;
        Ok(n.try_into()?)
    }
    fn write_vectored<'a>(&self, bufs: &[io::IoSlice<'a>]) -> Result<u64, Error> {
        let n = io::Write::write_vectored(&mut &self.0, bufs)?;
        Ok(n.try_into()?)
    }
    fn write_vectored_at<'a>(&self, bufs: &[io::IoSlice<'a>], offset: u64) -> Result<u64, Error> {
        let n = FileIoExt::write_vectored_at(&self.0, bufs, offset)?;
        Ok(n.try_into()?)
    }
    fn seek(&self, pos: io::SeekFrom) -> Result<u64, Error> {
        Ok(FileIoExt::seek(&self.0, pos)?)
    }
}

pub fn filetype_from(ft: &cap_std::fs::FileType) -> Filetype {
    use cap_fs_ext::FileTypeExt;
    if ft.is_dir() {
        Filetype::Directory
    } else if ft.is_symlink() {
        Filetype::SymbolicLink
    } else if ft.is_socket() {
        if ft.is_block_device() {
            Filetype::SocketDgram
        } else {
            Filetype::SocketStream
        }
    } else if ft.is_block_device() {
        Filetype::BlockDevice
    } else if ft.is_char_device() {
        Filetype::CharacterDevice
    } else if ft.is_file() {
        Filetype::RegularFile
    } else {
        Filetype::Unknown
    }
}

pub(crate) fn filestat_from(meta: &cap_std::fs::Metadata) -> Filestat {
    Filestat {
        device_id: meta.dev(),
        inode: meta.ino(),
        filetype: filetype_from(&meta.file_type()),
        nlink: meta.nlink(),
        size: meta.len(),
        atim: meta.accessed().map(|t| t.into_std()).ok(),
        mtim: meta.modified().map(|t| t.into_std()).ok(),
        ctim: meta.created().map(|t| t.into_std()).ok(),
    }
}

pub(crate) fn convert_systimespec(t: Option<SystemTimeSpec>) -> Option<fs_set_times::SystemTimeSpec> {
    match t {
        Some(SystemTimeSpec::Absolute(t)) => Some(fs_set_times::SystemTimeSpec::Absolute(t)),
        Some(SystemTimeSpec::SymbolicNow) => Some(fs_set_times::SystemTimeSpec::SymbolicNow),
        None => None,
    }
}

pub(crate) fn to_sysif_fdflags(f: FdFlags) -> system_interface::fs::FdFlags {
    let mut out = system_interface::fs::FdFlags::empty();
    if f.contains(FdFlags::APPEND) {
        out |= system_interface::fs::FdFlags::APPEND;
    }
    if f.contains(FdFlags::DSYNC) {
        out |= system_interface::fs::FdFlags::DSYNC;
    }
    if f.contains(FdFlags::NONBLOCK) {
        out |= system_interface::fs::FdFlags::NONBLOCK;
    }
    if f.contains(FdFlags::RSYNC) {
        out |= system_interface::fs::FdFlags::RSYNC;
    }
    if f.contains(FdFlags::SYNC) {
        out |= system_interface::fs::FdFlags::SYNC;
    }
    out
}

/// Return the file-descriptor flags for a given file-like object.
///
/// This returns the flags needed to implement [`WasiFile::get_fdflags`].
pub fn get_fd_flags<Filelike: AsFilelike>(f: Filelike) -> io::Result<FdFlags> {
    let f = f.as_filelike().get_fd_flags()?;
    let mut out = FdFlags::empty();
    if f.contains(system_interface::fs::FdFlags::APPEND) {
        out |= FdFlags::APPEND;
    }
    if f.contains(system_interface::fs::FdFlags::DSYNC) {
        out |= FdFlags::DSYNC;
    }
    if f.contains(system_interface::fs::FdFlags::NONBLOCK) {
        out |= FdFlags::NONBLOCK;
    }
    if f.contains(system_interface::fs::FdFlags::RSYNC) {
        out |= FdFlags::RSYNC;
    }
    if f.contains(system_interface::fs::FdFlags::SYNC) {
        out |= FdFlags::SYNC;
    }
    Ok(out)
}

fn convert_advice(advice: Advice) -> system_interface::fs::Advice {
    match advice {
        Advice::Normal => system_interface::fs::Advice::Normal,
        Advice::Sequential => system_interface::fs::Advice::Sequential,
        Advice::Random => system_interface::fs::Advice::Random,
        Advice::WillNeed => system_interface::fs::Advice::WillNeed,
        Advice::DontNeed => system_interface::fs::Advice::DontNeed,
        Advice::NoReuse => system_interface::fs::Advice::NoReuse,
    }
}
