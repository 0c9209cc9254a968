//! The host process's own stdio, for `WasiCtxBuilder::inherit_stdio`.

use crate::file::{Filestat, SystemTimeSpec, WasiFile};
use crate::sync::file::convert_systimespec;
use crate::types::{Advice, FdFlags, Filetype};
use crate::{Error, ErrorExt};
use fs_set_times::SetTimes;
use io_lifetimes::AsFilelike;
use std::any::Any;
use std::io::{self, IsTerminal, Read, Write};

pub struct Stdin(std::io::Stdin);

pub fn stdin() -> Stdin {
    Stdin(std::io::stdin())
}

impl WasiFile for Stdin {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn get_filetype(&self) -> Result<Filetype, Error> {
        if self.isatty() {
            Ok(Filetype::CharacterDevice)
        } else {
            Ok(Filetype::Unknown)
        }
    }
    fn isatty(&self) -> bool {
        self.0.is_terminal()
    }
    fn get_filestat(&self) -> Result<Filestat, Error> {
        let meta = self.0.as_filelike_view::<std::fs::File>().metadata()?;
        Ok(Filestat {
            device_id: 0,
            inode: 0,
            filetype: self.get_filetype()?,
            nlink: 0,
            size: meta.len(),
            atim: meta.accessed().ok(),
            mtim: meta.modified().ok(),
            ctim: meta.created().ok(),
        })
    }
    fn advise(&self, _offset: u64, _len: u64, _advice: Advice) -> Result<(), Error> {
        Err(Error::seek_pipe())
    }
    fn read_vectored<'a>(&self, bufs: &mut [io::IoSliceMut<'a>]) -> Result<u64, Error> {
        let n = Read::read_vectored(&mut &*self.0.as_filelike_view::<std::fs::File>(), bufs)?;
        Ok(n.try_into().map_err(|_| Error::range())?)
    }
    fn read_vectored_at<'a>(
        &self,
        _bufs: &mut [io::IoSliceMut<'a>],
        _offset: u64,
    ) -> Result<u64, Error> {
        Err(Error::seek_pipe())
    }
    fn seek(&self, _pos: io::SeekFrom) -> Result<u64, Error> {
        Err(Error::seek_pipe())
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
}

macro_rules! wasi_file_write_impl {
    ($ty:ty) => {
        impl WasiFile for $ty {
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn get_filetype(&self) -> Result<Filetype, Error> {
                if self.isatty() {
                    Ok(Filetype::CharacterDevice)
                } else {
                    Ok(Filetype::Unknown)
                }
            }
            fn isatty(&self) -> bool {
                self.0.is_terminal()
            }
            fn get_fdflags(&self) -> Result<FdFlags, Error> {
                Ok(FdFlags::APPEND)
            }
            fn get_filestat(&self) -> Result<Filestat, Error> {
                let meta = self.0.as_filelike_view::<std::fs::File>().metadata()?;
                Ok(Filestat {
                    device_id: 0,
                    inode: 0,
                    filetype: self.get_filetype()?,
                    nlink: 0,
                    size: meta.len(),
                    atim: meta.accessed().ok(),
                    mtim: meta.modified().ok(),
                    ctim: meta.created().ok(),
                })
            }
            fn advise(&self, _offset: u64, _len: u64, _advice: Advice) -> Result<(), Error> {
                Err(Error::seek_pipe())
            }
            fn write_vectored<'a>(&self, bufs: &[io::IoSlice<'a>]) -> Result<u64, Error> {
                let n =
                    Write::write_vectored(&mut &*self.0.as_filelike_view::<std::fs::File>(), bufs)?;
                Ok(n.try_into().map_err(|c| Error::range().context(format!("{c}")))?)
            }
            fn write_vectored_at<'a>(
                &self,
                _bufs: &[io::IoSlice<'a>],
                _offset: u64,
            ) -> Result<u64, Error> {
                Err(Error::seek_pipe())
            }
            fn seek(&self, _pos: io::SeekFrom) -> Result<u64, Error> {
                Err(Error::seek_pipe())
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
        }
    };
}

pub struct Stdout(std::io::Stdout);

pub fn stdout() -> Stdout {
    Stdout(std::io::stdout())
}
wasi_file_write_impl!(Stdout);

pub struct Stderr(std::io::Stderr);

pub fn stderr() -> Stderr {
    Stderr(std::io::stderr())
}
wasi_file_write_impl!(Stderr);
