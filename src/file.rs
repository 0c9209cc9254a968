use crate::types::{Advice, FdFlags, Filetype, RiFlags, RoFlags, SdFlags, SiFlags};
use crate::{Error, ErrorExt};
use std::any::Any;
use std::io::{IoSlice, IoSliceMut, SeekFrom};
use std::time::SystemTime;

/// A host file-like resource: regular file, character device, pipe or socket.
///
/// Every method is invoked while the owning descriptor's record lock is held,
/// so implementations never observe two calls for the same descriptor at
/// once. Default implementations describe a resource that supports nothing.
pub trait WasiFile: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn get_filetype(&self) -> Result<Filetype, Error>;

    fn isatty(&self) -> bool {
        false
    }

    fn sock_accept(&self, _fdflags: FdFlags) -> Result<Box<dyn WasiFile>, Error> {
        Err(Error::not_sock())
    }

    fn sock_recv<'a>(
        &self,
        _ri_data: &mut [IoSliceMut<'a>],
        _ri_flags: RiFlags,
    ) -> Result<(u64, RoFlags), Error> {
        Err(Error::not_sock())
    }

    fn sock_send<'a>(&self, _si_data: &[IoSlice<'a>], _si_flags: SiFlags) -> Result<u64, Error> {
        Err(Error::not_sock())
    }

    fn sock_shutdown(&self, _how: SdFlags) -> Result<(), Error> {
        Err(Error::not_sock())
    }

    fn datasync(&self) -> Result<(), Error> {
        Ok(())
    }

    fn sync(&self) -> Result<(), Error> {
        Ok(())
    }

    fn get_fdflags(&self) -> Result<FdFlags, Error> {
        Ok(FdFlags::empty())
    }

    fn set_fdflags(&mut self, _flags: FdFlags) -> Result<(), Error> {
        Err(Error::badf())
    }

    fn get_filestat(&self) -> Result<Filestat, Error> {
        Ok(Filestat {
            device_id: 0,
            inode: 0,
            filetype: self.get_filetype()?,
            nlink: 0,
            size: 0,
            atim: None,
            mtim: None,
            ctim: None,
        })
    }

    fn set_filestat_size(&self, _size: u64) -> Result<(), Error> {
        Err(Error::badf())
    }

    fn advise(&self, _offset: u64, _len: u64, _advice: Advice) -> Result<(), Error> {
        Err(Error::badf())
    }

    fn allocate(&self, _offset: u64, _len: u64) -> Result<(), Error> {
        Err(Error::not_supported())
    }

    fn set_times(
        &self,
        _atime: Option<SystemTimeSpec>,
        _mtime: Option<SystemTimeSpec>,
    ) -> Result<(), Error> {
        Err(Error::badf())
    }

    fn read_vectored<'a>(&self, _bufs: &mut [IoSliceMut<'a>]) -> Result<u64, Error> {
        Err(Error::badf())
    }

    fn read_vectored_at<'a>(
        &self,
        _bufs: &mut [IoSliceMut<'a>],
        _offset: u64,
    ) -> Result<u64, Error> {
        Err(Error::badf())
    }

    fn write_vectored<'a>(&self, _bufs: &[IoSlice<'a>]) -> Result<u64, Error> {
        Err(Error::badf())
    }

    fn write_vectored_at<'a>(&self, _bufs: &[IoSlice<'a>], _offset: u64) -> Result<u64, Error> {
        Err(Error::badf())
    }

    fn seek(&self, _pos: SeekFrom) -> Result<u64, Error> {
        Err(Error::badf())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filestat {
    pub device_id: u64,
    pub inode: u64,
    pub filetype: Filetype,
    pub nlink: u64,
    pub size: u64,
    pub atim: Option<SystemTime>,
    pub mtim: Option<SystemTime>,
    pub ctim: Option<SystemTime>,
}

impl From<Filestat> for crate::types::Filestat {
    fn from(stat: Filestat) -> crate::types::Filestat {
        crate::types::Filestat {
            dev: stat.device_id,
            ino: stat.inode,
            filetype: stat.filetype,
            nlink: stat.nlink,
            size: stat.size,
            atim: stat.atim.map(nanos_since_epoch).unwrap_or(0),
            mtim: stat.mtim.map(nanos_since_epoch).unwrap_or(0),
            ctim: stat.ctim.map(nanos_since_epoch).unwrap_or(0),
        }
    }
}

fn nanos_since_epoch(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// A timestamp to apply with `set_times`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemTimeSpec {
    SymbolicNow,
    Absolute(SystemTime),
}
