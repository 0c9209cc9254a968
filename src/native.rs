//! The host resource behind a guest descriptor.

use crate::dir::DirStack;
use crate::file::WasiFile;
use crate::types::Filetype;
use crate::{Error, ErrorExt};
use std::fmt;
use std::sync::Arc;

/// A host handle plus the tag saying what it is.
///
/// Owning variants close their host handle when dropped. Observer variants
/// share a handle owned elsewhere (stdio, embedder sockets) and dropping
/// them never closes it.
pub enum NativeResource {
    File(Box<dyn WasiFile>),
    FileObserver(Arc<dyn WasiFile>),
    DirStack(DirStack),
    Socket(Box<dyn WasiFile>),
    SocketObserver(Arc<dyn WasiFile>),
    /// Stand-in for unit tests that need a record but no host handle. Every
    /// accessor treats it as a broken invariant.
    #[cfg(test)]
    Null,
}

impl NativeResource {
    pub fn is_observer(&self) -> bool {
        matches!(
            self,
            NativeResource::FileObserver(_) | NativeResource::SocketObserver(_)
        )
    }

    /// Any file-like resource: regular files, character devices, pipes and
    /// sockets all support the plain read/write family.
    pub fn file(&self) -> Result<&dyn WasiFile, Error> {
        match self {
            NativeResource::File(f) | NativeResource::Socket(f) => Ok(&**f),
            NativeResource::FileObserver(f) | NativeResource::SocketObserver(f) => Ok(&**f),
            NativeResource::DirStack(_) => Err(Error::badf().context("not a file")),
            #[cfg(test)]
            NativeResource::Null => {
                Err(crate::error::invariant_violation("null resource on an open fd"))
            }
        }
    }

    /// Like [`NativeResource::file`], but a directory is reported as `Isdir`
    /// the way POSIX `read`/`write` do.
    pub fn file_for_io(&self) -> Result<&dyn WasiFile, Error> {
        match self {
            NativeResource::DirStack(_) => Err(Error::is_dir()),
            _ => self.file(),
        }
    }

    /// Mutable access for calls that change handle state. Observers only
    /// give shared access to the handle they watch.
    pub fn file_mut(&mut self) -> Result<&mut dyn WasiFile, Error> {
        match self {
            NativeResource::File(f) | NativeResource::Socket(f) => Ok(&mut **f),
            NativeResource::FileObserver(_) | NativeResource::SocketObserver(_) => {
                Err(Error::not_supported().context("observed handle is shared"))
            }
            NativeResource::DirStack(_) => Err(Error::badf().context("not a file")),
            #[cfg(test)]
            NativeResource::Null => {
                Err(crate::error::invariant_violation("null resource on an open fd"))
            }
        }
    }

    pub fn socket(&self) -> Result<&dyn WasiFile, Error> {
        match self {
            NativeResource::Socket(f) => Ok(&**f),
            NativeResource::SocketObserver(f) => Ok(&**f),
            NativeResource::File(_) | NativeResource::FileObserver(_) | NativeResource::DirStack(_) => {
                Err(Error::not_sock())
            }
            #[cfg(test)]
            NativeResource::Null => {
                Err(crate::error::invariant_violation("null resource on an open fd"))
            }
        }
    }

    pub fn dir_stack(&self) -> Result<&DirStack, Error> {
        match self {
            NativeResource::DirStack(stack) => Ok(stack),
            #[cfg(test)]
            NativeResource::Null => {
                Err(crate::error::invariant_violation("null resource on an open fd"))
            }
            _ => Err(Error::not_dir()),
        }
    }

    pub fn filetype(&self) -> Result<Filetype, Error> {
        match self {
            NativeResource::DirStack(_) => Ok(Filetype::Directory),
            _ => self.file()?.get_filetype(),
        }
    }
}

impl fmt::Debug for NativeResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            NativeResource::File(_) => "File",
            NativeResource::FileObserver(_) => "FileObserver",
            NativeResource::DirStack(_) => "DirStack",
            NativeResource::Socket(_) => "Socket",
            NativeResource::SocketObserver(_) => "SocketObserver",
            #[cfg(test)]
            NativeResource::Null => "Null",
        };
        f.write_str(tag)
    }
}
