use crate::file::{Filestat, WasiFile};
use crate::types::{FdFlags, Filetype, OFlags};
use crate::{Error, ErrorExt};
use std::any::Any;
use std::sync::Arc;

pub enum OpenResult {
    File(Box<dyn WasiFile>),
    Dir(Box<dyn WasiDir>),
}

/// A host directory capability. Paths handed to it are always relative to
/// the directory itself.
pub trait WasiDir: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn open_file(
        &self,
        _symlink_follow: bool,
        _path: &str,
        _oflags: OFlags,
        _read: bool,
        _write: bool,
        _fdflags: FdFlags,
    ) -> Result<OpenResult, Error> {
        Err(Error::not_supported())
    }

    fn create_dir(&self, _path: &str) -> Result<(), Error> {
        Err(Error::not_supported())
    }

    fn readdir(
        &self,
        _cursor: ReaddirCursor,
    ) -> Result<Box<dyn Iterator<Item = Result<ReaddirEntity, Error>> + Send>, Error> {
        Err(Error::not_supported())
    }

    fn remove_dir(&self, _path: &str) -> Result<(), Error> {
        Err(Error::not_supported())
    }

    fn unlink_file(&self, _path: &str) -> Result<(), Error> {
        Err(Error::not_supported())
    }

    fn get_filestat(&self) -> Result<Filestat, Error> {
        Err(Error::not_supported())
    }

    fn get_path_filestat(&self, _path: &str, _follow_symlinks: bool) -> Result<Filestat, Error> {
        Err(Error::not_supported())
    }

    fn set_fdflags(&self, flags: FdFlags) -> Result<(), Error> {
        if flags.is_empty() {
            Ok(())
        } else {
            Err(Error::not_supported())
        }
    }
}

/// One level of a directory stack.
pub struct DirFrame {
    pub name: String,
    pub dir: Arc<dyn WasiDir>,
    preopen: bool,
}

/// The directory chain behind a directory descriptor.
///
/// The bottom frame is the preopen the chain was reached from and the top
/// frame is the directory the descriptor actually refers to. Frames are
/// shared, so a directory opened through another one keeps its ancestors
/// alive without duplicating host handles.
#[derive(Clone)]
pub struct DirStack {
    frames: Vec<Arc<DirFrame>>,
}

impl DirStack {
    /// A stack holding a single preopened directory. `name` is the guest
    /// path reported by `fd_prestat_dir_name`.
    pub fn preopen(dir: Box<dyn WasiDir>, name: impl Into<String>) -> Self {
        DirStack {
            frames: vec![Arc::new(DirFrame {
                name: name.into(),
                dir: Arc::from(dir),
                preopen: true,
            })],
        }
    }

    /// The stack for a directory opened at `name` relative to the top of
    /// this one.
    pub fn child(&self, dir: Box<dyn WasiDir>, name: impl Into<String>) -> Self {
        let mut frames = self.frames.clone();
        frames.push(Arc::new(DirFrame {
            name: name.into(),
            dir: Arc::from(dir),
            preopen: false,
        }));
        DirStack { frames }
    }

    pub fn top(&self) -> Option<&DirFrame> {
        self.frames.last().map(|f| &**f)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The guest path of the preopen, if this descriptor is one itself.
    pub fn preopen_name(&self) -> Option<&str> {
        match self.frames.as_slice() {
            [only] if only.preopen => Some(&only.name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReaddirEntity {
    pub next: ReaddirCursor,
    pub inode: u64,
    pub name: String,
    pub filetype: Filetype,
}

#[derive(Debug, Copy, Clone)]
pub struct ReaddirCursor(u64);
impl From<u64> for ReaddirCursor {
    fn from(c: u64) -> ReaddirCursor {
        ReaddirCursor(c)
    }
}
impl From<ReaddirCursor> for u64 {
    fn from(c: ReaddirCursor) -> u64 {
        c.0
    }
}
