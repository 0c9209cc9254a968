//! The per-descriptor capability model.
//!
//! Every descriptor carries a pair of rights. `base` gates the calls that may
//! be made on the descriptor itself; `inheriting` bounds the rights of any
//! descriptor opened through it.

use crate::types::{Filetype, OFlags, Rights};
use crate::{Error, ErrorExt};
use std::fmt;

pub const ALL: Rights = Rights::all();

// Block and character device interaction is outside the scope of
// WASI. Simply allow everything.
pub const BLOCK_DEVICE_BASE: Rights = ALL;
pub const CHARACTER_DEVICE_BASE: Rights = ALL;

// Only allow directory operations on directories. Directories can only
// yield file descriptors to other directories and files.
pub const DIRECTORY_BASE: Rights = Rights::FD_FDSTAT_SET_FLAGS
    .union(Rights::FD_SYNC)
    .union(Rights::FD_ADVISE)
    .union(Rights::PATH_CREATE_DIRECTORY)
    .union(Rights::PATH_CREATE_FILE)
    .union(Rights::PATH_LINK_SOURCE)
    .union(Rights::PATH_LINK_TARGET)
    .union(Rights::PATH_OPEN)
    .union(Rights::FD_READDIR)
    .union(Rights::PATH_READLINK)
    .union(Rights::PATH_RENAME_SOURCE)
    .union(Rights::PATH_RENAME_TARGET)
    .union(Rights::PATH_FILESTAT_GET)
    .union(Rights::PATH_FILESTAT_SET_SIZE)
    .union(Rights::PATH_FILESTAT_SET_TIMES)
    .union(Rights::FD_FILESTAT_GET)
    .union(Rights::FD_FILESTAT_SET_TIMES)
    .union(Rights::PATH_SYMLINK)
    .union(Rights::PATH_UNLINK_FILE)
    .union(Rights::PATH_REMOVE_DIRECTORY)
    .union(Rights::POLL_FD_READWRITE);
pub const DIRECTORY_INHERITING: Rights = DIRECTORY_BASE.union(REGULAR_FILE_BASE);

// Operations that apply to regular files.
pub const REGULAR_FILE_BASE: Rights = Rights::FD_DATASYNC
    .union(Rights::FD_READ)
    .union(Rights::FD_SEEK)
    .union(Rights::FD_FDSTAT_SET_FLAGS)
    .union(Rights::FD_SYNC)
    .union(Rights::FD_TELL)
    .union(Rights::FD_WRITE)
    .union(Rights::FD_ADVISE)
    .union(Rights::FD_ALLOCATE)
    .union(Rights::FD_FILESTAT_GET)
    .union(Rights::FD_FILESTAT_SET_SIZE)
    .union(Rights::FD_FILESTAT_SET_TIMES)
    .union(Rights::POLL_FD_READWRITE);
pub const REGULAR_FILE_INHERITING: Rights = Rights::empty();

// Operations that apply to sockets and socket pairs.
pub const SOCKET_BASE: Rights = Rights::FD_READ
    .union(Rights::FD_FDSTAT_SET_FLAGS)
    .union(Rights::FD_WRITE)
    .union(Rights::FD_FILESTAT_GET)
    .union(Rights::POLL_FD_READWRITE)
    .union(Rights::SOCK_SHUTDOWN)
    .union(Rights::SOCK_ACCEPT);
pub const SOCKET_INHERITING: Rights = ALL;

// Operations that apply to TTYs.
pub const TTY_BASE: Rights = Rights::FD_READ
    .union(Rights::FD_FDSTAT_SET_FLAGS)
    .union(Rights::FD_WRITE)
    .union(Rights::FD_FILESTAT_GET)
    .union(Rights::POLL_FD_READWRITE);
pub const TTY_INHERITING: Rights = Rights::empty();

/// Rights given to the stdio observers seated at 0, 1 and 2.
pub const STDIO_BASE: Rights = TTY_BASE
    .union(Rights::FD_DATASYNC)
    .union(Rights::FD_SYNC)
    .union(Rights::FD_ADVISE)
    .union(Rights::FD_SEEK)
    .union(Rights::FD_TELL);

/// Rights that let a descriptor modify what it refers to.
const WRITE_RIGHTS: Rights = Rights::FD_DATASYNC
    .union(Rights::FD_WRITE)
    .union(Rights::FD_ALLOCATE)
    .union(Rights::FD_FILESTAT_SET_SIZE);

/// The rights pair held by a descriptor, or required by a call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FdRights {
    pub base: Rights,
    pub inheriting: Rights,
}

impl FdRights {
    pub const fn new(base: Rights, inheriting: Rights) -> Self {
        Self { base, inheriting }
    }

    /// Create new `FdRights` from `base` rights only, keeping `inheriting`
    /// set to none.
    pub const fn from_base(base: Rights) -> Self {
        Self {
            base,
            inheriting: Rights::empty(),
        }
    }

    pub const fn empty() -> Self {
        Self {
            base: Rights::empty(),
            inheriting: Rights::empty(),
        }
    }

    /// The default rights for a resource of the given type.
    pub fn for_filetype(filetype: Filetype, isatty: bool) -> Self {
        match filetype {
            Filetype::Directory => Self::new(DIRECTORY_BASE, DIRECTORY_INHERITING),
            Filetype::RegularFile => Self::new(REGULAR_FILE_BASE, REGULAR_FILE_INHERITING),
            Filetype::SocketDgram | Filetype::SocketStream => {
                Self::new(SOCKET_BASE, SOCKET_INHERITING)
            }
            Filetype::CharacterDevice if isatty => Self::new(TTY_BASE, TTY_INHERITING),
            Filetype::CharacterDevice => Self::new(CHARACTER_DEVICE_BASE, ALL),
            Filetype::BlockDevice => Self::new(BLOCK_DEVICE_BASE, ALL),
            Filetype::Unknown | Filetype::SymbolicLink => Self::new(REGULAR_FILE_BASE, Rights::empty()),
        }
    }

    /// Check if `other` is a subset of those rights.
    pub fn contains(&self, other: &Self) -> bool {
        self.base.contains(other.base) && self.inheriting.contains(other.inheriting)
    }

    /// Fail with `Notcapable` unless every right in `required` is held in
    /// `base`.
    pub fn check(&self, required: Rights) -> Result<(), Error> {
        if self.base.contains(required) {
            Ok(())
        } else {
            tracing::trace!(
                required = %required,
                held = %self.base,
                missing = %(required - self.base),
                "insufficient rights"
            );
            Err(Error::not_capable())
        }
    }

    /// Fail with `Notcapable` unless everything in `requested` may be passed
    /// on by a descriptor holding `self`. Runs before the open is attempted.
    pub fn check_inheritable(&self, requested: &FdRights) -> Result<(), Error> {
        let excess = (requested.base | requested.inheriting) - self.inheriting;
        if excess.is_empty() {
            Ok(())
        } else {
            tracing::trace!(
                requested = %requested,
                inheriting = %self.inheriting,
                excess = %excess,
                "requested rights exceed inheriting rights"
            );
            Err(Error::not_capable())
        }
    }

    /// Drop base rights that make no sense for the resource actually opened.
    pub fn clamp_to(self, opened: Filetype) -> FdRights {
        let ceiling = FdRights::for_filetype(opened, false);
        FdRights {
            base: self.base & ceiling.base,
            inheriting: self.inheriting,
        }
    }
}

impl fmt::Display for FdRights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FdRights {{ base: {}, inheriting: {} }}",
            self.base, self.inheriting
        )
    }
}

/// The rights a directory must hold in `base` to open `oflags` through it.
pub fn required_for_open(oflags: OFlags) -> Rights {
    let mut required = Rights::PATH_OPEN;
    if oflags.contains(OFlags::CREAT) {
        required |= Rights::PATH_CREATE_FILE;
    }
    if oflags.contains(OFlags::TRUNC) {
        required |= Rights::PATH_FILESTAT_SET_SIZE;
    }
    required
}

/// Whether `base` allows reading and writing, used to pick the host open
/// mode for `path_open`.
pub fn access_mode(base: Rights) -> (bool, bool) {
    (base.contains(Rights::FD_READ), base.intersects(WRITE_RIGHTS))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn check_reports_notcapable() {
        let rights = FdRights::new(Rights::FD_READ, Rights::empty());
        assert!(rights.check(Rights::FD_READ).is_ok());
        let err = rights.check(Rights::FD_READ | Rights::FD_WRITE).unwrap_err();
        assert_eq!(err.downcast().unwrap(), crate::types::Errno::Notcapable);
        assert!(rights.check(Rights::empty()).is_ok());
    }

    #[test]
    fn inheritable_is_bounded_by_inheriting() {
        let dir = FdRights::new(DIRECTORY_BASE, Rights::FD_READ | Rights::FD_SEEK);
        assert!(dir.check_inheritable(&FdRights::from_base(Rights::FD_READ)).is_ok());
        let err = dir
            .check_inheritable(&FdRights::new(Rights::FD_READ, Rights::FD_WRITE))
            .unwrap_err();
        assert_eq!(err.downcast().unwrap(), crate::types::Errno::Notcapable);
    }

    #[test]
    fn clamp_drops_directory_rights_on_files() {
        let opened = FdRights::new(DIRECTORY_BASE | REGULAR_FILE_BASE, Rights::empty())
            .clamp_to(Filetype::RegularFile);
        assert!(!opened.base.contains(Rights::PATH_OPEN));
        assert!(opened.base.contains(Rights::FD_WRITE));
    }

    #[test]
    fn open_requirements() {
        assert_eq!(required_for_open(OFlags::empty()), Rights::PATH_OPEN);
        assert_eq!(
            required_for_open(OFlags::CREAT | OFlags::TRUNC),
            Rights::PATH_OPEN | Rights::PATH_CREATE_FILE | Rights::PATH_FILESTAT_SET_SIZE
        );
    }
}
