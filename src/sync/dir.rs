use crate::dir::{OpenResult, ReaddirCursor, ReaddirEntity, WasiDir};
use crate::file::Filestat;
use crate::sync::file::{File, filestat_from, filetype_from};
use crate::types::{FdFlags, Filetype, OFlags};
use crate::{Error, ErrorExt};
use cap_fs_ext::{DirEntryExt, DirExt, MetadataExt};
use std::any::Any;
use std::path::Path;
use system_interface::fs::GetSetFdFlags;

/// A host directory capability backed by `cap_std::fs::Dir`.
pub struct Dir(cap_std::fs::Dir);

impl Dir {
    pub fn from_cap_std(dir: cap_std::fs::Dir) -> Self {
        Dir(dir)
    }

    pub fn open_file_(
        &self,
        symlink_follow: bool,
        path: &str,
        oflags: OFlags,
        read: bool,
        write: bool,
        fdflags: FdFlags,
    ) -> Result<OpenResult, Error> {
        use cap_fs_ext::{FollowSymlinks, OpenOptionsFollowExt};

        if oflags.contains(OFlags::DIRECTORY) {
            if oflags.intersects(OFlags::CREAT | OFlags::EXCL | OFlags::TRUNC) {
                return Err(Error::invalid_argument()
                    .context("directory oflags cannot be combined with CREAT, EXCL or TRUNC"));
            }
            return Ok(OpenResult::Dir(Box::new(self.open_dir_(symlink_follow, path)?)));
        }
        // Opening a directory without DIRECTORY still yields a directory.
        if !oflags.contains(OFlags::EXCL) && self.is_dir_at(symlink_follow, path) {
            if oflags.contains(OFlags::TRUNC) {
                return Err(Error::is_dir());
            }
            return Ok(OpenResult::Dir(Box::new(self.open_dir_(symlink_follow, path)?)));
        }

        let mut opts = cap_std::fs::OpenOptions::new();

        if oflags.contains(OFlags::CREAT | OFlags::EXCL) {
            opts.create_new(true);
            opts.write(true);
        } else if oflags.contains(OFlags::CREAT) {
            opts.create(true);
            opts.write(true);
        }
        if oflags.contains(OFlags::TRUNC) {
            opts.truncate(true);
        }
        if read {
            opts.read(true);
        }
        if write {
            opts.write(true);
        } else {
            // Open for reading so the host lets us open the file at all; reads
            // are still refused by the rights check if FD_READ was not granted.
            opts.read(true);
        }
        if fdflags.contains(FdFlags::APPEND) {
            opts.append(true);
        }

        if symlink_follow {
            opts.follow(FollowSymlinks::Yes);
        } else {
            opts.follow(FollowSymlinks::No);
        }
        // cap-std has no OpenOptions for the SYNC family.
        if fdflags.intersects(FdFlags::DSYNC | FdFlags::SYNC | FdFlags::RSYNC) {
            return Err(Error::not_supported().context("SYNC family of FdFlags"));
        }

        let mut f = self.0.open_with(Path::new(path), &opts)?;
        // NONBLOCK has no OpenOption either, patch it on afterwards.
        if fdflags.contains(FdFlags::NONBLOCK) {
            let set_fd_flags = f.new_set_fd_flags(system_interface::fs::FdFlags::NONBLOCK)?;
            f.set_fd_flags(set_fd_flags)?;
        }
        Ok(OpenResult::File(Box::new(File::from_cap_std(f))))
    }

    pub fn open_dir_(&self, symlink_follow: bool, path: &str) -> Result<Self, Error> {
        let d = if symlink_follow {
            self.0.open_dir(Path::new(path))?
        } else {
            self.0.open_dir_nofollow(Path::new(path))?
        };
        Ok(Dir::from_cap_std(d))
    }

    fn is_dir_at(&self, symlink_follow: bool, path: &str) -> bool {
        let meta = if symlink_follow {
            self.0.metadata(Path::new(path))
        } else {
            self.0.symlink_metadata(Path::new(path))
        };
        meta.map(|m| m.is_dir()).unwrap_or(false)
    }
}

impl WasiDir for Dir {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn open_file(
        &self,
        symlink_follow: bool,
        path: &str,
        oflags: OFlags,
        read: bool,
        write: bool,
        fdflags: FdFlags,
    ) -> Result<OpenResult, Error> {
        self.open_file_(symlink_follow, path, oflags, read, write, fdflags)
    }

    fn create_dir(&self, path: &str) -> Result<(), Error> {
        self.0.create_dir(Path::new(path))?;
        Ok(())
    }

    fn readdir(
        &self,
        cursor: ReaddirCursor,
    ) -> Result<Box<dyn Iterator<Item = Result<ReaddirEntity, Error>> + Send>, Error> {
        // cap_std's read_dir does not include . and .., so prepend them.
        let dir_meta = self.0.dir_metadata()?;
        let dots = [".", ".."]
            .into_iter()
            .map(move |name| Ok::<_, Error>((Filetype::Directory, dir_meta.ino(), name.to_owned())));
        let entries = self.0.entries()?.map(|entry| {
            let entry = entry?;
            let meta = entry.full_metadata()?;
            let name = entry
                .file_name()
                .into_string()
                .map_err(|_| Error::illegal_byte_sequence().context("filename"))?;
            Ok::<_, Error>((filetype_from(&meta.file_type()), meta.ino(), name))
        });

        let rd = dots
            .chain(entries)
            // The position in this sequence is the cookie.
            .enumerate()
            .map(|(ix, r)| -> Result<ReaddirEntity, Error> {
                let (filetype, inode, name) = r?;
                Ok(ReaddirEntity {
                    next: ReaddirCursor::from(ix as u64 + 1),
                    filetype,
                    inode,
                    name,
                })
            })
            .skip(usize::try_from(u64::from(cursor)).unwrap_or(usize::MAX));

        Ok(Box::new(rd))
    }

    fn remove_dir(&self, path: &str) -> Result<(), Error> {
        self.0.remove_dir(Path::new(path))?;
        Ok(())
    }

    fn unlink_file(&self, path: &str) -> Result<(), Error> {
        self.0.remove_file_or_symlink(Path::new(path))?;
        Ok(())
    }

    fn get_filestat(&self) -> Result<Filestat, Error> {
        let meta = self.0.dir_metadata()?;
        Ok(filestat_from(&meta))
    }

    fn get_path_filestat(&self, path: &str, follow_symlinks: bool) -> Result<Filestat, Error> {
        let meta = if follow_symlinks {
            self.0.metadata(Path::new(path))?
        } else {
            self.0.symlink_metadata(Path::new(path))?
        };
        Ok(filestat_from(&meta))
    }

    fn set_fdflags(&self, fdflags: FdFlags) -> Result<(), Error> {
        if fdflags.intersects(FdFlags::DSYNC | FdFlags::SYNC | FdFlags::RSYNC) {
            return Err(Error::invalid_argument().context("cannot set DSYNC, SYNC, or RSYNC flag"));
        }
        #[cfg(unix)]
        {
            use rustix::fs::{OFlags as HostFlags, fcntl_getfl, fcntl_setfl};
            // Only the WASI-managed bits change; other status flags are kept.
            let mut flags = fcntl_getfl(&self.0).map_err(std::io::Error::from)?;
            flags.set(HostFlags::APPEND, fdflags.contains(FdFlags::APPEND));
            flags.set(HostFlags::NONBLOCK, fdflags.contains(FdFlags::NONBLOCK));
            fcntl_setfl(&self.0, flags).map_err(std::io::Error::from)?;
            Ok(())
        }
        #[cfg(windows)]
        {
            // Directory handles only take flags at creation.
            if fdflags.is_empty() {
                Ok(())
            } else {
                Err(Error::not_supported())
            }
        }
    }
}
