//! The guest descriptor table.
//!
//! Descriptors below `opens.len()` live in a dense array whose closed slots
//! are kept on a LIFO free-list; larger numbers, which can only be produced
//! by `fd_renumber` or `insert_at`, live in a sparse map. A number resolves
//! through exactly one of the two.
//!
//! Locking is split in two domains. The table lock guards the layout and is
//! only held long enough to find a record and lock it; the record lock
//! guards everything about one descriptor, including the native call made
//! on it. The table lock is always taken before a record lock, never while
//! holding one.

mod record;

pub use self::record::{ClosePos, FdRecord, LockedFd, RecordRef};

use crate::error::{bookkeeping_overflow, invariant_violation};
use crate::native::NativeResource;
use crate::rights::FdRights;
use crate::types::Fd;
use crate::{Error, ErrorExt};
use parking_lot::RwLock;
use std::collections::HashMap;

pub struct FdTable(RwLock<Inner>);

struct Inner {
    opens: Vec<RecordRef>,
    /// Indices into `opens` of closed slots, most recently closed last.
    closes: Vec<usize>,
    /// Records numbered `opens.len()` and above.
    renumber_map: HashMap<Fd, RecordRef>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Slot {
    Dense(usize),
    Sparse(Fd),
}

impl Inner {
    fn slot(&self, fd: Fd) -> Result<Slot, Error> {
        let idx = usize::try_from(fd).map_err(|_| Error::badf().context("negative fd"))?;
        if idx < self.opens.len() {
            Ok(Slot::Dense(idx))
        } else {
            Ok(Slot::Sparse(fd))
        }
    }

    fn get(&self, fd: Fd) -> Result<&RecordRef, Error> {
        match self.slot(fd)? {
            Slot::Dense(idx) => Ok(&self.opens[idx]),
            Slot::Sparse(fd) => self
                .renumber_map
                .get(&fd)
                .ok_or_else(|| Error::badf().context("fd not in table")),
        }
    }

    /// Drop slot `idx`'s entry from the free-list, shifting every later
    /// entry down one place and updating the records that track them.
    fn unfree(&mut self, idx: usize, pos: usize) -> Result<(), Error> {
        if self.closes.get(pos) != Some(&idx) {
            return Err(invariant_violation("close position does not match free-list"));
        }
        self.closes.remove(pos);
        for (later, &slot) in self.closes.iter().enumerate().skip(pos) {
            self.opens[slot].lock().set_close_pos(ClosePos::Free(later));
        }
        Ok(())
    }

    /// Put `record` at `slot`, closing whatever open record was there. The
    /// displaced resource is returned so it can be dropped after unlocking.
    fn seat(&mut self, slot: Slot, record: RecordRef) -> Result<Option<NativeResource>, Error> {
        match slot {
            Slot::Dense(idx) => {
                let occupant = self.opens[idx].clone();
                let mut occupant = occupant.lock();
                let displaced = match occupant.close_pos() {
                    None => Some(occupant.close(ClosePos::Detached)?),
                    Some(ClosePos::Free(pos)) => {
                        drop(occupant);
                        self.unfree(idx, pos)?;
                        None
                    }
                    Some(ClosePos::Detached) => {
                        return Err(invariant_violation("detached record in dense array"));
                    }
                };
                self.opens[idx] = record;
                Ok(displaced)
            }
            Slot::Sparse(fd) => {
                let displaced = match self.renumber_map.insert(fd, record) {
                    Some(old) => {
                        let mut old = old.lock();
                        let native = old.close(ClosePos::Detached)?;
                        Some(native)
                    }
                    None => {
                        self.migrate_sparse();
                        None
                    }
                };
                Ok(displaced)
            }
        }
    }

    /// Move sparse entries that have become contiguous with the dense array
    /// into it.
    fn migrate_sparse(&mut self) {
        while let Ok(next) = Fd::try_from(self.opens.len()) {
            match self.renumber_map.remove(&next) {
                Some(record) => self.opens.push(record),
                None => break,
            }
        }
    }

    fn push_free(&mut self, idx: usize) -> ClosePos {
        let pos = self.closes.len();
        if pos == usize::MAX {
            bookkeeping_overflow("free-list length");
        }
        self.closes.push(idx);
        ClosePos::Free(pos)
    }
}

impl FdTable {
    /// Create an empty table. Stdio is seated separately with `insert_at`.
    pub fn new() -> Self {
        FdTable(RwLock::new(Inner {
            opens: Vec::new(),
            closes: Vec::new(),
            renumber_map: HashMap::new(),
        }))
    }

    /// Find the record currently numbered `fd`.
    ///
    /// The returned handle is not locked; by the time it is, the record may
    /// have been closed or renumbered away.
    pub fn resolve(&self, fd: Fd) -> Result<RecordRef, Error> {
        Ok(self.0.read().get(fd)?.clone())
    }

    /// Find the record numbered `fd` and lock it.
    ///
    /// The record lock is taken while the table is still read-locked, so a
    /// concurrent close or renumber is either fully before or fully after
    /// this call. Closed descriptors are reported as `Badf`.
    pub fn resolve_and_lock(&self, fd: Fd) -> Result<LockedFd, Error> {
        let inner = self.0.read();
        let locked = inner.get(fd)?.lock_arc();
        drop(inner);
        if locked.is_closed() {
            return Err(Error::badf().context("fd is closed"));
        }
        Ok(locked)
    }

    /// Allocate the lowest-cost descriptor for `native`: the most recently
    /// closed slot if there is one, else a new slot at the end.
    pub fn open(&self, native: NativeResource, rights: FdRights) -> Result<Fd, Error> {
        let mut inner = self.0.write();
        if let Some(idx) = inner.closes.pop() {
            let pos = inner.closes.len();
            let fd = Fd::try_from(idx)
                .map_err(|_| invariant_violation("dense slot beyond fd range"))?;
            let mut record = inner.opens[idx].lock();
            if record.close_pos() != Some(ClosePos::Free(pos)) {
                drop(record);
                inner.closes.push(idx);
                return Err(invariant_violation("free-list entry does not match its record"));
            }
            record.reopen(native, rights);
            tracing::trace!(fd, "recycled descriptor");
            return Ok(fd);
        }

        let idx = inner.opens.len();
        let fd = Fd::try_from(idx).map_err(|_| Error::from(crate::types::Errno::Mfile))?;
        if inner.renumber_map.contains_key(&fd) {
            return Err(invariant_violation("sparse entry at the end of the dense array"));
        }
        inner
            .opens
            .push(FdRecord::new_open(native, rights).into_ref());
        inner.migrate_sparse();
        tracing::trace!(fd, "allocated descriptor");
        Ok(fd)
    }

    /// Seat `native` at exactly `fd`, closing anything already there.
    pub fn insert_at(&self, fd: Fd, native: NativeResource, rights: FdRights) -> Result<(), Error> {
        let displaced = {
            let mut inner = self.0.write();
            let slot = inner.slot(fd)?;
            inner.seat(slot, FdRecord::new_open(native, rights).into_ref())?
        };
        drop(displaced);
        Ok(())
    }

    /// Close `fd`. The host handle is released after every lock is dropped.
    pub fn close(&self, fd: Fd) -> Result<(), Error> {
        let detached = {
            let mut inner = self.0.write();
            match inner.slot(fd)? {
                Slot::Dense(idx) => {
                    let record = inner.opens[idx].clone();
                    let mut record = record.lock();
                    if record.is_closed() {
                        return Err(Error::badf().context("fd already closed"));
                    }
                    let pos = inner.push_free(idx);
                    record.close(pos)?
                }
                Slot::Sparse(fd) => {
                    let record = inner
                        .renumber_map
                        .remove(&fd)
                        .ok_or_else(|| Error::badf().context("fd not in table"))?;
                    let mut record = record.lock();
                    record.close(ClosePos::Detached)?
                }
            }
        };
        tracing::trace!(fd, resource = ?detached, "closed descriptor");
        drop(detached);
        Ok(())
    }

    /// Move the descriptor at `from` to `to`, closing anything at `to`.
    ///
    /// The record itself moves, so calls already running against it finish
    /// normally while new lookups of `from` fail with `Badf`.
    pub fn renumber(&self, from: Fd, to: Fd) -> Result<(), Error> {
        if from < 0 || to < 0 {
            return Err(Error::badf().context("negative fd"));
        }
        if from == to {
            drop(self.resolve_and_lock(from)?);
            return Ok(());
        }

        let displaced = {
            let mut inner = self.0.write();
            let from_slot = inner.slot(from)?;
            let to_slot = inner.slot(to)?;

            let moving = match from_slot {
                Slot::Dense(idx) => {
                    if inner.opens[idx].lock().is_closed() {
                        return Err(Error::badf().context("fd is closed"));
                    }
                    let pos = inner.push_free(idx);
                    std::mem::replace(
                        &mut inner.opens[idx],
                        FdRecord::new_closed(pos).into_ref(),
                    )
                }
                Slot::Sparse(fd) => inner
                    .renumber_map
                    .remove(&fd)
                    .ok_or_else(|| Error::badf().context("fd not in table"))?,
            };

            inner.seat(to_slot, moving)?
        };
        tracing::trace!(from, to, displaced = ?displaced, "renumbered descriptor");
        drop(displaced);
        Ok(())
    }

    /// The number of open descriptors.
    pub fn len(&self) -> usize {
        let inner = self.0.read();
        inner.opens.len() - inner.closes.len() + inner.renumber_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_open(&self, fd: Fd) -> bool {
        self.resolve_and_lock(fd).is_ok()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
