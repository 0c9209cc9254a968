//! A single guest descriptor's state and its lock.

use crate::error::invariant_violation;
use crate::native::NativeResource;
use crate::rights::FdRights;
use crate::types::{Filetype, Rights};
use crate::{Error, ErrorExt};
use parking_lot::Mutex;
use std::sync::Arc;

/// A shared handle to a record. The record's address is fixed for as long as
/// any handle exists, no matter how the table around it is rearranged.
pub type RecordRef = Arc<Mutex<FdRecord>>;

/// An owned lock on a record. It keeps the record alive on its own, so it
/// stays valid after the table lock used to find the record is released.
pub type LockedFd = lock_api::ArcMutexGuard<parking_lot::RawMutex, FdRecord>;

/// Where a closed record is tracked.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ClosePos {
    /// The record's slot in the dense array is free, and this is the index
    /// of that slot in the table's free-list.
    Free(usize),
    /// The record is no longer reachable from the table at all (a sparse
    /// entry that was closed, or a record displaced by renumbering). Only
    /// in-flight calls that resolved it earlier can still see it.
    Detached,
}

/// The state of one guest descriptor.
///
/// `close_pos` is `None` exactly when the descriptor is open, and `native`
/// is `None` exactly when it is closed.
#[derive(Debug)]
pub struct FdRecord {
    native: Option<NativeResource>,
    rights: FdRights,
    close_pos: Option<ClosePos>,
}

impl FdRecord {
    pub(crate) fn new_open(native: NativeResource, rights: FdRights) -> Self {
        FdRecord {
            native: Some(native),
            rights,
            close_pos: None,
        }
    }

    pub(crate) fn new_closed(pos: ClosePos) -> Self {
        FdRecord {
            native: None,
            rights: FdRights::empty(),
            close_pos: Some(pos),
        }
    }

    pub(crate) fn into_ref(self) -> RecordRef {
        Arc::new(Mutex::new(self))
    }

    pub fn is_closed(&self) -> bool {
        self.close_pos.is_some()
    }

    pub(crate) fn close_pos(&self) -> Option<ClosePos> {
        self.close_pos
    }

    pub(crate) fn set_close_pos(&mut self, pos: ClosePos) {
        debug_assert!(self.is_closed());
        self.close_pos = Some(pos);
    }

    pub fn rights(&self) -> FdRights {
        self.rights
    }

    /// Fail with `Notcapable` unless `required` is a subset of the base
    /// rights. Must run before any native operation.
    pub fn check_rights(&self, required: Rights) -> Result<(), Error> {
        self.rights.check(required)
    }

    /// Replace the rights pair. Rights can only ever be dropped.
    pub fn set_rights(&mut self, rights: FdRights) -> Result<(), Error> {
        if !self.rights.contains(&rights) {
            return Err(Error::not_capable().context(format!(
                "cannot raise {} to {}",
                self.rights, rights
            )));
        }
        self.rights = rights;
        Ok(())
    }

    pub fn native(&self) -> Result<&NativeResource, Error> {
        match &self.native {
            None => Err(invariant_violation("open fd has no native resource")),
            #[cfg(test)]
            Some(NativeResource::Null) => Err(invariant_violation("open fd has a null resource")),
            Some(native) => Ok(native),
        }
    }

    pub fn native_mut(&mut self) -> Result<&mut NativeResource, Error> {
        match &mut self.native {
            None => Err(invariant_violation("open fd has no native resource")),
            #[cfg(test)]
            Some(NativeResource::Null) => Err(invariant_violation("open fd has a null resource")),
            Some(native) => Ok(native),
        }
    }

    pub fn filetype(&self) -> Result<Filetype, Error> {
        self.native()?.filetype()
    }

    /// Mark the record closed at `pos`, clear its rights and hand back the
    /// detached resource. The caller drops it once every lock is released.
    pub(crate) fn close(&mut self, pos: ClosePos) -> Result<NativeResource, Error> {
        if self.is_closed() {
            return Err(Error::badf().context("fd already closed"));
        }
        self.close_pos = Some(pos);
        self.rights = FdRights::empty();
        self.native
            .take()
            .ok_or_else(|| invariant_violation("open fd has no native resource"))
    }

    /// Bring a closed record back into service for a recycled slot.
    pub(crate) fn reopen(&mut self, native: NativeResource, rights: FdRights) {
        debug_assert!(self.is_closed() && self.native.is_none());
        self.native = Some(native);
        self.rights = rights;
        self.close_pos = None;
    }
}
