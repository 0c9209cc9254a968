use anyhow::Result;
use std::any::Any;
use std::io::{IoSlice, IoSliceMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use wasip1_host::types::{Advice, Errno, Filetype};
use wasip1_host::{Error, WasiCtx, WasiFile, sync};

mod concurrency;
mod fdtable;
mod preview_1;

/// How often a [`CountingFile`] was touched by a native operation, and
/// whether its host handle has been released.
#[derive(Default)]
pub struct Counters {
    pub calls: AtomicUsize,
    pub drops: AtomicUsize,
}

impl Counters {
    pub fn calls(&self) -> usize {
        self.calls.load(SeqCst)
    }
    pub fn drops(&self) -> usize {
        self.drops.load(SeqCst)
    }
}

/// A stand-in host file that counts native calls and its own drop.
pub struct CountingFile(pub Arc<Counters>);

impl WasiFile for CountingFile {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn get_filetype(&self) -> Result<Filetype, Error> {
        Ok(Filetype::RegularFile)
    }
    fn advise(&self, _offset: u64, _len: u64, _advice: Advice) -> Result<(), Error> {
        self.0.calls.fetch_add(1, SeqCst);
        Ok(())
    }
    fn datasync(&self) -> Result<(), Error> {
        self.0.calls.fetch_add(1, SeqCst);
        Ok(())
    }
    fn read_vectored<'a>(&self, _bufs: &mut [IoSliceMut<'a>]) -> Result<u64, Error> {
        self.0.calls.fetch_add(1, SeqCst);
        Ok(0)
    }
    fn write_vectored<'a>(&self, bufs: &[IoSlice<'a>]) -> Result<u64, Error> {
        self.0.calls.fetch_add(1, SeqCst);
        Ok(bufs.iter().map(|b| b.len() as u64).sum())
    }
}

impl Drop for CountingFile {
    fn drop(&mut self) {
        self.0.drops.fetch_add(1, SeqCst);
    }
}

/// A context whose only preopen, at fd 3, is a fresh temporary directory
/// seen by the guest as `/sandbox`.
pub fn sandbox() -> Result<(tempfile::TempDir, WasiCtx)> {
    let dir = tempfile::Builder::new().prefix("wasip1-host").tempdir()?;
    let ctx = WasiCtx::builder()
        .preopened_dir(sync::open_ambient_dir(dir.path())?, "/sandbox")
        .build()?;
    Ok((dir, ctx))
}

pub fn errno(err: Error) -> Errno {
    err.downcast().expect("error should carry an errno")
}
