//! A WASI preview1 host whose guest file-descriptor table can be driven from
//! many threads at once.
//!
//! A [`WasiCtx`] owns an [`FdTable`] mapping guest descriptor numbers to host
//! resources. Each descriptor is a record behind its own lock, so calls on
//! different descriptors never contend beyond a brief read lock of the
//! table, and a descriptor closed or renumbered mid-call never tears down a
//! host handle another thread is still using.
//!
//! The calls themselves live in [`snapshots::preview_1`]: a typed trait
//! implemented for [`WasiCtx`] and the raw ABI an engine links against.
//! Host resources are reached through the [`WasiFile`] and [`WasiDir`]
//! traits; [`sync`] implements them with `cap-std`, and [`pipe`] provides
//! in-memory stdio.

pub mod ctx;
pub mod dir;
mod error;
pub mod fdtable;
pub mod file;
pub mod memory;
pub mod native;
pub mod pipe;
pub mod rights;
pub mod snapshots;
pub mod sync;
pub mod types;

pub use ctx::{WasiCtx, WasiCtxBuilder};
pub use dir::{DirStack, WasiDir};
pub use error::{Error, ErrorExt};
pub use fdtable::FdTable;
pub use file::{SystemTimeSpec, WasiFile};
pub use memory::{GuestError, GuestMemory};
pub use native::NativeResource;
pub use rights::FdRights;
pub use snapshots::preview_1::WasiSnapshotPreview1;
pub use types::{Errno, Fd};

const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<WasiCtx>();
    assert_send_sync::<FdTable>();
};
