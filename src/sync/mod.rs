//! Implementations of `WasiFile` and `WasiDir` in terms of
//! `cap_std::fs::{File, Dir}` and `cap_std::net`. These types provide
//! sandboxed access to the local filesystem and sockets on both Unix and
//! Windows.

pub mod dir;
pub mod file;
pub mod net;
pub mod stdio;

pub use cap_std::ambient_authority;
pub use cap_std::fs::Dir;
pub use cap_std::net::TcpListener;

use crate::{Error, WasiDir};
use std::path::Path;

/// Open a host directory by path, ready to hand to
/// [`WasiCtxBuilder::preopened_dir`](crate::WasiCtxBuilder::preopened_dir).
///
/// This is the one place the crate uses ambient authority; everything opened
/// through the returned directory stays beneath it.
pub fn open_ambient_dir(path: impl AsRef<Path>) -> Result<Box<dyn WasiDir>, Error> {
    let dir = Dir::open_ambient_dir(path, ambient_authority())?;
    Ok(Box::new(dir::Dir::from_cap_std(dir)))
}
