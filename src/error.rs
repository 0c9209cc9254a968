//! Error handling for host-side WASI operations.
//!
//! Host code produces [`Error`], which is either a WASI [`Errno`] (possibly
//! carrying extra context) or some other host failure. At the call adapter
//! boundary every `Error` is collapsed into the `Errno` returned to the guest.

use crate::memory::GuestError;
use crate::types::Errno;
use std::fmt;
use std::io;

/// An error returned from host-side WASI operations.
///
/// Internally this is an `anyhow::Error` so that context can be attached to
/// an errno while it flows back up to the adapter.
pub struct Error {
    inner: anyhow::Error,
}

impl Error {
    /// Construct an error which is not a WASI errno. It is reported to the
    /// guest as `Io` after being logged.
    pub fn trap(inner: anyhow::Error) -> Error {
        Error { inner }
    }

    /// The errno this error carries, if any.
    pub fn downcast(self) -> std::result::Result<Errno, anyhow::Error> {
        self.inner.downcast()
    }

    pub fn downcast_ref(&self) -> Option<&Errno> {
        self.inner.downcast_ref()
    }

    pub fn context(self, s: impl Into<String>) -> Self {
        Self {
            inner: self.inner.context(s.into()),
        }
    }
}

impl From<Errno> for Error {
    fn from(abi: Errno) -> Error {
        Error {
            inner: abi.into(),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl std::error::Error for Error {}

/// Shorthand constructors for the errnos host code produces most often.
pub trait ErrorExt {
    fn not_found() -> Self;
    fn too_big() -> Self;
    fn badf() -> Self;
    fn exist() -> Self;
    fn illegal_byte_sequence() -> Self;
    fn invalid_argument() -> Self;
    fn io() -> Self;
    fn name_too_long() -> Self;
    fn not_dir() -> Self;
    fn not_sock() -> Self;
    fn not_supported() -> Self;
    fn not_capable() -> Self;
    fn overflow() -> Self;
    fn range() -> Self;
    fn seek_pipe() -> Self;
    fn perm() -> Self;
    fn is_dir() -> Self;
    fn fault() -> Self;
}

impl ErrorExt for Error {
    fn not_found() -> Self {
        Errno::Noent.into()
    }
    fn too_big() -> Self {
        Errno::TooBig.into()
    }
    fn badf() -> Self {
        Errno::Badf.into()
    }
    fn exist() -> Self {
        Errno::Exist.into()
    }
    fn illegal_byte_sequence() -> Self {
        Errno::Ilseq.into()
    }
    fn invalid_argument() -> Self {
        Errno::Inval.into()
    }
    fn io() -> Self {
        Errno::Io.into()
    }
    fn name_too_long() -> Self {
        Errno::Nametoolong.into()
    }
    fn not_dir() -> Self {
        Errno::Notdir.into()
    }
    fn not_sock() -> Self {
        Errno::Notsock.into()
    }
    fn not_supported() -> Self {
        Errno::Notsup.into()
    }
    fn not_capable() -> Self {
        Errno::Notcapable.into()
    }
    fn overflow() -> Self {
        Errno::Overflow.into()
    }
    fn range() -> Self {
        Errno::Range.into()
    }
    fn seek_pipe() -> Self {
        Errno::Spipe.into()
    }
    fn perm() -> Self {
        Errno::Perm.into()
    }
    fn is_dir() -> Self {
        Errno::Isdir.into()
    }
    fn fault() -> Self {
        Errno::Fault.into()
    }
}

impl From<GuestError> for Error {
    fn from(err: GuestError) -> Error {
        Errno::from(err).into()
    }
}

impl From<GuestError> for Errno {
    fn from(err: GuestError) -> Errno {
        match err {
            GuestError::PtrOutOfBounds { .. } => Errno::Fault,
            GuestError::PtrOverflow => Errno::Overflow,
            GuestError::InvalidUtf8(_) => Errno::Ilseq,
            GuestError::InvalidFlagValue(_) | GuestError::InvalidEnumValue(_) => Errno::Inval,
            GuestError::TryFromIntError(_) => Errno::Overflow,
        }
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(_: std::num::TryFromIntError) -> Error {
        Error::overflow()
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Error {
        Error::illegal_byte_sequence()
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        match from_raw_os_error(err.raw_os_error()) {
            Some(errno) => errno.into(),
            None => match err.kind() {
                io::ErrorKind::NotFound => Errno::Noent.into(),
                io::ErrorKind::PermissionDenied => Errno::Perm.into(),
                io::ErrorKind::AlreadyExists => Errno::Exist.into(),
                io::ErrorKind::InvalidInput => Errno::Inval.into(),
                io::ErrorKind::WouldBlock => Errno::Again.into(),
                io::ErrorKind::BrokenPipe => Errno::Pipe.into(),
                io::ErrorKind::Interrupted => Errno::Intr.into(),
                io::ErrorKind::Unsupported => Errno::Notsup.into(),
                io::ErrorKind::ConnectionRefused => Errno::Connrefused.into(),
                io::ErrorKind::ConnectionReset => Errno::Connreset.into(),
                io::ErrorKind::ConnectionAborted => Errno::Connaborted.into(),
                io::ErrorKind::NotConnected => Errno::Notconn.into(),
                io::ErrorKind::AddrInUse => Errno::Addrinuse.into(),
                io::ErrorKind::AddrNotAvailable => Errno::Addrnotavail.into(),
                io::ErrorKind::TimedOut => Errno::Timedout.into(),
                io::ErrorKind::OutOfMemory => Errno::Nomem.into(),
                _ => Error::trap(anyhow::anyhow!(err).context("Unknown OS error")),
            },
        }
    }
}

#[cfg(unix)]
fn from_raw_os_error(err: Option<i32>) -> Option<Errno> {
    use rustix::io::Errno as RustixErrno;
    let raw = err?;
    Some(match RustixErrno::from_raw_os_error(raw) {
        RustixErrno::TOOBIG => Errno::TooBig,
        RustixErrno::ACCESS => Errno::Acces,
        RustixErrno::ADDRINUSE => Errno::Addrinuse,
        RustixErrno::ADDRNOTAVAIL => Errno::Addrnotavail,
        RustixErrno::AFNOSUPPORT => Errno::Afnosupport,
        RustixErrno::AGAIN => Errno::Again,
        RustixErrno::ALREADY => Errno::Already,
        RustixErrno::BADF => Errno::Badf,
        RustixErrno::BADMSG => Errno::Badmsg,
        RustixErrno::BUSY => Errno::Busy,
        RustixErrno::CANCELED => Errno::Canceled,
        RustixErrno::CHILD => Errno::Child,
        RustixErrno::CONNABORTED => Errno::Connaborted,
        RustixErrno::CONNREFUSED => Errno::Connrefused,
        RustixErrno::CONNRESET => Errno::Connreset,
        RustixErrno::DEADLK => Errno::Deadlk,
        RustixErrno::DESTADDRREQ => Errno::Destaddrreq,
        RustixErrno::DOM => Errno::Dom,
        RustixErrno::DQUOT => Errno::Dquot,
        RustixErrno::EXIST => Errno::Exist,
        RustixErrno::FAULT => Errno::Fault,
        RustixErrno::FBIG => Errno::Fbig,
        RustixErrno::HOSTUNREACH => Errno::Hostunreach,
        RustixErrno::IDRM => Errno::Idrm,
        RustixErrno::ILSEQ => Errno::Ilseq,
        RustixErrno::INPROGRESS => Errno::Inprogress,
        RustixErrno::INTR => Errno::Intr,
        RustixErrno::INVAL => Errno::Inval,
        RustixErrno::IO => Errno::Io,
        RustixErrno::ISCONN => Errno::Isconn,
        RustixErrno::ISDIR => Errno::Isdir,
        RustixErrno::LOOP => Errno::Loop,
        RustixErrno::MFILE => Errno::Mfile,
        RustixErrno::MLINK => Errno::Mlink,
        RustixErrno::MSGSIZE => Errno::Msgsize,
        RustixErrno::NAMETOOLONG => Errno::Nametoolong,
        RustixErrno::NETDOWN => Errno::Netdown,
        RustixErrno::NETRESET => Errno::Netreset,
        RustixErrno::NETUNREACH => Errno::Netunreach,
        RustixErrno::NFILE => Errno::Nfile,
        RustixErrno::NOBUFS => Errno::Nobufs,
        RustixErrno::NODEV => Errno::Nodev,
        RustixErrno::NOENT => Errno::Noent,
        RustixErrno::NOEXEC => Errno::Noexec,
        RustixErrno::NOLCK => Errno::Nolck,
        RustixErrno::NOMEM => Errno::Nomem,
        RustixErrno::NOPROTOOPT => Errno::Noprotoopt,
        RustixErrno::NOSPC => Errno::Nospc,
        RustixErrno::NOSYS => Errno::Nosys,
        RustixErrno::NOTCONN => Errno::Notconn,
        RustixErrno::NOTDIR => Errno::Notdir,
        RustixErrno::NOTEMPTY => Errno::Notempty,
        RustixErrno::NOTSOCK => Errno::Notsock,
        RustixErrno::NOTSUP => Errno::Notsup,
        RustixErrno::NOTTY => Errno::Notty,
        RustixErrno::NXIO => Errno::Nxio,
        RustixErrno::OVERFLOW => Errno::Overflow,
        RustixErrno::PERM => Errno::Perm,
        RustixErrno::PIPE => Errno::Pipe,
        RustixErrno::PROTO => Errno::Proto,
        RustixErrno::PROTONOSUPPORT => Errno::Protonosupport,
        RustixErrno::PROTOTYPE => Errno::Prototype,
        RustixErrno::RANGE => Errno::Range,
        RustixErrno::ROFS => Errno::Rofs,
        RustixErrno::SPIPE => Errno::Spipe,
        RustixErrno::SRCH => Errno::Srch,
        RustixErrno::STALE => Errno::Stale,
        RustixErrno::TIMEDOUT => Errno::Timedout,
        RustixErrno::TXTBSY => Errno::Txtbsy,
        RustixErrno::XDEV => Errno::Xdev,
        _ => return None,
    })
}

#[cfg(windows)]
fn from_raw_os_error(raw_os_error: Option<i32>) -> Option<Errno> {
    use windows_sys::Win32::Foundation;
    use windows_sys::Win32::Networking::WinSock;

    let raw = raw_os_error?;
    match raw as u32 {
        Foundation::ERROR_BAD_ENVIRONMENT => return Some(Errno::TooBig),
        Foundation::ERROR_FILE_NOT_FOUND => return Some(Errno::Noent),
        Foundation::ERROR_PATH_NOT_FOUND => return Some(Errno::Noent),
        Foundation::ERROR_TOO_MANY_OPEN_FILES => return Some(Errno::Nfile),
        Foundation::ERROR_ACCESS_DENIED => return Some(Errno::Acces),
        Foundation::ERROR_SHARING_VIOLATION => return Some(Errno::Acces),
        Foundation::ERROR_PRIVILEGE_NOT_HELD => return Some(Errno::Perm),
        Foundation::ERROR_INVALID_HANDLE => return Some(Errno::Badf),
        Foundation::ERROR_INVALID_NAME => return Some(Errno::Noent),
        Foundation::ERROR_NOT_ENOUGH_MEMORY => return Some(Errno::Nomem),
        Foundation::ERROR_OUTOFMEMORY => return Some(Errno::Nomem),
        Foundation::ERROR_DIR_NOT_EMPTY => return Some(Errno::Notempty),
        Foundation::ERROR_NOT_READY => return Some(Errno::Busy),
        Foundation::ERROR_BUSY => return Some(Errno::Busy),
        Foundation::ERROR_NOT_SUPPORTED => return Some(Errno::Notsup),
        Foundation::ERROR_FILE_EXISTS => return Some(Errno::Exist),
        Foundation::ERROR_BROKEN_PIPE => return Some(Errno::Pipe),
        Foundation::ERROR_BUFFER_OVERFLOW => return Some(Errno::Nametoolong),
        Foundation::ERROR_NOT_A_REPARSE_POINT => return Some(Errno::Inval),
        Foundation::ERROR_NEGATIVE_SEEK => return Some(Errno::Inval),
        Foundation::ERROR_DIRECTORY => return Some(Errno::Notdir),
        Foundation::ERROR_ALREADY_EXISTS => return Some(Errno::Exist),
        Foundation::ERROR_STOPPED_ON_SYMLINK => return Some(Errno::Loop),
        Foundation::ERROR_DIRECTORY_NOT_SUPPORTED => return Some(Errno::Isdir),
        _ => {}
    }
    Some(match raw {
        WinSock::WSAEWOULDBLOCK => Errno::Again,
        WinSock::WSAEINTR => Errno::Intr,
        WinSock::WSAEBADF => Errno::Badf,
        WinSock::WSAEACCES => Errno::Acces,
        WinSock::WSAEFAULT => Errno::Fault,
        WinSock::WSAEINVAL => Errno::Inval,
        WinSock::WSAEMFILE => Errno::Nfile,
        WinSock::WSAEINPROGRESS => Errno::Inprogress,
        WinSock::WSAEALREADY => Errno::Already,
        WinSock::WSAENOTSOCK => Errno::Notsock,
        WinSock::WSAEDESTADDRREQ => Errno::Destaddrreq,
        WinSock::WSAEMSGSIZE => Errno::Msgsize,
        WinSock::WSAEPROTOTYPE => Errno::Prototype,
        WinSock::WSAENOPROTOOPT => Errno::Noprotoopt,
        WinSock::WSAEPROTONOSUPPORT => Errno::Protonosupport,
        WinSock::WSAEAFNOSUPPORT => Errno::Afnosupport,
        WinSock::WSAEADDRINUSE => Errno::Addrinuse,
        WinSock::WSAEADDRNOTAVAIL => Errno::Addrnotavail,
        WinSock::WSAENETDOWN => Errno::Netdown,
        WinSock::WSAENETUNREACH => Errno::Netunreach,
        WinSock::WSAENETRESET => Errno::Netreset,
        WinSock::WSAECONNABORTED => Errno::Connaborted,
        WinSock::WSAECONNRESET => Errno::Connreset,
        WinSock::WSAENOBUFS => Errno::Nobufs,
        WinSock::WSAEISCONN => Errno::Isconn,
        WinSock::WSAENOTCONN => Errno::Notconn,
        WinSock::WSAETIMEDOUT => Errno::Timedout,
        WinSock::WSAECONNREFUSED => Errno::Connrefused,
        WinSock::WSAELOOP => Errno::Loop,
        WinSock::WSAENAMETOOLONG => Errno::Nametoolong,
        WinSock::WSAEHOSTUNREACH => Errno::Hostunreach,
        WinSock::WSAENOTEMPTY => Errno::Notempty,
        _ => return None,
    })
}

#[cfg(not(any(unix, windows)))]
fn from_raw_os_error(_raw_os_error: Option<i32>) -> Option<Errno> {
    None
}

/// Collapse an error into the errno returned to the guest.
pub(crate) fn to_errno(err: Error) -> Errno {
    match err.downcast() {
        Ok(errno) => errno,
        Err(other) => {
            tracing::warn!(error = ?other, "host error reported to the guest as Io");
            Errno::Io
        }
    }
}

/// Report a broken internal invariant of the descriptor table.
///
/// Debug builds panic so the breach is caught where it happens; release
/// builds degrade to an `Io` error for the call that observed it.
#[track_caller]
pub(crate) fn invariant_violation(what: &str) -> Error {
    if cfg!(debug_assertions) {
        panic!("fd table invariant violated: {what}");
    }
    tracing::error!("fd table invariant violated: {what}");
    Error::io().context(format!("invariant violated: {what}"))
}

/// Table bookkeeping arithmetic overflowed. Nothing sane can be done with a
/// table in that state.
#[cold]
pub(crate) fn bookkeeping_overflow(what: &str) -> ! {
    tracing::error!("fd table bookkeeping overflow: {what}");
    std::process::abort()
}
