//! WASI preview1 ABI types.
//!
//! These mirror the `wasi_snapshot_preview1` witx definitions: integer
//! representations, bitflag layouts and the fixed-size records that are
//! written into guest linear memory. All multi-byte values are little-endian
//! on the wire.

use crate::memory::GuestError;
use bitflags::bitflags;

/// A guest file descriptor number as it appears on the wasm stack.
///
/// Guests pass descriptors as `i32`; negative values are never valid.
pub type Fd = i32;
pub type Filesize = u64;
pub type Filedelta = i64;
pub type Timestamp = u64;
pub type Dircookie = u64;
pub type Size = u32;

/// Error codes returned by WASI calls.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(u16)]
pub enum Errno {
    #[error("Success: No error occurred")]
    Success = 0,
    #[error("TooBig: Argument list too long")]
    TooBig = 1,
    #[error("Acces: Permission denied")]
    Acces = 2,
    #[error("Addrinuse: Address in use")]
    Addrinuse = 3,
    #[error("Addrnotavail: Address not available")]
    Addrnotavail = 4,
    #[error("Afnosupport: Address family not supported")]
    Afnosupport = 5,
    #[error("Again: Resource unavailable, or operation would block")]
    Again = 6,
    #[error("Already: Connection already in progress")]
    Already = 7,
    #[error("Badf: Bad file descriptor")]
    Badf = 8,
    #[error("Badmsg: Bad message")]
    Badmsg = 9,
    #[error("Busy: Device or resource busy")]
    Busy = 10,
    #[error("Canceled: Operation canceled")]
    Canceled = 11,
    #[error("Child: No child processes")]
    Child = 12,
    #[error("Connaborted: Connection aborted")]
    Connaborted = 13,
    #[error("Connrefused: Connection refused")]
    Connrefused = 14,
    #[error("Connreset: Connection reset")]
    Connreset = 15,
    #[error("Deadlk: Resource deadlock would occur")]
    Deadlk = 16,
    #[error("Destaddrreq: Destination address required")]
    Destaddrreq = 17,
    #[error("Dom: Mathematics argument out of domain of function")]
    Dom = 18,
    #[error("Dquot: Reserved")]
    Dquot = 19,
    #[error("Exist: File exists")]
    Exist = 20,
    #[error("Fault: Bad address")]
    Fault = 21,
    #[error("Fbig: File too large")]
    Fbig = 22,
    #[error("Hostunreach: Host is unreachable")]
    Hostunreach = 23,
    #[error("Idrm: Identifier removed")]
    Idrm = 24,
    #[error("Ilseq: Illegal byte sequence")]
    Ilseq = 25,
    #[error("Inprogress: Operation in progress")]
    Inprogress = 26,
    #[error("Intr: Interrupted function")]
    Intr = 27,
    #[error("Inval: Invalid argument")]
    Inval = 28,
    #[error("Io: I/O error")]
    Io = 29,
    #[error("Isconn: Socket is connected")]
    Isconn = 30,
    #[error("Isdir: Is a directory")]
    Isdir = 31,
    #[error("Loop: Too many levels of symbolic links")]
    Loop = 32,
    #[error("Mfile: File descriptor value too large")]
    Mfile = 33,
    #[error("Mlink: Too many links")]
    Mlink = 34,
    #[error("Msgsize: Message too large")]
    Msgsize = 35,
    #[error("Multihop: Reserved")]
    Multihop = 36,
    #[error("Nametoolong: Filename too long")]
    Nametoolong = 37,
    #[error("Netdown: Network is down")]
    Netdown = 38,
    #[error("Netreset: Connection aborted by network")]
    Netreset = 39,
    #[error("Netunreach: Network unreachable")]
    Netunreach = 40,
    #[error("Nfile: Too many files open in system")]
    Nfile = 41,
    #[error("Nobufs: No buffer space available")]
    Nobufs = 42,
    #[error("Nodev: No such device")]
    Nodev = 43,
    #[error("Noent: No such file or directory")]
    Noent = 44,
    #[error("Noexec: Executable file format error")]
    Noexec = 45,
    #[error("Nolck: No locks available")]
    Nolck = 46,
    #[error("Nolink: Reserved")]
    Nolink = 47,
    #[error("Nomem: Not enough space")]
    Nomem = 48,
    #[error("Nomsg: No message of the desired type")]
    Nomsg = 49,
    #[error("Noprotoopt: Protocol not available")]
    Noprotoopt = 50,
    #[error("Nospc: No space left on device")]
    Nospc = 51,
    #[error("Nosys: Function not supported")]
    Nosys = 52,
    #[error("Notconn: The socket is not connected")]
    Notconn = 53,
    #[error("Notdir: Not a directory or a symbolic link to a directory")]
    Notdir = 54,
    #[error("Notempty: Directory not empty")]
    Notempty = 55,
    #[error("Notrecoverable: State not recoverable")]
    Notrecoverable = 56,
    #[error("Notsock: Not a socket")]
    Notsock = 57,
    #[error("Notsup: Not supported, or operation not supported on socket")]
    Notsup = 58,
    #[error("Notty: Inappropriate I/O control operation")]
    Notty = 59,
    #[error("Nxio: No such device or address")]
    Nxio = 60,
    #[error("Overflow: Value too large to be stored in data type")]
    Overflow = 61,
    #[error("Ownerdead: Previous owner died")]
    Ownerdead = 62,
    #[error("Perm: Operation not permitted")]
    Perm = 63,
    #[error("Pipe: Broken pipe")]
    Pipe = 64,
    #[error("Proto: Protocol error")]
    Proto = 65,
    #[error("Protonosupport: Protocol not supported")]
    Protonosupport = 66,
    #[error("Prototype: Protocol wrong type for socket")]
    Prototype = 67,
    #[error("Range: Result too large")]
    Range = 68,
    #[error("Rofs: Read-only file system")]
    Rofs = 69,
    #[error("Spipe: Invalid seek")]
    Spipe = 70,
    #[error("Srch: No such process")]
    Srch = 71,
    #[error("Stale: Reserved")]
    Stale = 72,
    #[error("Timedout: Connection timed out")]
    Timedout = 73,
    #[error("Txtbsy: Text file busy")]
    Txtbsy = 74,
    #[error("Xdev: Cross-device link")]
    Xdev = 75,
    #[error("Notcapable: Extension: Capabilities insufficient")]
    Notcapable = 76,
}

impl Errno {
    /// The raw value returned to the guest.
    pub fn raw(self) -> u16 {
        self as u16
    }
}

impl From<Errno> for i32 {
    fn from(e: Errno) -> i32 {
        e as i32
    }
}

bitflags! {
    /// File descriptor rights, determining which actions may be performed.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct Rights: u64 {
        const FD_DATASYNC = 1 << 0;
        const FD_READ = 1 << 1;
        const FD_SEEK = 1 << 2;
        const FD_FDSTAT_SET_FLAGS = 1 << 3;
        const FD_SYNC = 1 << 4;
        const FD_TELL = 1 << 5;
        const FD_WRITE = 1 << 6;
        const FD_ADVISE = 1 << 7;
        const FD_ALLOCATE = 1 << 8;
        const PATH_CREATE_DIRECTORY = 1 << 9;
        const PATH_CREATE_FILE = 1 << 10;
        const PATH_LINK_SOURCE = 1 << 11;
        const PATH_LINK_TARGET = 1 << 12;
        const PATH_OPEN = 1 << 13;
        const FD_READDIR = 1 << 14;
        const PATH_READLINK = 1 << 15;
        const PATH_RENAME_SOURCE = 1 << 16;
        const PATH_RENAME_TARGET = 1 << 17;
        const PATH_FILESTAT_GET = 1 << 18;
        const PATH_FILESTAT_SET_SIZE = 1 << 19;
        const PATH_FILESTAT_SET_TIMES = 1 << 20;
        const FD_FILESTAT_GET = 1 << 21;
        const FD_FILESTAT_SET_SIZE = 1 << 22;
        const FD_FILESTAT_SET_TIMES = 1 << 23;
        const PATH_SYMLINK = 1 << 24;
        const PATH_REMOVE_DIRECTORY = 1 << 25;
        const PATH_UNLINK_FILE = 1 << 26;
        const POLL_FD_READWRITE = 1 << 27;
        const SOCK_SHUTDOWN = 1 << 28;
        const SOCK_ACCEPT = 1 << 29;
    }
}

impl std::fmt::Display for Rights {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.bits())
    }
}

bitflags! {
    /// File descriptor flags.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct FdFlags: u16 {
        const APPEND   = 0b1;
        const DSYNC    = 0b10;
        const NONBLOCK = 0b100;
        const RSYNC    = 0b1000;
        const SYNC     = 0b10000;
    }
}

bitflags! {
    /// Which file time attributes to adjust.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct FstFlags: u16 {
        const ATIM     = 0b1;
        const ATIM_NOW = 0b10;
        const MTIM     = 0b100;
        const MTIM_NOW = 0b1000;
    }
}

bitflags! {
    /// Open flags used by `path_open`.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct OFlags: u16 {
        const CREAT     = 0b1;
        const DIRECTORY = 0b10;
        const EXCL      = 0b100;
        const TRUNC     = 0b1000;
    }
}

bitflags! {
    /// Flags determining the method of how paths are resolved.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct LookupFlags: u32 {
        const SYMLINK_FOLLOW = 0b1;
    }
}

bitflags! {
    /// Which channels on a socket to shut down.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct SdFlags: u8 {
        const RD = 0b1;
        const WR = 0b10;
    }
}

bitflags! {
    /// Flags provided to `sock_recv`.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct RiFlags: u16 {
        const RECV_PEEK    = 0b1;
        const RECV_WAITALL = 0b10;
    }
}

bitflags! {
    /// Flags returned by `sock_recv`.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct RoFlags: u16 {
        const RECV_DATA_TRUNCATED = 0b1;
    }
}

bitflags! {
    /// Flags provided to `sock_send`. No flags are currently defined.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct SiFlags: u16 {
    }
}

macro_rules! flags_from_raw {
    ($($ty:ident: $raw:ty),* $(,)?) => {$(
        impl TryFrom<$raw> for $ty {
            type Error = GuestError;
            fn try_from(raw: $raw) -> Result<Self, GuestError> {
                $ty::from_bits(raw).ok_or(GuestError::InvalidFlagValue(stringify!($ty)))
            }
        }
    )*};
}

flags_from_raw! {
    Rights: u64,
    FdFlags: u16,
    FstFlags: u16,
    OFlags: u16,
    LookupFlags: u32,
    SdFlags: u8,
    RiFlags: u16,
    SiFlags: u16,
}

/// The type of a file descriptor or file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Filetype {
    Unknown = 0,
    BlockDevice = 1,
    CharacterDevice = 2,
    Directory = 3,
    RegularFile = 4,
    SocketDgram = 5,
    SocketStream = 6,
    SymbolicLink = 7,
}

/// File or memory access pattern advisory information.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Advice {
    Normal = 0,
    Sequential = 1,
    Random = 2,
    WillNeed = 3,
    DontNeed = 4,
    NoReuse = 5,
}

impl TryFrom<u8> for Advice {
    type Error = GuestError;
    fn try_from(raw: u8) -> Result<Self, GuestError> {
        Ok(match raw {
            0 => Advice::Normal,
            1 => Advice::Sequential,
            2 => Advice::Random,
            3 => Advice::WillNeed,
            4 => Advice::DontNeed,
            5 => Advice::NoReuse,
            _ => return Err(GuestError::InvalidEnumValue("Advice")),
        })
    }
}

/// The position relative to which to set the offset of the file descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Whence {
    Set = 0,
    Cur = 1,
    End = 2,
}

impl TryFrom<u8> for Whence {
    type Error = GuestError;
    fn try_from(raw: u8) -> Result<Self, GuestError> {
        Ok(match raw {
            0 => Whence::Set,
            1 => Whence::Cur,
            2 => Whence::End,
            _ => return Err(GuestError::InvalidEnumValue("Whence")),
        })
    }
}

pub const FDSTAT_SIZE: u32 = 24;
pub const FILESTAT_SIZE: u32 = 64;
pub const PRESTAT_SIZE: u32 = 8;
pub const DIRENT_SIZE: u32 = 24;

/// File descriptor attributes, as returned by `fd_fdstat_get`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Fdstat {
    pub fs_filetype: Filetype,
    pub fs_flags: FdFlags,
    pub fs_rights_base: Rights,
    pub fs_rights_inheriting: Rights,
}

/// Host mirror of the wire layout of `fdstat`, with the padding spelled out
/// so that every byte of the struct is initialized.
#[repr(C, align(8))]
struct RawFdstat {
    fs_filetype: u8,
    _pad0: u8,
    fs_flags: u16,
    _pad1: u32,
    fs_rights_base: u64,
    fs_rights_inheriting: u64,
}

const _: () = assert!(std::mem::size_of::<RawFdstat>() == FDSTAT_SIZE as usize);
const _: () = assert!(std::mem::offset_of!(RawFdstat, fs_flags) == 2);
const _: () = assert!(std::mem::offset_of!(RawFdstat, fs_rights_base) == 8);
const _: () = assert!(std::mem::offset_of!(RawFdstat, fs_rights_inheriting) == 16);

impl Fdstat {
    /// Encode into the 24-byte little-endian wire layout.
    pub fn to_bytes(&self) -> [u8; FDSTAT_SIZE as usize] {
        let raw = RawFdstat {
            fs_filetype: self.fs_filetype as u8,
            _pad0: 0,
            fs_flags: self.fs_flags.bits(),
            _pad1: 0,
            fs_rights_base: self.fs_rights_base.bits(),
            fs_rights_inheriting: self.fs_rights_inheriting.bits(),
        };
        if cfg!(target_endian = "little") {
            // SAFETY: `RawFdstat` is `repr(C)` with explicit padding fields,
            // so all 24 bytes are initialized, and on a little-endian host its
            // in-memory representation is exactly the wire layout.
            unsafe { std::mem::transmute::<RawFdstat, [u8; FDSTAT_SIZE as usize]>(raw) }
        } else {
            let mut buf = [0u8; FDSTAT_SIZE as usize];
            buf[0] = raw.fs_filetype;
            buf[2..4].copy_from_slice(&raw.fs_flags.to_le_bytes());
            buf[8..16].copy_from_slice(&raw.fs_rights_base.to_le_bytes());
            buf[16..24].copy_from_slice(&raw.fs_rights_inheriting.to_le_bytes());
            buf
        }
    }
}

/// File attributes, as returned by `fd_filestat_get` and `path_filestat_get`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Filestat {
    pub dev: u64,
    pub ino: u64,
    pub filetype: Filetype,
    pub nlink: u64,
    pub size: Filesize,
    pub atim: Timestamp,
    pub mtim: Timestamp,
    pub ctim: Timestamp,
}

impl Filestat {
    pub fn to_bytes(&self) -> [u8; FILESTAT_SIZE as usize] {
        let mut buf = [0u8; FILESTAT_SIZE as usize];
        buf[0..8].copy_from_slice(&self.dev.to_le_bytes());
        buf[8..16].copy_from_slice(&self.ino.to_le_bytes());
        buf[16] = self.filetype as u8;
        buf[24..32].copy_from_slice(&self.nlink.to_le_bytes());
        buf[32..40].copy_from_slice(&self.size.to_le_bytes());
        buf[40..48].copy_from_slice(&self.atim.to_le_bytes());
        buf[48..56].copy_from_slice(&self.mtim.to_le_bytes());
        buf[56..64].copy_from_slice(&self.ctim.to_le_bytes());
        buf
    }
}

/// Information about a pre-opened capability. Only directories exist.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Prestat {
    Dir { pr_name_len: Size },
}

impl Prestat {
    pub fn to_bytes(&self) -> [u8; PRESTAT_SIZE as usize] {
        let mut buf = [0u8; PRESTAT_SIZE as usize];
        match self {
            Prestat::Dir { pr_name_len } => {
                buf[0] = 0;
                buf[4..8].copy_from_slice(&pr_name_len.to_le_bytes());
            }
        }
        buf
    }
}

/// A directory entry header; the name follows it in the readdir buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Dirent {
    pub d_next: Dircookie,
    pub d_ino: u64,
    pub d_namlen: u32,
    pub d_type: Filetype,
}

impl Dirent {
    pub fn to_bytes(&self) -> [u8; DIRENT_SIZE as usize] {
        let mut buf = [0u8; DIRENT_SIZE as usize];
        buf[0..8].copy_from_slice(&self.d_next.to_le_bytes());
        buf[8..16].copy_from_slice(&self.d_ino.to_le_bytes());
        buf[16..20].copy_from_slice(&self.d_namlen.to_le_bytes());
        buf[20] = self.d_type as u8;
        buf
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fdstat_wire_layout() {
        let stat = Fdstat {
            fs_filetype: Filetype::RegularFile,
            fs_flags: FdFlags::APPEND | FdFlags::NONBLOCK,
            fs_rights_base: Rights::FD_READ | Rights::FD_ADVISE,
            fs_rights_inheriting: Rights::empty(),
        };
        let bytes = stat.to_bytes();
        assert_eq!(bytes[0], 4);
        assert_eq!(bytes[1], 0);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 0b101);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(
            u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            0x82
        );
        assert_eq!(&bytes[16..24], &[0; 8]);
    }

    #[test]
    fn filestat_places_filetype_at_16() {
        let stat = Filestat {
            dev: 1,
            ino: 2,
            filetype: Filetype::Directory,
            nlink: 3,
            size: 4,
            atim: 5,
            mtim: 6,
            ctim: 7,
        };
        let bytes = stat.to_bytes();
        assert_eq!(bytes[16], 3);
        assert_eq!(u64::from_le_bytes(bytes[32..40].try_into().unwrap()), 4);
        assert_eq!(u64::from_le_bytes(bytes[56..64].try_into().unwrap()), 7);
    }

    #[test]
    fn errno_values_match_witx() {
        assert_eq!(Errno::Badf.raw(), 8);
        assert_eq!(Errno::Io.raw(), 29);
        assert_eq!(Errno::Notcapable.raw(), 76);
    }

    #[test]
    fn unknown_flag_bits_are_rejected() {
        assert!(FdFlags::try_from(0b100000u16).is_err());
        assert!(Rights::try_from(1u64 << 40).is_err());
        assert_eq!(Advice::try_from(6u8), Err(GuestError::InvalidEnumValue("Advice")));
    }
}
