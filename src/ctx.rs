use crate::dir::{DirStack, WasiDir};
use crate::fdtable::FdTable;
use crate::file::WasiFile;
use crate::native::NativeResource;
use crate::pipe::{ReadPipe, WritePipe};
use crate::rights::{self, FdRights};
use crate::types::{Fd, Rights};
use crate::Error;
use std::sync::Arc;

/// The host state behind one guest instance.
///
/// All WASI calls take `&self`; the context is `Send + Sync` and may be shared
/// between as many host threads as the guest has.
pub struct WasiCtx {
    table: FdTable,
    pub(crate) trace_calls: bool,
}

impl WasiCtx {
    pub fn builder() -> WasiCtxBuilder {
        WasiCtxBuilder::new()
    }

    pub fn table(&self) -> &FdTable {
        &self.table
    }

    /// Open `file` at the next free descriptor.
    pub fn push_file(&self, file: Box<dyn WasiFile>, rights: FdRights) -> Result<Fd, Error> {
        self.table.open(NativeResource::File(file), rights)
    }

    /// Open a preopened directory at the next free descriptor.
    pub fn push_preopened_dir(
        &self,
        dir: Box<dyn WasiDir>,
        guest_path: impl Into<String>,
    ) -> Result<Fd, Error> {
        self.table.open(
            NativeResource::DirStack(DirStack::preopen(dir, guest_path)),
            FdRights::new(rights::DIRECTORY_BASE, rights::DIRECTORY_INHERITING),
        )
    }

    pub fn insert_socket(&self, fd: Fd, socket: Box<dyn WasiFile>) -> Result<(), Error> {
        self.table.insert_at(
            fd,
            NativeResource::Socket(socket),
            FdRights::new(rights::SOCKET_BASE, rights::SOCKET_INHERITING),
        )
    }

    pub fn set_stdin(&self, f: Arc<dyn WasiFile>) -> Result<(), Error> {
        self.insert_stdio(0, f, Rights::FD_WRITE)
    }

    pub fn set_stdout(&self, f: Arc<dyn WasiFile>) -> Result<(), Error> {
        self.insert_stdio(1, f, Rights::FD_READ)
    }

    pub fn set_stderr(&self, f: Arc<dyn WasiFile>) -> Result<(), Error> {
        self.insert_stdio(2, f, Rights::FD_READ)
    }

    fn insert_stdio(&self, fd: Fd, f: Arc<dyn WasiFile>, deny: Rights) -> Result<(), Error> {
        self.table.insert_at(
            fd,
            NativeResource::FileObserver(f),
            FdRights::from_base(rights::STDIO_BASE - deny),
        )
    }
}

/// Configure a [`WasiCtx`].
///
/// Stdio defaults to an empty stdin and discarding stdout/stderr. Preopened
/// directories are seated in the order given, right after stdio.
pub struct WasiCtxBuilder {
    stdin: Option<Arc<dyn WasiFile>>,
    stdout: Option<Arc<dyn WasiFile>>,
    stderr: Option<Arc<dyn WasiFile>>,
    preopens: Vec<(Box<dyn WasiDir>, String)>,
    sockets: Vec<(Fd, NativeResource)>,
    trace_calls: bool,
    built: bool,
}

impl WasiCtxBuilder {
    pub fn new() -> Self {
        WasiCtxBuilder {
            stdin: None,
            stdout: None,
            stderr: None,
            preopens: Vec::new(),
            sockets: Vec::new(),
            trace_calls: false,
            built: false,
        }
    }
    pub fn stdin(&mut self, f: Box<dyn WasiFile>) -> &mut Self {
        self.stdin = Some(Arc::from(f));
        self
    }
    pub fn stdout(&mut self, f: Box<dyn WasiFile>) -> &mut Self {
        self.stdout = Some(Arc::from(f));
        self
    }
    pub fn stderr(&mut self, f: Box<dyn WasiFile>) -> &mut Self {
        self.stderr = Some(Arc::from(f));
        self
    }
    pub fn inherit_stdin(&mut self) -> &mut Self {
        self.stdin(Box::new(crate::sync::stdio::stdin()))
    }
    pub fn inherit_stdout(&mut self) -> &mut Self {
        self.stdout(Box::new(crate::sync::stdio::stdout()))
    }
    pub fn inherit_stderr(&mut self) -> &mut Self {
        self.stderr(Box::new(crate::sync::stdio::stderr()))
    }
    pub fn inherit_stdio(&mut self) -> &mut Self {
        self.inherit_stdin().inherit_stdout().inherit_stderr()
    }
    pub fn preopened_dir(
        &mut self,
        dir: Box<dyn WasiDir>,
        guest_path: impl Into<String>,
    ) -> &mut Self {
        self.preopens.push((dir, guest_path.into()));
        self
    }
    /// Seat an owned socket at `fd`. Sockets are seated after preopens and
    /// replace anything already at that number.
    pub fn preopened_socket(&mut self, fd: Fd, socket: Box<dyn WasiFile>) -> &mut Self {
        self.sockets.push((fd, NativeResource::Socket(socket)));
        self
    }
    /// Seat a socket owned by the embedder at `fd`. Closing the descriptor
    /// leaves the host socket open.
    pub fn observed_socket(&mut self, fd: Fd, socket: Arc<dyn WasiFile>) -> &mut Self {
        self.sockets.push((fd, NativeResource::SocketObserver(socket)));
        self
    }
    /// Emit a `debug` event for every WASI call with its arguments and result.
    pub fn trace_calls(&mut self, enable: bool) -> &mut Self {
        self.trace_calls = enable;
        self
    }
    pub fn build(&mut self) -> Result<WasiCtx, Error> {
        assert!(!self.built, "WasiCtxBuilder::build called twice");
        self.built = true;

        let ctx = WasiCtx {
            table: FdTable::new(),
            trace_calls: self.trace_calls,
        };
        ctx.set_stdin(
            self.stdin
                .take()
                .unwrap_or_else(|| Arc::new(ReadPipe::new(std::io::empty()))),
        )?;
        ctx.set_stdout(
            self.stdout
                .take()
                .unwrap_or_else(|| Arc::new(WritePipe::new(std::io::sink()))),
        )?;
        ctx.set_stderr(
            self.stderr
                .take()
                .unwrap_or_else(|| Arc::new(WritePipe::new(std::io::sink()))),
        )?;
        for (dir, guest_path) in self.preopens.drain(..) {
            let fd = ctx.push_preopened_dir(dir, guest_path.as_str())?;
            tracing::debug!(fd, guest_path = %guest_path, "preopened directory");
        }
        for (fd, socket) in self.sockets.drain(..) {
            ctx.table.insert_at(
                fd,
                socket,
                FdRights::new(rights::SOCKET_BASE, rights::SOCKET_INHERITING),
            )?;
        }
        Ok(ctx)
    }
}

impl Default for WasiCtxBuilder {
    fn default() -> Self {
        Self::new()
    }
}
