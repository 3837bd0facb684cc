//! Logical Link Control Protocol surface consumed by the SNEP crates.
//!
//! The chipset driver and the LLCP state machine itself live outside this
//! workspace. What the protocol layer needs is the connection-oriented
//! socket API, so that is what this crate defines: a [`LinkController`]
//! handle to an activated link and an object-safe [`Socket`] covering the
//! data-link-connection lifecycle. The [`loopback`] module provides a
//! complete in-memory link for tests and local demos.

pub mod logging;
pub mod loopback;

use std::fmt;
use std::time::Duration;

/// Data link MIU when no MIUX extension has been negotiated.
pub const DEFAULT_MIU: u32 = 128;
/// Largest MIU a peer can announce (128 plus the maximal MIUX value).
pub const MAX_MIU: u32 = 2175;
/// Receive window announced when `SO_RCVBUF` is left untouched.
pub const DEFAULT_RECV_WINDOW: u32 = 1;
/// Largest receive window the link layer can carry.
pub const MAX_RECV_WINDOW: u32 = 15;

/// Service access point address (a 6 bit space).
pub type Sap = u8;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    /// The link was torn down underneath the socket.
    Pipe,
    /// No service listens on the remote name, or its backlog is full.
    ConnectRefused,
    /// The operation requires a connected socket.
    NotConnected,
    /// The operation does not fit the socket's lifecycle state.
    InvalidState,
    /// The service name is already bound on this link.
    AddressInUse,
    /// The service data unit exceeds the MIU accepted by the peer.
    MessageSize,
    /// The socket kind or option is not supported by this link.
    NotSupported,
}

impl Error {
    /// True for the error an acceptor sees on ordinary link teardown.
    #[inline]
    pub fn is_pipe(&self) -> bool {
        *self == Error::Pipe
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            Error::Pipe => "broken link",
            Error::ConnectRefused => "connect refused",
            Error::NotConnected => "socket not connected",
            Error::InvalidState => "operation invalid in this socket state",
            Error::AddressInUse => "service name already bound",
            Error::MessageSize => "service data unit exceeds the send MIU",
            Error::NotSupported => "not supported by this link",
        };
        write!(f, "{}", text)
    }
}

impl std::error::Error for Error {}

/// LLCP socket types. SNEP only ever opens `DataLinkConnection` sockets.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SocketKind {
    LogicalDataLink,
    DataLinkConnection,
    Raw,
}

/// Socket options, mirroring `SO_RCVMIU`, `SO_RCVBUF` and `SO_SNDMIU`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SockOpt {
    RecvMiu,
    RecvBuf,
    SendMiu,
}

/// Handle to an activated LLCP link, used to open sockets on it.
pub trait LinkController: Send + Sync {
    fn socket(&self, kind: SocketKind) -> Result<Box<dyn Socket>>;
}

/// A connection-oriented LLCP socket.
///
/// Service data units are delivered whole and in order. `send` may block
/// on the peer's receive window, `recv` and `accept` block until data or
/// a connection arrives.
pub trait Socket: Send {
    /// Sets a socket option, returning the value the link accepted.
    fn setsockopt(&mut self, opt: SockOpt, value: u32) -> Result<u32>;

    /// Reads back a socket option.
    fn getsockopt(&self, opt: SockOpt) -> Result<u32>;

    /// Binds a service name, returning the local service access point.
    fn bind(&mut self, service_name: &str) -> Result<Sap>;

    /// Starts accepting connections, queueing at most `backlog` of them.
    fn listen(&mut self, backlog: usize) -> Result<()>;

    /// Blocks until a peer connects and returns the connection socket.
    fn accept(&mut self) -> Result<Box<dyn Socket>>;

    /// Opens a data link connection to the named remote service.
    fn connect(&mut self, service_name: &str) -> Result<()>;

    /// Sends one service data unit.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receives one service data unit; `None` once the peer has closed.
    fn recv(&mut self) -> Result<Option<Vec<u8>>>;

    /// Waits until `recv` would not block. Returns false on timeout; a
    /// `None` timeout waits indefinitely.
    fn poll_recv(&mut self, timeout: Option<Duration>) -> Result<bool>;

    fn local_sap(&self) -> Result<Sap>;

    fn peer_sap(&self) -> Result<Sap>;

    /// Closes the socket. Idempotent.
    fn close(&mut self);
}

impl fmt::Debug for dyn Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn Socket")
    }
}
