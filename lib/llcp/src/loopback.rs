//! In-memory LLCP link.
//!
//! Implements the [`LinkController`]/[`Socket`] surface over bounded
//! channels so two peers in the same process can exchange service data
//! units. The receive window bounds the channel, so `send` blocks on flow
//! control the way a real link does, and each direction's MIU is the
//! receive MIU declared by the opposite socket.

use crate::logging;
use crate::{
    Error, LinkController, Result, Sap, SockOpt, Socket, SocketKind, DEFAULT_MIU,
    DEFAULT_RECV_WINDOW, MAX_MIU, MAX_RECV_WINDOW,
};
use hashbrown::HashMap;
use std::mem;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

/// Well known service access point of "urn:nfc:sn:snep".
const SNEP_SAP: Sap = 4;
const SNEP_SERVICE_NAME: &str = "urn:nfc:sn:snep";

// SAP ranges: 0-15 well known, 16-31 named services, 32-63 client sockets.
const FIRST_SERVICE_SAP: Sap = 16;
const FIRST_CLIENT_SAP: Sap = 32;
const LAST_CLIENT_SAP: Sap = 63;

/// An activated in-memory link. Cheap to clone; all clones share the
/// service registry. [`Link::close`] models link teardown.
#[derive(Clone)]
pub struct Link {
    state: Arc<Mutex<LinkState>>,
    log: logging::Logger,
}

struct LinkState {
    closed: bool,
    next_service_sap: Sap,
    next_client_sap: Sap,
    services: HashMap<String, ServiceEntry>,
}

struct ServiceEntry {
    sap: Sap,
    recv_miu: u32,
    recv_buf: u32,
    queue: Option<SyncSender<Endpoint>>,
}

/// One side of an established data link connection.
struct Endpoint {
    tx: SyncSender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    send_miu: u32,
    local_sap: Sap,
    peer_sap: Sap,
    // Service data unit surfaced by poll_recv but not yet consumed.
    pending: Option<Vec<u8>>,
}

impl Link {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(log: L) -> Link {
        let link_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            None => logging::Logger::root(logging::Discard, logging::o!()),
        };

        Link {
            state: Arc::new(Mutex::new(LinkState {
                closed: false,
                next_service_sap: FIRST_SERVICE_SAP,
                next_client_sap: FIRST_CLIENT_SAP,
                services: HashMap::new(),
            })),
            log: link_log,
        }
    }

    /// Tears the link down. Listening sockets see `Error::Pipe` on their
    /// next accept, new binds and connects are refused.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.services.clear();

        logging::debug!(self.log, "link closed"; "context" => "close");
    }

    fn lock(&self) -> std::sync::MutexGuard<LinkState> {
        self.state.lock().expect("Link registry lock poisoned")
    }

    fn bind(&self, service_name: &str) -> Result<Sap> {
        let mut state = self.lock();

        if state.closed {
            return Err(Error::Pipe);
        }
        if state.services.contains_key(service_name) {
            return Err(Error::AddressInUse);
        }

        let sap = state.allocate_service_sap(service_name);
        state.services.insert(
            service_name.to_string(),
            ServiceEntry {
                sap,
                recv_miu: DEFAULT_MIU,
                recv_buf: DEFAULT_RECV_WINDOW,
                queue: None,
            },
        );

        logging::debug!(self.log, "service bound";
                        "context" => "bind",
                        "service" => service_name,
                        "sap" => sap);

        Ok(sap)
    }

    fn listen(
        &self,
        service_name: &str,
        recv_miu: u32,
        recv_buf: u32,
        backlog: usize,
    ) -> Result<Receiver<Endpoint>> {
        let mut state = self.lock();

        if state.closed {
            return Err(Error::Pipe);
        }

        let (tx, rx) = mpsc::sync_channel(backlog.max(1));
        let entry = state.services.get_mut(service_name).ok_or(Error::Pipe)?;
        entry.recv_miu = recv_miu;
        entry.recv_buf = recv_buf;
        entry.queue = Some(tx);

        Ok(rx)
    }

    fn connect(&self, service_name: &str, recv_miu: u32, recv_buf: u32) -> Result<Endpoint> {
        let mut state = self.lock();

        if state.closed {
            return Err(Error::ConnectRefused);
        }

        let (queue, service_sap, service_miu, service_buf) = {
            let entry = state.services.get(service_name).ok_or(Error::ConnectRefused)?;
            let queue = entry.queue.as_ref().ok_or(Error::ConnectRefused)?.clone();
            (queue, entry.sap, entry.recv_miu, entry.recv_buf)
        };

        let client_sap = state.allocate_client_sap();

        let (c2s_tx, c2s_rx) = mpsc::sync_channel(service_buf.max(1) as usize);
        let (s2c_tx, s2c_rx) = mpsc::sync_channel(recv_buf.max(1) as usize);

        let service_end = Endpoint {
            tx: s2c_tx,
            rx: c2s_rx,
            send_miu: recv_miu,
            local_sap: service_sap,
            peer_sap: client_sap,
            pending: None,
        };
        let client_end = Endpoint {
            tx: c2s_tx,
            rx: s2c_rx,
            send_miu: service_miu,
            local_sap: client_sap,
            peer_sap: service_sap,
            pending: None,
        };

        match queue.try_send(service_end) {
            Ok(()) => {
                logging::debug!(self.log, "connection established";
                                "context" => "connect",
                                "service" => service_name,
                                "local_sap" => client_sap,
                                "remote_sap" => service_sap);
                Ok(client_end)
            }
            // A full backlog and a closed listener both look like a DM
            // with a refused reason to the connecting peer.
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                Err(Error::ConnectRefused)
            }
        }
    }

    fn unbind(&self, service_name: &str) {
        self.lock().services.remove(service_name);
    }
}

impl LinkState {
    fn allocate_service_sap(&mut self, service_name: &str) -> Sap {
        if service_name == SNEP_SERVICE_NAME
            && self.services.values().all(|entry| entry.sap != SNEP_SAP)
        {
            return SNEP_SAP;
        }

        let sap = self.next_service_sap;
        self.next_service_sap += 1;
        sap
    }

    fn allocate_client_sap(&mut self) -> Sap {
        if self.next_client_sap > LAST_CLIENT_SAP {
            self.next_client_sap = FIRST_CLIENT_SAP;
        }

        let sap = self.next_client_sap;
        self.next_client_sap += 1;
        sap
    }
}

impl LinkController for Link {
    fn socket(&self, kind: SocketKind) -> Result<Box<dyn Socket>> {
        if kind != SocketKind::DataLinkConnection {
            return Err(Error::NotSupported);
        }

        Ok(Box::new(LoopbackSocket {
            link: self.clone(),
            log: self.log.new(logging::o!()),
            recv_miu: DEFAULT_MIU,
            recv_buf: DEFAULT_RECV_WINDOW,
            state: State::Fresh,
        }))
    }
}

enum State {
    Fresh,
    Bound { service_name: String, sap: Sap },
    Listening { service_name: String, sap: Sap, backlog: Receiver<Endpoint> },
    Connected(Endpoint),
    Closed,
}

pub struct LoopbackSocket {
    link: Link,
    log: logging::Logger,
    recv_miu: u32,
    recv_buf: u32,
    state: State,
}

impl LoopbackSocket {
    fn endpoint(&mut self) -> Result<&mut Endpoint> {
        match &mut self.state {
            State::Connected(endpoint) => Ok(endpoint),
            _ => Err(Error::NotConnected),
        }
    }
}

impl Socket for LoopbackSocket {
    fn setsockopt(&mut self, opt: SockOpt, value: u32) -> Result<u32> {
        match self.state {
            State::Fresh | State::Bound { .. } => (),
            _ => return Err(Error::InvalidState),
        }

        match opt {
            SockOpt::RecvMiu => {
                self.recv_miu = value.min(MAX_MIU);
                Ok(self.recv_miu)
            }
            SockOpt::RecvBuf => {
                self.recv_buf = value.max(1).min(MAX_RECV_WINDOW);
                Ok(self.recv_buf)
            }
            // The send MIU is announced by the peer, not configured.
            SockOpt::SendMiu => Err(Error::NotSupported),
        }
    }

    fn getsockopt(&self, opt: SockOpt) -> Result<u32> {
        match opt {
            SockOpt::RecvMiu => Ok(self.recv_miu),
            SockOpt::RecvBuf => Ok(self.recv_buf),
            SockOpt::SendMiu => match &self.state {
                State::Connected(endpoint) => Ok(endpoint.send_miu),
                _ => Err(Error::NotConnected),
            },
        }
    }

    fn bind(&mut self, service_name: &str) -> Result<Sap> {
        match self.state {
            State::Fresh => (),
            _ => return Err(Error::InvalidState),
        }

        let sap = self.link.bind(service_name)?;
        self.state = State::Bound {
            service_name: service_name.to_string(),
            sap,
        };

        Ok(sap)
    }

    fn listen(&mut self, backlog: usize) -> Result<()> {
        let (service_name, sap) = match &self.state {
            State::Bound { service_name, sap } => (service_name.clone(), *sap),
            _ => return Err(Error::InvalidState),
        };

        let queue = self
            .link
            .listen(&service_name, self.recv_miu, self.recv_buf, backlog)?;

        self.state = State::Listening {
            service_name,
            sap,
            backlog: queue,
        };

        Ok(())
    }

    fn accept(&mut self) -> Result<Box<dyn Socket>> {
        let backlog = match &self.state {
            State::Listening { backlog, .. } => backlog,
            _ => return Err(Error::InvalidState),
        };

        match backlog.recv() {
            Ok(endpoint) => Ok(Box::new(LoopbackSocket {
                link: self.link.clone(),
                log: self.log.new(logging::o!()),
                recv_miu: self.recv_miu,
                recv_buf: self.recv_buf,
                state: State::Connected(endpoint),
            })),
            Err(_) => Err(Error::Pipe),
        }
    }

    fn connect(&mut self, service_name: &str) -> Result<()> {
        match self.state {
            State::Fresh => (),
            _ => return Err(Error::InvalidState),
        }

        let endpoint = self.link.connect(service_name, self.recv_miu, self.recv_buf)?;
        self.state = State::Connected(endpoint);

        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let endpoint = self.endpoint()?;

        if data.len() > endpoint.send_miu as usize {
            return Err(Error::MessageSize);
        }

        endpoint.tx.send(data.to_vec()).map_err(|_| Error::Pipe)
    }

    fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        let endpoint = self.endpoint()?;

        if let Some(data) = endpoint.pending.take() {
            return Ok(Some(data));
        }

        match endpoint.rx.recv() {
            Ok(data) => Ok(Some(data)),
            // All senders gone means the peer closed the connection.
            Err(_) => Ok(None),
        }
    }

    fn poll_recv(&mut self, timeout: Option<Duration>) -> Result<bool> {
        let endpoint = self.endpoint()?;

        if endpoint.pending.is_some() {
            return Ok(true);
        }

        match timeout {
            Some(timeout) => match endpoint.rx.recv_timeout(timeout) {
                Ok(data) => {
                    endpoint.pending = Some(data);
                    Ok(true)
                }
                Err(RecvTimeoutError::Timeout) => Ok(false),
                // Readable in the EOF sense: recv will report the close.
                Err(RecvTimeoutError::Disconnected) => Ok(true),
            },
            None => match endpoint.rx.recv() {
                Ok(data) => {
                    endpoint.pending = Some(data);
                    Ok(true)
                }
                Err(_) => Ok(true),
            },
        }
    }

    fn local_sap(&self) -> Result<Sap> {
        match &self.state {
            State::Connected(endpoint) => Ok(endpoint.local_sap),
            State::Bound { sap, .. } | State::Listening { sap, .. } => Ok(*sap),
            _ => Err(Error::NotConnected),
        }
    }

    fn peer_sap(&self) -> Result<Sap> {
        match &self.state {
            State::Connected(endpoint) => Ok(endpoint.peer_sap),
            _ => Err(Error::NotConnected),
        }
    }

    fn close(&mut self) {
        match mem::replace(&mut self.state, State::Closed) {
            State::Bound { service_name, .. } | State::Listening { service_name, .. } => {
                self.link.unbind(&service_name);
            }
            _ => (),
        }
    }
}

impl Drop for LoopbackSocket {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener(link: &Link, service_name: &str) -> Box<dyn Socket> {
        let mut socket = link.socket(SocketKind::DataLinkConnection).unwrap();
        socket.bind(service_name).unwrap();
        socket.listen(2).unwrap();
        socket
    }

    fn client(link: &Link, service_name: &str) -> Box<dyn Socket> {
        let mut socket = link.socket(SocketKind::DataLinkConnection).unwrap();
        socket.connect(service_name).unwrap();
        socket
    }

    #[test]
    fn test_connect_accept_roundtrip() {
        let link = Link::new(None);
        let mut listener = listener(&link, "urn:nfc:sn:snep");
        let mut client = client(&link, "urn:nfc:sn:snep");

        let mut service = listener.accept().unwrap();

        client.send(b"ping").unwrap();
        assert_eq!(service.recv().unwrap(), Some(b"ping".to_vec()));

        service.send(b"pong").unwrap();
        assert_eq!(client.recv().unwrap(), Some(b"pong".to_vec()));
    }

    #[test]
    fn test_snep_name_gets_well_known_sap() {
        let link = Link::new(None);
        let mut socket = link.socket(SocketKind::DataLinkConnection).unwrap();

        assert_eq!(socket.bind("urn:nfc:sn:snep").unwrap(), 4);
    }

    #[test]
    fn test_other_names_get_dynamic_saps() {
        let link = Link::new(None);
        let mut socket = link.socket(SocketKind::DataLinkConnection).unwrap();

        assert_eq!(socket.bind("urn:nfc:xsn:example.com:snep").unwrap(), 16);
    }

    #[test]
    fn test_connect_unbound_name_refused() {
        let link = Link::new(None);
        let mut socket = link.socket(SocketKind::DataLinkConnection).unwrap();

        assert_eq!(
            socket.connect("urn:nfc:sn:snep").unwrap_err(),
            Error::ConnectRefused
        );
    }

    #[test]
    fn test_double_bind_refused() {
        let link = Link::new(None);
        let _listener = listener(&link, "urn:nfc:sn:snep");

        let mut other = link.socket(SocketKind::DataLinkConnection).unwrap();
        assert_eq!(other.bind("urn:nfc:sn:snep").unwrap_err(), Error::AddressInUse);
    }

    #[test]
    fn test_backlog_overflow_refused() {
        let link = Link::new(None);
        let mut socket = link.socket(SocketKind::DataLinkConnection).unwrap();
        socket.bind("urn:nfc:sn:snep").unwrap();
        socket.listen(1).unwrap();

        let _first = client(&link, "urn:nfc:sn:snep");

        let mut second = link.socket(SocketKind::DataLinkConnection).unwrap();
        assert_eq!(
            second.connect("urn:nfc:sn:snep").unwrap_err(),
            Error::ConnectRefused
        );
    }

    #[test]
    fn test_send_miu_is_peer_recv_miu() {
        let link = Link::new(None);
        let mut socket = link.socket(SocketKind::DataLinkConnection).unwrap();
        assert_eq!(socket.setsockopt(SockOpt::RecvMiu, 1984).unwrap(), 1984);
        socket.bind("urn:nfc:sn:snep").unwrap();
        socket.listen(2).unwrap();

        let client = client(&link, "urn:nfc:sn:snep");
        let service = socket.accept().unwrap();

        assert_eq!(client.getsockopt(SockOpt::SendMiu).unwrap(), 1984);
        assert_eq!(service.getsockopt(SockOpt::SendMiu).unwrap(), DEFAULT_MIU);
    }

    #[test]
    fn test_recv_miu_capped() {
        let link = Link::new(None);
        let mut socket = link.socket(SocketKind::DataLinkConnection).unwrap();

        assert_eq!(socket.setsockopt(SockOpt::RecvMiu, 100_000).unwrap(), MAX_MIU);
    }

    #[test]
    fn test_oversize_sdu_rejected() {
        let link = Link::new(None);
        let mut listener = listener(&link, "urn:nfc:sn:snep");
        let mut client = client(&link, "urn:nfc:sn:snep");
        let _service = listener.accept().unwrap();

        let oversize = vec![0u8; DEFAULT_MIU as usize + 1];
        assert_eq!(client.send(&oversize).unwrap_err(), Error::MessageSize);
    }

    #[test]
    fn test_poll_recv_timeout() {
        let link = Link::new(None);
        let mut listener = listener(&link, "urn:nfc:sn:snep");
        let mut client = client(&link, "urn:nfc:sn:snep");
        let _service = listener.accept().unwrap();

        let ready = client.poll_recv(Some(Duration::from_millis(5))).unwrap();
        assert!(!ready);
    }

    #[test]
    fn test_poll_recv_buffers_one_sdu() {
        let link = Link::new(None);
        let mut listener = listener(&link, "urn:nfc:sn:snep");
        let mut client = client(&link, "urn:nfc:sn:snep");
        let mut service = listener.accept().unwrap();

        service.send(b"data").unwrap();

        assert!(client.poll_recv(Some(Duration::from_millis(100))).unwrap());
        assert_eq!(client.recv().unwrap(), Some(b"data".to_vec()));
    }

    #[test]
    fn test_recv_after_peer_close() {
        let link = Link::new(None);
        let mut listener = listener(&link, "urn:nfc:sn:snep");
        let client = client(&link, "urn:nfc:sn:snep");
        let mut service = listener.accept().unwrap();

        drop(client);

        assert_eq!(service.recv().unwrap(), None);
    }

    #[test]
    fn test_link_close_breaks_accept() {
        let link = Link::new(None);
        let mut listener = listener(&link, "urn:nfc:sn:snep");

        link.close();

        assert_eq!(listener.accept().unwrap_err(), Error::Pipe);
    }

    #[test]
    fn test_link_close_refuses_connect() {
        let link = Link::new(None);
        let _listener = listener(&link, "urn:nfc:sn:snep");

        link.close();

        let mut socket = link.socket(SocketKind::DataLinkConnection).unwrap();
        assert_eq!(
            socket.connect("urn:nfc:sn:snep").unwrap_err(),
            Error::ConnectRefused
        );
    }

    #[test]
    fn test_send_unconnected() {
        let link = Link::new(None);
        let mut socket = link.socket(SocketKind::DataLinkConnection).unwrap();

        assert_eq!(socket.send(b"data").unwrap_err(), Error::NotConnected);
    }
}
