//! SNEP server: acceptor and per connection request handling.
//!
//! The acceptor runs on a background thread and hands every accepted
//! data link connection to its own handler thread, so connections are
//! independent while requests within one connection stay strictly
//! serialized. Threads share nothing mutable beyond the handler the
//! application supplied.

use crate::callback::SnepHandler;
use crate::error::SnepError;
use crate::fragment::{self, Direction};
use crate::wire::{self, Opcode, Status, HEADER_SIZE};
use crate::SERVICE_NAME;
use byteorder::{BigEndian, ByteOrder};
use llcp::logging;
use llcp::{LinkController, SockOpt, Socket, SocketKind};
use serde_derive::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::thread;

/// Server tuning. The defaults announce a 1984 octet receive MIU with a
/// 15 frame receive window and accept requests up to one million
/// information octets.
#[derive(Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub service_name: String,
    pub max_acceptable_length: u32,
    pub recv_miu: u32,
    pub recv_buf: u32,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            service_name: SERVICE_NAME.to_string(),
            max_acceptable_length: 1_000_000,
            recv_miu: 1984,
            recv_buf: 15,
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> ServerConfig {
        serdeconv::from_toml_file(path).expect("Error loading snep server configuration file")
    }
}

pub struct SnepServer {
    socket: Option<Box<dyn Socket>>,
    handler: Arc<dyn SnepHandler>,
    max_acceptable_length: u32,
    log: logging::Logger,
}

impl SnepServer {
    const LISTEN_BACKLOG: usize = 2;

    /// Opens, configures, binds and listens the service socket. The
    /// acceptor starts with [`SnepServer::start`].
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        link: &dyn LinkController,
        config: &ServerConfig,
        handler: Arc<dyn SnepHandler>,
        log: L,
    ) -> llcp::Result<SnepServer> {
        let server_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            None => logging::Logger::root(logging::Discard, logging::o!()),
        };

        let mut socket = link.socket(SocketKind::DataLinkConnection)?;
        let recv_miu = socket.setsockopt(SockOpt::RecvMiu, config.recv_miu)?;
        let recv_buf = socket.setsockopt(SockOpt::RecvBuf, config.recv_buf)?;
        let sap = socket.bind(&config.service_name)?;
        socket.listen(Self::LISTEN_BACKLOG)?;

        logging::info!(server_log, "snep server bound";
                       "context" => "new",
                       "sap" => sap,
                       "recv_miu" => recv_miu,
                       "recv_buf" => recv_buf,
                       "max_acceptable_length" => config.max_acceptable_length);

        Ok(SnepServer {
            socket: Some(socket),
            handler,
            max_acceptable_length: config.max_acceptable_length,
            log: server_log,
        })
    }

    /// Replaces the handler. Connections accepted afterwards use the new
    /// one; already running connections keep the handler they started
    /// with.
    pub fn set_handler(&mut self, handler: Arc<dyn SnepHandler>) {
        self.handler = handler;
    }

    /// Runs the acceptor on a background thread.
    pub fn start(mut self) -> thread::JoinHandle<()> {
        let socket = self.socket.take().expect("Snep server already started");
        let handler = self.handler.clone();
        let max_acceptable_length = self.max_acceptable_length;
        let log = self.log.clone();

        thread::spawn(move || Self::listen(socket, handler, max_acceptable_length, log))
    }

    /// Accepts connections until the link fails, then closes the
    /// listening socket. Link teardown is the expected way out and logs
    /// quietly; anything else logs as an error.
    pub fn listen(
        mut socket: Box<dyn Socket>,
        handler: Arc<dyn SnepHandler>,
        max_acceptable_length: u32,
        log: logging::Logger,
    ) {
        loop {
            match socket.accept() {
                Ok(connection) => {
                    let handler = handler.clone();
                    let connection_log = log.new(logging::o!());

                    thread::spawn(move || {
                        Self::serve(connection, handler, max_acceptable_length, connection_log)
                    });
                }
                Err(err) => {
                    if err.is_pipe() {
                        logging::debug!(log, "accept loop stopped";
                                        "context" => "listen",
                                        "error" => %err);
                    } else {
                        logging::error!(log, "accept failed";
                                        "context" => "listen",
                                        "error" => %err);
                    }
                    break;
                }
            }
        }

        socket.close();
    }

    /// Drives one client connection and closes its socket on the way
    /// out, whatever the exit path.
    pub fn serve(
        mut socket: Box<dyn Socket>,
        handler: Arc<dyn SnepHandler>,
        max_acceptable_length: u32,
        log: logging::Logger,
    ) {
        if let Err(err) = Self::serve_loop(socket.as_mut(), &*handler, max_acceptable_length, &log)
        {
            if err.is_pipe() {
                logging::debug!(log, "connection dropped"; "context" => "serve", "error" => %err);
            } else {
                logging::error!(log, "connection failed"; "context" => "serve", "error" => %err);
            }
        }

        socket.close();
    }

    fn serve_loop(
        socket: &mut dyn Socket,
        handler: &dyn SnepHandler,
        max_acceptable_length: u32,
        log: &logging::Logger,
    ) -> llcp::Result<()> {
        let peer_sap = socket.peer_sap()?;
        let send_miu = socket.getsockopt(SockOpt::SendMiu)? as usize;

        logging::info!(log, "serving snep client";
                       "context" => "serve",
                       "peer_sap" => peer_sap,
                       "send_miu" => send_miu);

        loop {
            let mut request = match socket.recv()? {
                Some(request) => request,
                None => return Ok(()), // connection closed
            };

            let header = match wire::decode_header(&request) {
                Ok(header) => header,
                Err(_) => {
                    // Bail out, this is a bad client.
                    logging::debug!(log, "initial fragment too short";
                                    "context" => "serve",
                                    "size" => request.len());
                    return Ok(());
                }
            };

            if header.major() > wire::VERSION_MAJOR {
                logging::debug!(log, "unsupported version";
                                "context" => "serve",
                                "version" => header.major());
                socket.send(&wire::encode_response(Status::UnsupportedVersion.into(), &[]))?;
                continue;
            }

            if header.length > max_acceptable_length {
                logging::debug!(log, "request exceeds max acceptable length";
                                "context" => "serve",
                                "length" => header.length);
                socket.send(&wire::RESPONSE_REJECT)?;
                continue;
            }

            let length = header.length as usize;
            if request.len() - HEADER_SIZE < length {
                socket.send(&wire::RESPONSE_CONTINUE)?;
                if !fragment::recv_remainder(socket, &mut request, length, log)? {
                    return Ok(()); // connection closed mid assembly
                }
            }

            let response = match Opcode::parse(header.code) {
                Some(Opcode::Get) if request.len() >= HEADER_SIZE + 4 => {
                    Self::get_request(handler, &request, log)
                }
                Some(Opcode::Put) => Self::put_request(handler, &request, log),
                _ => {
                    logging::debug!(log, "bad request";
                                    "context" => "serve",
                                    "opcode" => header.code);
                    wire::encode_response(Status::BadRequest.into(), &[])
                }
            };

            if !fragment::send(socket, &response, send_miu, Direction::Response, log)? {
                // The peer declined the remainder; the request loop
                // keeps the connection.
                logging::debug!(log, "response abandoned"; "context" => "serve");
            }
        }
    }

    fn get_request(handler: &dyn SnepHandler, request: &[u8], log: &logging::Logger) -> Vec<u8> {
        let acceptable_length = BigEndian::read_u32(&request[HEADER_SIZE..HEADER_SIZE + 4]);
        let octets = &request[HEADER_SIZE + 4..];

        logging::debug!(log, "snep get";
                        "context" => "get",
                        "acceptable_length" => acceptable_length,
                        "size" => octets.len());

        let result = handler
            .get_octets(octets, acceptable_length)
            .and_then(|response| {
                if response.len() as u64 > u64::from(acceptable_length) {
                    Err(SnepError::ExcessData)
                } else {
                    Ok(response)
                }
            });

        match result {
            Ok(octets) => wire::encode_response(Status::Success.into(), &octets),
            Err(err) => {
                logging::debug!(log, "get refused";
                                "context" => "get",
                                "status" => err.code(),
                                "error" => %err);
                wire::encode_response(err.code(), &[])
            }
        }
    }

    fn put_request(handler: &dyn SnepHandler, request: &[u8], log: &logging::Logger) -> Vec<u8> {
        let octets = &request[HEADER_SIZE..];

        logging::debug!(log, "snep put"; "context" => "put", "size" => octets.len());

        match handler.put_octets(octets) {
            Ok(()) => wire::encode_response(Status::Success.into(), &[]),
            Err(err) => {
                logging::debug!(log, "put refused";
                                "context" => "put",
                                "status" => err.code(),
                                "error" => %err);
                wire::encode_response(err.code(), &[])
            }
        }
    }
}

impl Drop for SnepServer {
    fn drop(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::DefaultHandler;
    use crate::client::SnepClient;
    use crate::testing::{discard_log, MockSocket};
    use llcp::loopback::Link;
    use ndef::Record;
    use std::sync::Mutex;

    /// Stores PUT records and serves them back to GET.
    struct StoreHandler {
        records: Mutex<Vec<Record>>,
    }

    impl StoreHandler {
        fn new() -> StoreHandler {
            StoreHandler {
                records: Mutex::new(Vec::new()),
            }
        }
    }

    impl SnepHandler for StoreHandler {
        fn get_records(&self, _request_records: Vec<Record>) -> Result<Vec<Record>, SnepError> {
            Ok(self.records.lock().unwrap().clone())
        }

        fn put_records(&self, request_records: Vec<Record>) -> Result<(), SnepError> {
            *self.records.lock().unwrap() = request_records;
            Ok(())
        }
    }

    /// Counts PUT dispatches, keeping the octets of the last one.
    struct CountingHandler {
        puts: Mutex<Vec<Vec<u8>>>,
    }

    impl CountingHandler {
        fn new() -> CountingHandler {
            CountingHandler {
                puts: Mutex::new(Vec::new()),
            }
        }
    }

    impl SnepHandler for CountingHandler {
        fn put_octets(&self, request_octets: &[u8]) -> Result<(), SnepError> {
            self.puts.lock().unwrap().push(request_octets.to_vec());
            Ok(())
        }
    }

    fn run_serve_loop(socket: &MockSocket, handler: &dyn SnepHandler, max_acceptable_length: u32) {
        let mut connection = socket.clone();
        SnepServer::serve_loop(&mut connection, handler, max_acceptable_length, &discard_log())
            .unwrap();
    }

    #[test]
    fn test_default_get_returns_empty_record() {
        let socket = MockSocket::new(128);
        socket.queue(&[
            0x10, 0x01, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x04, 0x00, 0xD0, 0x00, 0x00,
        ]);

        let store = StoreHandler::new();
        store.put_records(vec![Record::empty()]).unwrap();
        run_serve_loop(&socket, &store, 1_000_000);

        assert_eq!(
            socket.sent(),
            vec![vec![0x10, 0x81, 0x00, 0x00, 0x00, 0x03, 0xD0, 0x00, 0x00]]
        );
    }

    #[test]
    fn test_put_dispatches_callback_once() {
        let socket = MockSocket::new(128);
        socket.queue(&[
            0x10, 0x02, 0x00, 0x00, 0x00, 0x08, 0xD1, 0x01, 0x04, 0x54, 0x02, 0x65, 0x6E, 0x61,
        ]);

        let handler = CountingHandler::new();
        run_serve_loop(&socket, &handler, 1_000_000);

        assert_eq!(
            socket.sent(),
            vec![vec![0x10, 0x81, 0x00, 0x00, 0x00, 0x00]]
        );
        assert_eq!(
            *handler.puts.lock().unwrap(),
            vec![vec![0xD1, 0x01, 0x04, 0x54, 0x02, 0x65, 0x6E, 0x61]]
        );
    }

    #[test]
    fn test_fragmented_request_dispatches_once_with_full_payload() {
        let socket = MockSocket::new(128);
        socket.queue(&[0x10, 0x02, 0x00, 0x00, 0x00, 0x08, 0xD1, 0x01, 0x04]);
        socket.queue(&[0x54, 0x02, 0x65, 0x6E, 0x61]);

        let handler = CountingHandler::new();
        run_serve_loop(&socket, &handler, 1_000_000);

        assert_eq!(socket.sent()[0], wire::RESPONSE_CONTINUE.to_vec());
        assert_eq!(socket.sent()[1], vec![0x10, 0x81, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(
            *handler.puts.lock().unwrap(),
            vec![vec![0xD1, 0x01, 0x04, 0x54, 0x02, 0x65, 0x6E, 0x61]]
        );
    }

    #[test]
    fn test_get_response_fragments_after_continue() {
        let socket = MockSocket::new(16);
        socket.queue(&[
            0x10, 0x01, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x04, 0x00, 0xD0, 0x00, 0x00,
        ]);
        socket.queue(&wire::REQUEST_CONTINUE);

        let store = StoreHandler::new();
        store
            .put_records(vec![Record::text("en", "0123456789")])
            .unwrap();
        run_serve_loop(&socket, &store, 1_000_000);

        let sent = socket.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[0],
            vec![
                0x10, 0x81, 0x00, 0x00, 0x00, 0x11, 0xD1, 0x01, 0x0D, 0x54, 0x02, 0x65, 0x6E,
                0x30, 0x31, 0x32
            ]
        );
        assert_eq!(sent[1], vec![0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39]);
    }

    #[test]
    fn test_get_response_withheld_without_continue() {
        let socket = MockSocket::new(16);
        socket.queue(&[
            0x10, 0x01, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x04, 0x00, 0xD0, 0x00, 0x00,
        ]);
        socket.queue(&wire::REQUEST_REJECT);

        let store = StoreHandler::new();
        store
            .put_records(vec![Record::text("en", "0123456789")])
            .unwrap();
        run_serve_loop(&socket, &store, 1_000_000);

        // Only the first fragment went out.
        assert_eq!(socket.sent().len(), 1);
    }

    #[test]
    fn test_unsupported_version_keeps_connection() {
        let socket = MockSocket::new(128);
        socket.queue(&[
            0x20, 0x01, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x04, 0x00, 0xD0, 0x00, 0x00,
        ]);
        socket.queue(&[
            0x10, 0x02, 0x00, 0x00, 0x00, 0x08, 0xD1, 0x01, 0x04, 0x54, 0x02, 0x65, 0x6E, 0x61,
        ]);

        let handler = CountingHandler::new();
        run_serve_loop(&socket, &handler, 1_000_000);

        assert_eq!(socket.sent()[0], vec![0x10, 0xE1, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(socket.sent()[1], vec![0x10, 0x81, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(handler.puts.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_length_above_limit_rejected() {
        let socket = MockSocket::new(128);
        socket.queue(&[
            0x10, 0x01, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x04, 0x00, 0xD0, 0x00, 0x00,
        ]);

        run_serve_loop(&socket, &DefaultHandler, 6);

        assert_eq!(
            socket.sent(),
            vec![vec![0x10, 0xFF, 0x00, 0x00, 0x00, 0x00]]
        );
    }

    #[test]
    fn test_default_get_not_implemented() {
        let socket = MockSocket::new(128);
        socket.queue(&[
            0x10, 0x01, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x04, 0x00, 0xD0, 0x00, 0x00,
        ]);

        run_serve_loop(&socket, &DefaultHandler, 1_000_000);

        assert_eq!(
            socket.sent(),
            vec![vec![0x10, 0xE0, 0x00, 0x00, 0x00, 0x00]]
        );
    }

    #[test]
    fn test_excess_response_reported() {
        let socket = MockSocket::new(2048);
        // Acceptable length of two octets; the echoed record is three.
        socket.queue(&[
            0x10, 0x01, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x00, 0x02, 0xD0, 0x00, 0x00,
        ]);

        let store = StoreHandler::new();
        store.put_records(vec![Record::empty()]).unwrap();
        run_serve_loop(&socket, &store, 1_000_000);

        assert_eq!(
            socket.sent(),
            vec![vec![0x10, 0xC1, 0x00, 0x00, 0x00, 0x00]]
        );
    }

    #[test]
    fn test_short_get_is_bad_request() {
        let socket = MockSocket::new(128);
        // GET whose information cannot hold the acceptable length field.
        socket.queue(&[0x10, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00]);

        run_serve_loop(&socket, &DefaultHandler, 1_000_000);

        assert_eq!(
            socket.sent(),
            vec![vec![0x10, 0xC2, 0x00, 0x00, 0x00, 0x00]]
        );
    }

    #[test]
    fn test_unknown_opcode_is_bad_request() {
        let socket = MockSocket::new(128);
        socket.queue(&[0x10, 0x55, 0x00, 0x00, 0x00, 0x00]);

        run_serve_loop(&socket, &DefaultHandler, 1_000_000);

        assert_eq!(
            socket.sent(),
            vec![vec![0x10, 0xC2, 0x00, 0x00, 0x00, 0x00]]
        );
    }

    #[test]
    fn test_short_initial_fragment_drops_client() {
        let socket = MockSocket::new(128);
        socket.queue(b"12345");

        run_serve_loop(&socket, &DefaultHandler, 1_000_000);

        assert!(socket.sent().is_empty());
    }

    #[test]
    fn test_close_mid_assembly_drops_client() {
        let socket = MockSocket::new(128);
        // Announces eight information octets but the peer closes after
        // the first fragment.
        socket.queue(&[0x10, 0x02, 0x00, 0x00, 0x00, 0x08, 0xD1, 0x01, 0x04]);

        let handler = CountingHandler::new();
        run_serve_loop(&socket, &handler, 1_000_000);

        assert_eq!(socket.sent(), vec![wire::RESPONSE_CONTINUE.to_vec()]);
        assert!(handler.puts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_end_to_end_over_loopback() {
        let link = Link::new(None);
        let store = Arc::new(StoreHandler::new());

        let config = ServerConfig {
            recv_miu: 64,
            ..ServerConfig::default()
        };
        let server = SnepServer::new(&link, &config, store.clone(), None).unwrap();
        let acceptor = server.start();

        let mut client = SnepClient::new(Arc::new(link.clone()), None);
        assert!(client.connect().unwrap());

        // Large enough that the request fragments at the 64 octet MIU
        // and the response at the client's default 128 octet MIU.
        let record = Record::text("en", &"x".repeat(180));
        assert!(client.put_records(&[record.clone()]).unwrap());

        let fetched = client.get_records(None).unwrap();
        assert_eq!(fetched, Some(vec![record]));

        client.close();
        link.close();
        acceptor.join().unwrap();
    }

    #[test]
    fn test_connect_refused_without_server() {
        let link = Link::new(None);
        let mut client = SnepClient::new(Arc::new(link), None);

        assert_eq!(client.connect().unwrap(), false);
    }
}
