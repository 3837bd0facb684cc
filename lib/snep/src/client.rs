//! SNEP client: GET and PUT against a remote server.
//!
//! A client owns at most one data link connection at a time. Protocol
//! refusals from the peer surface as [`SnepError`]; transport level
//! failures collapse into the empty GET result or a false PUT result so
//! the caller can tell "peer said no" from "link broke" without an
//! error chain.

use crate::error::SnepError;
use crate::fragment::{self, Direction};
use crate::wire::{self, Opcode, Status, HEADER_SIZE};
use crate::SERVICE_NAME;
use llcp::logging;
use llcp::{LinkController, SockOpt, Socket, SocketKind};
use ndef::Record;
use std::sync::Arc;
use std::time::Duration;

/// Default GET request information: one empty NDEF record, the
/// placeholder standard servers accept.
pub const DEFAULT_GET_REQUEST: [u8; 3] = [0xD0, 0x00, 0x00];
/// Default bound on the response information a GET will accept.
pub const DEFAULT_ACCEPTABLE_LENGTH: u32 = 0x400;

pub struct SnepClient {
    link: Arc<dyn LinkController>,
    socket: Option<Box<dyn Socket>>,
    send_miu: usize,
    log: logging::Logger,
}

impl SnepClient {
    /// One poll for the first response frame before giving up.
    const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        link: Arc<dyn LinkController>,
        log: L,
    ) -> SnepClient {
        let client_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            None => logging::Logger::root(logging::Discard, logging::o!()),
        };

        SnepClient {
            link,
            socket: None,
            send_miu: llcp::DEFAULT_MIU as usize,
            log: client_log,
        }
    }

    /// Connects to the default SNEP service.
    pub fn connect(&mut self) -> llcp::Result<bool> {
        self.connect_to(SERVICE_NAME)
    }

    /// Opens a data link connection to the named service and records the
    /// send MIU. Returns false when the peer refused the connection.
    pub fn connect_to(&mut self, service_name: &str) -> llcp::Result<bool> {
        self.close();

        let mut socket = self.link.socket(SocketKind::DataLinkConnection)?;
        match socket.connect(service_name) {
            Ok(()) => (),
            Err(llcp::Error::ConnectRefused) => {
                logging::debug!(self.log, "connect refused";
                                "context" => "connect",
                                "service" => service_name);
                return Ok(false);
            }
            Err(err) => return Err(err),
        }

        self.send_miu = socket.getsockopt(SockOpt::SendMiu)? as usize;
        self.socket = Some(socket);

        logging::info!(self.log, "connected to snep service";
                       "context" => "connect",
                       "service" => service_name,
                       "send_miu" => self.send_miu);

        Ok(true)
    }

    /// Closes the data link connection. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
            logging::debug!(self.log, "connection closed"; "context" => "close");
        }
    }

    /// GET with the default request and acceptable length.
    pub fn get(&mut self) -> Result<Vec<u8>, SnepError> {
        self.get_octets(&DEFAULT_GET_REQUEST, DEFAULT_ACCEPTABLE_LENGTH)
    }

    /// Sends a GET and returns the response information field. The
    /// result is empty when no response arrived within the timeout or
    /// the transport failed underway.
    pub fn get_octets(
        &mut self,
        request: &[u8],
        acceptable_length: u32,
    ) -> Result<Vec<u8>, SnepError> {
        let send_miu = self.send_miu;
        let socket = match self.socket.as_mut() {
            Some(socket) => socket,
            None => {
                logging::debug!(self.log, "get without connection"; "context" => "get");
                return Ok(Vec::new());
            }
        };

        let request_pdu = wire::encode_get_request(acceptable_length, request);
        match fragment::send(socket.as_mut(), &request_pdu, send_miu, Direction::Request, &self.log)
        {
            Ok(true) => (),
            Ok(false) => return Ok(Vec::new()),
            Err(err) => {
                logging::debug!(self.log, "transport failure sending get";
                                "context" => "get",
                                "error" => %err);
                return Ok(Vec::new());
            }
        }

        let mut response = match Self::recv_first_frame(socket.as_mut(), &self.log) {
            Some(response) => response,
            None => return Ok(Vec::new()),
        };

        let header = match wire::decode_header(&response) {
            Ok(header) => header,
            Err(_) => {
                logging::debug!(self.log, "response fragment too short";
                                "context" => "get",
                                "size" => response.len());
                return Ok(Vec::new());
            }
        };

        if header.code != u8::from(Status::Success) {
            return Err(SnepError::from_status(header.code));
        }
        if header.length > acceptable_length {
            return Err(SnepError::ExcessData);
        }

        let length = header.length as usize;
        if response.len() - HEADER_SIZE < length {
            if let Err(err) = socket.send(&wire::REQUEST_CONTINUE) {
                logging::debug!(self.log, "transport failure requesting remainder";
                                "context" => "get",
                                "error" => %err);
                return Ok(Vec::new());
            }

            match fragment::recv_remainder(socket.as_mut(), &mut response, length, &self.log) {
                Ok(true) => (),
                Ok(false) => return Ok(Vec::new()),
                Err(err) => {
                    logging::debug!(self.log, "transport failure during reassembly";
                                    "context" => "get",
                                    "error" => %err);
                    return Ok(Vec::new());
                }
            }
        }

        Ok(response[HEADER_SIZE..HEADER_SIZE + length].to_vec())
    }

    /// Sends a PUT with the given information field. False means the
    /// transport failed before the server answered.
    pub fn put_octets(&mut self, request: &[u8]) -> Result<bool, SnepError> {
        let send_miu = self.send_miu;
        let socket = match self.socket.as_mut() {
            Some(socket) => socket,
            None => {
                logging::debug!(self.log, "put without connection"; "context" => "put");
                return Ok(false);
            }
        };

        let request_pdu = wire::encode_request(Opcode::Put.into(), request);
        match fragment::send(socket.as_mut(), &request_pdu, send_miu, Direction::Request, &self.log)
        {
            Ok(true) => (),
            Ok(false) => return Ok(false),
            Err(err) => {
                logging::debug!(self.log, "transport failure sending put";
                                "context" => "put",
                                "error" => %err);
                return Ok(false);
            }
        }

        let response = match Self::recv_first_frame(socket.as_mut(), &self.log) {
            Some(response) => response,
            None => return Ok(false),
        };

        let header = match wire::decode_header(&response) {
            Ok(header) => header,
            Err(_) => {
                logging::debug!(self.log, "response fragment too short";
                                "context" => "put",
                                "size" => response.len());
                return Ok(false);
            }
        };

        if header.code == u8::from(Status::Success) {
            Ok(true)
        } else {
            Err(SnepError::from_status(header.code))
        }
    }

    /// GET at the record level. A `None` request sends the default empty
    /// record placeholder. `None` comes back when the transport failed
    /// before a response arrived.
    pub fn get_records(
        &mut self,
        request: Option<&[Record]>,
    ) -> Result<Option<Vec<Record>>, SnepError> {
        let octets = match request {
            Some(records) => ndef::encode_message(records),
            None => DEFAULT_GET_REQUEST.to_vec(),
        };

        let response = self.get_octets(&octets, DEFAULT_ACCEPTABLE_LENGTH)?;
        if response.is_empty() {
            return Ok(None);
        }

        let records = ndef::decode_message(&response).map_err(|err| {
            logging::debug!(self.log, "response decode failed";
                            "context" => "get",
                            "error" => %err);
            SnepError::BadRequest
        })?;

        Ok(Some(records))
    }

    /// PUT at the record level.
    pub fn put_records(&mut self, records: &[Record]) -> Result<bool, SnepError> {
        self.put_octets(&ndef::encode_message(records))
    }

    fn recv_first_frame(socket: &mut dyn Socket, log: &logging::Logger) -> Option<Vec<u8>> {
        match socket.poll_recv(Some(Self::RESPONSE_TIMEOUT)) {
            Ok(true) => (),
            Ok(false) => {
                logging::debug!(log, "timeout waiting for response"; "context" => "recv");
                return None;
            }
            Err(err) => {
                logging::debug!(log, "transport failure polling response";
                                "context" => "recv",
                                "error" => %err);
                return None;
            }
        }

        match socket.recv() {
            Ok(Some(frame)) => Some(frame),
            Ok(None) => {
                logging::debug!(log, "connection closed by peer"; "context" => "recv");
                None
            }
            Err(err) => {
                logging::debug!(log, "transport failure receiving response";
                                "context" => "recv",
                                "error" => %err);
                None
            }
        }
    }
}

impl Drop for SnepClient {
    fn drop(&mut self) {
        self.close();
    }
}
