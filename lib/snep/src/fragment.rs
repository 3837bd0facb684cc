//! Fragmentation engine shared by both protocol roles.
//!
//! A message no larger than the send MIU goes out in one piece. Anything
//! larger goes out as a first fragment, a wait for the peer's CONTINUE
//! control frame, then the remainder in back to back fragments. The
//! rules are symmetric between the roles; only the control frame codes
//! differ between the request and the response path.

use crate::wire::{self, HEADER_SIZE};
use llcp::logging;
use llcp::Socket;

/// The path a message travels. Decides which control frames the
/// receiving peer answers with: requests are acknowledged with response
/// frames and responses with request frames.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    /// Control frame the peer sends to ask for the remainder.
    #[inline]
    fn peer_continue(self) -> &'static [u8] {
        match self {
            Direction::Request => &wire::RESPONSE_CONTINUE,
            Direction::Response => &wire::REQUEST_CONTINUE,
        }
    }

    /// Control frame the peer sends to abort the transfer.
    #[inline]
    fn peer_reject(self) -> &'static [u8] {
        match self {
            Direction::Request => &wire::RESPONSE_REJECT,
            Direction::Response => &wire::REQUEST_REJECT,
        }
    }
}

/// Sends one message, fragmenting to the send MIU.
///
/// Returns false when the peer rejected the transfer, answered the first
/// fragment with anything other than its CONTINUE frame, or closed the
/// connection; no error is raised for those. Transport failures
/// propagate as errors.
pub fn send(
    socket: &mut dyn Socket,
    message: &[u8],
    send_miu: usize,
    direction: Direction,
    log: &logging::Logger,
) -> llcp::Result<bool> {
    if message.len() <= send_miu {
        socket.send(message)?;
        return Ok(true);
    }

    socket.send(&message[..send_miu])?;

    logging::trace!(log, "awaiting go-ahead for remaining fragments";
                    "context" => "send",
                    "size" => message.len(),
                    "send_miu" => send_miu);

    if !socket.poll_recv(None)? {
        return Ok(false);
    }

    let answer = match socket.recv()? {
        Some(answer) => answer,
        None => {
            logging::debug!(log, "peer closed during fragmented send"; "context" => "send");
            return Ok(false);
        }
    };

    if answer != direction.peer_continue() {
        if answer == direction.peer_reject() {
            logging::debug!(log, "peer rejected fragmented message"; "context" => "send");
        } else {
            logging::debug!(log, "unexpected answer to first fragment";
                            "context" => "send",
                            "size" => answer.len());
        }
        return Ok(false);
    }

    for fragment in message[send_miu..].chunks(send_miu) {
        socket.send(fragment)?;
    }

    Ok(true)
}

/// Accumulates fragments into `buffer` until it holds `length`
/// information octets past the header. The caller has already asked the
/// peer to continue. Returns false when the peer closes mid assembly.
pub fn recv_remainder(
    socket: &mut dyn Socket,
    buffer: &mut Vec<u8>,
    length: usize,
    log: &logging::Logger,
) -> llcp::Result<bool> {
    while buffer.len() - HEADER_SIZE < length {
        match socket.recv()? {
            Some(fragment) => buffer.extend_from_slice(&fragment),
            None => {
                logging::debug!(log, "peer closed during reassembly";
                                "context" => "recv",
                                "assembled" => buffer.len() - HEADER_SIZE,
                                "expected" => length);
                return Ok(false);
            }
        }
    }

    Ok(true)
}
