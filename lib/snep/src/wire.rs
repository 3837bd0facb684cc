//! SNEP wire format.
//!
//! Every PDU starts with a six octet header: version, an opcode or
//! status octet, and the big endian octet count of the information
//! field. The codec only frames and parses; whether a code octet is a
//! member of the opcode or status tables is the caller's concern.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

/// Version octet transmitted in every PDU (major 1, minor 0).
pub const VERSION: u8 = 0x10;
/// Major protocol version this implementation speaks.
pub const VERSION_MAJOR: u8 = 1;
/// Fixed header size in octets.
pub const HEADER_SIZE: usize = 6;

/// Request opcodes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Opcode {
    Continue = 0x00,
    Get = 0x01,
    Put = 0x02,
    Reject = 0x7F,
}

impl Opcode {
    #[inline]
    pub fn parse(value: u8) -> Option<Opcode> {
        match value {
            0x00 => Some(Opcode::Continue),
            0x01 => Some(Opcode::Get),
            0x02 => Some(Opcode::Put),
            0x7F => Some(Opcode::Reject),
            _ => None,
        }
    }
}

impl From<Opcode> for u8 {
    #[inline]
    fn from(opcode: Opcode) -> Self {
        opcode as u8
    }
}

/// Response status codes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Status {
    Continue = 0x80,
    Success = 0x81,
    NotFound = 0xC0,
    ExcessData = 0xC1,
    BadRequest = 0xC2,
    NotImplemented = 0xE0,
    UnsupportedVersion = 0xE1,
    Reject = 0xFF,
}

impl Status {
    #[inline]
    pub fn parse(value: u8) -> Option<Status> {
        match value {
            0x80 => Some(Status::Continue),
            0x81 => Some(Status::Success),
            0xC0 => Some(Status::NotFound),
            0xC1 => Some(Status::ExcessData),
            0xC2 => Some(Status::BadRequest),
            0xE0 => Some(Status::NotImplemented),
            0xE1 => Some(Status::UnsupportedVersion),
            0xFF => Some(Status::Reject),
            _ => None,
        }
    }
}

impl From<Status> for u8 {
    #[inline]
    fn from(status: Status) -> Self {
        status as u8
    }
}

// Header only control frames steering fragmented transfers. Requests are
// acknowledged with response frames and responses with request frames.

/// Client asks for the remaining response fragments.
pub const REQUEST_CONTINUE: [u8; HEADER_SIZE] = [VERSION, 0x00, 0x00, 0x00, 0x00, 0x00];
/// Client aborts the response transfer.
pub const REQUEST_REJECT: [u8; HEADER_SIZE] = [VERSION, 0x7F, 0x00, 0x00, 0x00, 0x00];
/// Server asks for the remaining request fragments.
pub const RESPONSE_CONTINUE: [u8; HEADER_SIZE] = [VERSION, 0x80, 0x00, 0x00, 0x00, 0x00];
/// Server refuses the announced request length.
pub const RESPONSE_REJECT: [u8; HEADER_SIZE] = [VERSION, 0xFF, 0x00, 0x00, 0x00, 0x00];

/// Decoded header. `code` carries the raw opcode or status octet.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Header {
    pub version: u8,
    pub code: u8,
    pub length: u32,
}

impl Header {
    #[inline]
    pub fn major(&self) -> u8 {
        self.version >> 4
    }

    #[inline]
    pub fn minor(&self) -> u8 {
        self.version & 0x0F
    }
}

/// Fewer than six octets where a header was expected.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TruncatedHeader;

/// Parses the six octet header off the front of a PDU.
#[inline]
pub fn decode_header(octets: &[u8]) -> Result<Header, TruncatedHeader> {
    if octets.len() < HEADER_SIZE {
        return Err(TruncatedHeader);
    }

    Ok(Header {
        version: octets[0],
        code: octets[1],
        length: BigEndian::read_u32(&octets[2..HEADER_SIZE]),
    })
}

/// Frames a request PDU.
pub fn encode_request(opcode: u8, information: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + information.len());

    frame.push(VERSION);
    frame.push(opcode);
    frame
        .write_u32::<BigEndian>(information.len() as u32)
        .expect("Error writing information length");
    frame.extend_from_slice(information);

    frame
}

/// Frames a GET request. The information field starts with the length
/// of the response the requester is willing to accept.
pub fn encode_get_request(acceptable_length: u32, information: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + 4 + information.len());

    frame.push(VERSION);
    frame.push(Opcode::Get.into());
    frame
        .write_u32::<BigEndian>(information.len() as u32 + 4)
        .expect("Error writing information length");
    frame
        .write_u32::<BigEndian>(acceptable_length)
        .expect("Error writing acceptable length");
    frame.extend_from_slice(information);

    frame
}

/// Frames a response PDU.
pub fn encode_response(status: u8, information: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + information.len());

    frame.push(VERSION);
    frame.push(status);
    frame
        .write_u32::<BigEndian>(information.len() as u32)
        .expect("Error writing information length");
    frame.extend_from_slice(information);

    frame
}
