//! NFC Data Exchange Format record codec.
//!
//! A message is a sequence of records framed by the `MB` and `ME` header
//! flags. The codec is strict: truncated input, stray framing flags,
//! chunked records and reserved type name formats are decode errors. The
//! protocol layer treats this crate as an opaque codec.

use bitflags::bitflags;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{self, Cursor, Read};

bitflags! {
    /// NDEF record header flag bits. The low three bits carry the TNF.
    pub struct RecordFlags: u8 {
        const MESSAGE_BEGIN = 0x80;
        const MESSAGE_END = 0x40;
        const CHUNK = 0x20;
        const SHORT_RECORD = 0x10;
        const ID_PRESENT = 0x08;
    }
}

const TNF_MASK: u8 = 0x07;

/// Type name format of a record.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Tnf {
    Empty = 0,
    WellKnown = 1,
    Media = 2,
    AbsoluteUri = 3,
    External = 4,
    Unknown = 5,
    Unchanged = 6,
}

impl Tnf {
    #[inline]
    pub fn parse(value: u8) -> Option<Tnf> {
        match value {
            0 => Some(Tnf::Empty),
            1 => Some(Tnf::WellKnown),
            2 => Some(Tnf::Media),
            3 => Some(Tnf::AbsoluteUri),
            4 => Some(Tnf::External),
            5 => Some(Tnf::Unknown),
            6 => Some(Tnf::Unchanged),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Record {
    pub tnf: Tnf,
    pub record_type: Vec<u8>,
    pub id: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Record {
    #[inline]
    pub fn new(tnf: Tnf, record_type: Vec<u8>, id: Vec<u8>, payload: Vec<u8>) -> Record {
        Record {
            tnf,
            record_type,
            id,
            payload,
        }
    }

    /// The empty record, `D0 00 00` on the wire.
    #[inline]
    pub fn empty() -> Record {
        Record::new(Tnf::Empty, Vec::new(), Vec::new(), Vec::new())
    }

    /// A well known text record. The payload status byte carries the
    /// language code length (UTF-8 encoding assumed).
    pub fn text(language: &str, text: &str) -> Record {
        let mut payload = Vec::with_capacity(1 + language.len() + text.len());
        payload.push(language.len() as u8);
        payload.extend_from_slice(language.as_bytes());
        payload.extend_from_slice(text.as_bytes());

        Record::new(Tnf::WellKnown, vec![b'T'], Vec::new(), payload)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DecodeError {
    EmptyMessage,
    Truncated,
    MissingMessageBegin,
    StrayMessageBegin,
    MissingMessageEnd,
    ChunkedRecord,
    ReservedTnf,
    TrailingData,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            DecodeError::EmptyMessage => "empty message",
            DecodeError::Truncated => "truncated record",
            DecodeError::MissingMessageBegin => "first record lacks the MB flag",
            DecodeError::StrayMessageBegin => "MB flag on a non-initial record",
            DecodeError::MissingMessageEnd => "message ends before an ME record",
            DecodeError::ChunkedRecord => "chunked records are not supported",
            DecodeError::ReservedTnf => "reserved type name format",
            DecodeError::TrailingData => "data after the terminal record",
        };
        write!(f, "{}", text)
    }
}

impl std::error::Error for DecodeError {}

impl From<io::Error> for DecodeError {
    #[inline]
    fn from(_: io::Error) -> Self {
        DecodeError::Truncated
    }
}

/// Decodes a complete message into its records.
pub fn decode_message(octets: &[u8]) -> Result<Vec<Record>, DecodeError> {
    if octets.is_empty() {
        return Err(DecodeError::EmptyMessage);
    }

    let mut stream = Cursor::new(octets);
    let mut records = Vec::new();

    loop {
        let (record, flags) = decode_record(&mut stream)?;

        if records.is_empty() {
            if !flags.contains(RecordFlags::MESSAGE_BEGIN) {
                return Err(DecodeError::MissingMessageBegin);
            }
        } else if flags.contains(RecordFlags::MESSAGE_BEGIN) {
            return Err(DecodeError::StrayMessageBegin);
        }

        records.push(record);

        if flags.contains(RecordFlags::MESSAGE_END) {
            if (stream.position() as usize) < octets.len() {
                return Err(DecodeError::TrailingData);
            }
            return Ok(records);
        }

        if stream.position() as usize == octets.len() {
            return Err(DecodeError::MissingMessageEnd);
        }
    }
}

fn decode_record(stream: &mut Cursor<&[u8]>) -> Result<(Record, RecordFlags), DecodeError> {
    let header = stream.read_u8()?;
    let flags = RecordFlags::from_bits_truncate(header);
    let tnf = Tnf::parse(header & TNF_MASK).ok_or(DecodeError::ReservedTnf)?;

    if flags.contains(RecordFlags::CHUNK) {
        return Err(DecodeError::ChunkedRecord);
    }

    let type_length = stream.read_u8()? as usize;
    let payload_length = if flags.contains(RecordFlags::SHORT_RECORD) {
        stream.read_u8()? as usize
    } else {
        stream.read_u32::<BigEndian>()? as usize
    };
    let id_length = if flags.contains(RecordFlags::ID_PRESENT) {
        stream.read_u8()? as usize
    } else {
        0
    };

    let record_type = read_field(stream, type_length)?;
    let id = read_field(stream, id_length)?;
    let payload = read_field(stream, payload_length)?;

    Ok((Record::new(tnf, record_type, id, payload), flags))
}

fn read_field(stream: &mut Cursor<&[u8]>, length: usize) -> Result<Vec<u8>, DecodeError> {
    let remaining = stream.get_ref().len() - stream.position() as usize;
    if length > remaining {
        return Err(DecodeError::Truncated);
    }

    let mut field = vec![0u8; length];
    stream.read_exact(&mut field)?;
    Ok(field)
}

/// Encodes records into one message. Short records are used whenever the
/// payload fits one length octet.
///
/// Panics if a record type or id exceeds the one octet length field.
pub fn encode_message(records: &[Record]) -> Vec<u8> {
    let mut octets = Vec::new();

    for (index, record) in records.iter().enumerate() {
        if record.record_type.len() > 0xFF {
            panic!("Record type length {} exceeds 255", record.record_type.len());
        }
        if record.id.len() > 0xFF {
            panic!("Record id length {} exceeds 255", record.id.len());
        }

        let short = record.payload.len() <= 0xFF;

        let mut flags = RecordFlags::empty();
        if index == 0 {
            flags |= RecordFlags::MESSAGE_BEGIN;
        }
        if index == records.len() - 1 {
            flags |= RecordFlags::MESSAGE_END;
        }
        if short {
            flags |= RecordFlags::SHORT_RECORD;
        }
        if !record.id.is_empty() {
            flags |= RecordFlags::ID_PRESENT;
        }

        octets.push(flags.bits() | record.tnf as u8);
        octets.push(record.record_type.len() as u8);

        if short {
            octets.push(record.payload.len() as u8);
        } else {
            octets
                .write_u32::<BigEndian>(record.payload.len() as u32)
                .expect("Error writing payload length");
        }
        if !record.id.is_empty() {
            octets.push(record.id.len() as u8);
        }

        octets.extend_from_slice(&record.record_type);
        octets.extend_from_slice(&record.id);
        octets.extend_from_slice(&record.payload);
    }

    octets
}
