//! Pluggable request handlers.

use crate::error::SnepError;
use ndef::Record;

/// Application surface of a SNEP server.
///
/// The octet level hooks default to decoding the request and delegating
/// to the record level hooks, so an implementation overrides whichever
/// level fits. Overriding only `get_records` keeps the default decode
/// and encode around it; overriding `get_octets` takes over the raw
/// information field entirely. Handlers are shared across connection
/// threads, so any mutable state they carry is theirs to synchronize.
pub trait SnepHandler: Send + Sync {
    /// Raw GET handler. `acceptable_length` bounds the response the
    /// requester will accept; returning more is answered with the
    /// excess data status.
    fn get_octets(
        &self,
        request_octets: &[u8],
        acceptable_length: u32,
    ) -> Result<Vec<u8>, SnepError> {
        let _ = acceptable_length;
        let records =
            ndef::decode_message(request_octets).map_err(|_| SnepError::BadRequest)?;
        let response = self.get_records(records)?;
        Ok(ndef::encode_message(&response))
    }

    /// Raw PUT handler.
    fn put_octets(&self, request_octets: &[u8]) -> Result<(), SnepError> {
        let records =
            ndef::decode_message(request_octets).map_err(|_| SnepError::BadRequest)?;
        self.put_records(records)
    }

    /// Record level GET handler. The default refuses with the not
    /// implemented status.
    fn get_records(&self, _request_records: Vec<Record>) -> Result<Vec<Record>, SnepError> {
        Err(SnepError::NotImplemented)
    }

    /// Record level PUT handler. The default accepts and discards.
    fn put_records(&self, _request_records: Vec<Record>) -> Result<(), SnepError> {
        Ok(())
    }
}

/// Handler with every hook at its default.
pub struct DefaultHandler;

impl SnepHandler for DefaultHandler {}
