//! Scripted socket shared by the unit tests.

use llcp::logging;
use llcp::{Error, Result, Sap, SockOpt, Socket};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub fn discard_log() -> logging::Logger {
    logging::Logger::root(logging::Discard, logging::o!())
}

#[derive(Default)]
struct MockState {
    incoming: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    closed: bool,
}

/// Data link connection with a scripted inbound queue and captured
/// outbound frames. Clones share state, so a test keeps one handle while
/// the component under test owns another. An exhausted inbound queue
/// reads as the peer having closed the connection.
#[derive(Clone)]
pub struct MockSocket {
    send_miu: u32,
    state: Arc<Mutex<MockState>>,
}

impl MockSocket {
    pub fn new(send_miu: u32) -> MockSocket {
        MockSocket {
            send_miu,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn queue(&self, frame: &[u8]) {
        self.lock().incoming.push_back(frame.to_vec());
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<MockState> {
        self.state.lock().unwrap()
    }
}

impl Socket for MockSocket {
    fn setsockopt(&mut self, _opt: SockOpt, value: u32) -> Result<u32> {
        Ok(value)
    }

    fn getsockopt(&self, opt: SockOpt) -> Result<u32> {
        match opt {
            SockOpt::SendMiu => Ok(self.send_miu),
            _ => Err(Error::NotSupported),
        }
    }

    fn bind(&mut self, _service_name: &str) -> Result<Sap> {
        Ok(4)
    }

    fn listen(&mut self, _backlog: usize) -> Result<()> {
        Ok(())
    }

    fn accept(&mut self) -> Result<Box<dyn Socket>> {
        Err(Error::Pipe)
    }

    fn connect(&mut self, _service_name: &str) -> Result<()> {
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.send_miu as usize {
            return Err(Error::MessageSize);
        }

        self.lock().sent.push(data.to_vec());
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.lock().incoming.pop_front())
    }

    fn poll_recv(&mut self, timeout: Option<Duration>) -> Result<bool> {
        let ready = !self.lock().incoming.is_empty();
        match timeout {
            Some(_) => Ok(ready),
            // Indefinite waits always end: with data, or with the close
            // that an empty queue stands for.
            None => Ok(true),
        }
    }

    fn local_sap(&self) -> Result<Sap> {
        Ok(32)
    }

    fn peer_sap(&self) -> Result<Sap> {
        Ok(4)
    }

    fn close(&mut self) {
        self.lock().closed = true;
    }
}
