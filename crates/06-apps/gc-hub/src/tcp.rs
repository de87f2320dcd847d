//! Non-blocking `TcpStream` exposed as a byte-stream port.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bridges::ByteStreamPort;

const PEEK_WINDOW: usize = 512;
const WRITE_WINDOW: usize = 1024;

pub struct TcpPort {
    stream: TcpStream,
    closed: Arc<AtomicBool>,
}

impl TcpPort {
    /// Switches `stream` to non-blocking mode. The returned flag turns true
    /// once the peer disconnects or the socket fails.
    pub fn new(stream: TcpStream) -> std::io::Result<(Self, Arc<AtomicBool>)> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let closed = Arc::new(AtomicBool::new(false));
        let port = Self {
            stream,
            closed: Arc::clone(&closed),
        };
        Ok((port, closed))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn fail(&self, err: std::io::Error) -> usize {
        if err.kind() != ErrorKind::WouldBlock && err.kind() != ErrorKind::Interrupted {
            tracing::debug!(error = %err, "tcp client failed");
            self.closed.store(true, Ordering::Release);
        }
        0
    }
}

impl ByteStreamPort for TcpPort {
    fn available_for_write(&self) -> usize {
        if self.is_closed() {
            0
        } else {
            WRITE_WINDOW
        }
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        match self.stream.write(bytes) {
            Ok(n) => n,
            Err(err) => self.fail(err),
        }
    }

    fn available_to_read(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        let mut window = [0u8; PEEK_WINDOW];
        match self.stream.peek(&mut window) {
            Ok(0) => {
                self.closed.store(true, Ordering::Release);
                0
            }
            Ok(n) => n,
            Err(err) => self.fail(err),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        match self.stream.read(buf) {
            Ok(n) => n,
            Err(err) => self.fail(err),
        }
    }

    fn enable(&mut self) {}

    fn disable(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
