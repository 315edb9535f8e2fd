// SPDX-License-Identifier: GPL-3.0-or-later

//! Cross-process wire transport for process-flavoured buffers.
//!
//! Generalises the teacher's `intercept::tcp`/`intercept::collector`/
//! `intercept::reporter` trio: a loopback TCP listener plays the
//! `CollectorOnTcp` role (the subscriber side of a process-flavoured
//! `Buffer`), and a connecting client plays the `ReporterOnTcp` role (a
//! publisher living in a different process than the buffer it publishes
//! into). Both sides speak the same length-prefixed JSON frame.

pub mod supervise;

use crate::error::TransportError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

/// Writes one length-prefixed JSON frame: a 4-byte big-endian length
/// followed by the `serde_json` encoding of `value`.
pub fn write_frame<T, W>(stream: &mut W, value: &T) -> Result<(), TransportError>
where
    T: Serialize,
    W: Write,
{
    let payload = serde_json::to_vec(value)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| TransportError::Io(std::io::Error::new(ErrorKind::InvalidData, "frame too large")))?;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(&payload)?;
    stream.flush()?;
    Ok(())
}

/// Reads one length-prefixed JSON frame. `Ok(None)` means the peer closed
/// the connection cleanly between frames (not mid-frame, which is an
/// `Io` error).
pub fn read_frame<T, R>(stream: &mut R) -> Result<Option<T>, TransportError>
where
    T: DeserializeOwned,
    R: Read,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok(Some(serde_json::from_slice(&payload)?))
}

/// The subscriber-side listener for a process-flavoured buffer.
///
/// Binds to an ephemeral loopback port; the bound address is handed to
/// would-be remote publishers (typically via a worker's spawn arguments)
/// so they can connect with [`RemoteEndpoint::connect`].
pub struct BufferListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl BufferListener {
    pub fn bind() -> Result<Self, TransportError> {
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        let addr = listener.local_addr()?;
        Ok(Self { listener, addr })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Blocks for the next inbound publisher connection.
    ///
    /// Mirrors `CollectorOnTcp`'s accept loop: the caller spawns one
    /// reader thread per accepted connection rather than this function
    /// looping internally, so the caller controls shutdown.
    pub fn accept(&self) -> Result<TcpStream, TransportError> {
        let (stream, _peer) = self.listener.accept()?;
        Ok(stream)
    }

    /// Unblocks a thread parked in `accept()` by connecting to ourselves.
    /// Used during buffer teardown; mirrors the teacher's use of a
    /// loopback "poison" connection to stop `CollectorOnTcp::collect`.
    pub fn wake_acceptor(&self) {
        let _ = TcpStream::connect(self.addr);
    }
}

/// A remote publisher connection: the client side of the wire protocol,
/// playing the role the teacher's `ReporterOnTcp` plays for a wrapper
/// process reporting a single event back to `bear`.
pub struct RemoteEndpoint {
    stream: TcpStream,
}

impl RemoteEndpoint {
    pub fn connect(addr: SocketAddr) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok();
        Ok(Self { stream })
    }

    pub fn send<T: Serialize>(&mut self, value: &T) -> Result<(), TransportError> {
        write_frame(&mut self.stream, value)
    }

    /// Reads one response frame off this connection. Used by request/
    /// response protocols layered on top of the otherwise fire-and-forget
    /// reporter role (e.g. `environment::SharedValue`'s get/set calls).
    pub fn read_response<T: DeserializeOwned>(&mut self) -> Result<T, TransportError> {
        read_frame(&mut self.stream)?.ok_or(TransportError::Disconnected)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_round_trips() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &("hello".to_string(), 42u32)).unwrap();
        let mut cursor = Cursor::new(buf);
        let (s, n): (String, u32) = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(s, "hello");
        assert_eq!(n, 42);
    }

    #[test]
    fn read_frame_on_clean_close_is_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let got: Option<String> = read_frame(&mut cursor).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn listener_accepts_over_loopback() {
        let listener = BufferListener::bind().unwrap();
        let addr = listener.addr();
        let handle = std::thread::spawn(move || {
            let stream = listener.accept().unwrap();
            let mut stream = stream;
            let msg: String = read_frame(&mut stream).unwrap().unwrap();
            assert_eq!(msg, "ping");
        });
        let mut client = RemoteEndpoint::connect(addr).unwrap();
        client.send(&"ping".to_string()).unwrap();
        handle.join().unwrap();
    }
}
