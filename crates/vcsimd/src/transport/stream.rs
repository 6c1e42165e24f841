//! Byte streams of accepted client connections.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// A connected client socket.
#[derive(Debug)]
pub(crate) enum ConnectionStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// Runs `$body` against whichever socket type `$stream` holds.
macro_rules! with_socket {
    ($stream:expr, $socket:ident => $body:expr) => {
        match $stream {
            ConnectionStream::Tcp($socket) => $body,
            #[cfg(unix)]
            ConnectionStream::Unix($socket) => $body,
        }
    };
}

impl ConnectionStream {
    /// Opens a second handle on the same socket.
    pub(crate) fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Tcp(socket) => socket.try_clone().map(Self::Tcp),
            #[cfg(unix)]
            Self::Unix(socket) => socket.try_clone().map(Self::Unix),
        }
    }

    /// Shuts both directions down; a peer or thread blocked on the socket
    /// sees end of stream.
    pub(crate) fn close(&self) -> io::Result<()> {
        let closed = with_socket!(self, socket => socket.shutdown(Shutdown::Both));
        match closed {
            Err(error) if error.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    /// Printable peer address for logs.
    pub(crate) fn peer(&self) -> String {
        match self {
            Self::Tcp(socket) => socket
                .peer_addr()
                .map_or_else(|_| "tcp client".to_owned(), |addr| addr.to_string()),
            #[cfg(unix)]
            Self::Unix(_) => "unix client".to_owned(),
        }
    }

    /// Restores blocking IO on a socket accepted from a non-blocking
    /// listener.
    pub(crate) fn into_blocking(self) -> io::Result<Self> {
        with_socket!(&self, socket => socket.set_nonblocking(false))?;
        Ok(self)
    }
}

impl Read for ConnectionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        with_socket!(self, socket => socket.read(buf))
    }
}

impl Write for ConnectionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        with_socket!(self, socket => socket.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        with_socket!(self, socket => socket.flush())
    }
}
