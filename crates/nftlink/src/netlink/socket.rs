//! Low-level async NETLINK_NETFILTER socket.
//!
//! Lifecycle: [`NetlinkSocket::open`] → [`NetlinkSocket::bind`] →
//! send/recv → [`NetlinkSocket::close`]. Operations on a socket that is not
//! bound, or already closed, fail with [`Error::TransportClosed`].

use netlink_sys::{Socket, SocketAddr, protocols};
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use super::error::{Error, Result};
use super::transport::Transport;

/// Where a [`NetlinkSocket`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Created, no port yet.
    Open,
    /// Bound to a kernel-assigned port.
    Bound {
        /// The assigned port id.
        port: u32,
    },
    /// Released.
    Closed,
}

/// Async netfilter netlink socket.
pub struct NetlinkSocket {
    /// The underlying async file descriptor; `None` once closed.
    fd: Option<AsyncFd<Socket>>,
    state: SocketState,
}

impl NetlinkSocket {
    /// Create a non-blocking socket on the netfilter netlink family.
    pub fn open() -> Result<Self> {
        let socket = Socket::new(protocols::NETLINK_NETFILTER).map_err(Error::TransportOpen)?;
        socket
            .set_non_blocking(true)
            .map_err(Error::TransportOpen)?;
        let fd = AsyncFd::new(socket).map_err(Error::TransportOpen)?;

        Ok(Self {
            fd: Some(fd),
            state: SocketState::Open,
        })
    }

    /// Open and bind in one step.
    pub fn connect() -> Result<Self> {
        let mut socket = Self::open()?;
        socket.bind()?;
        Ok(socket)
    }

    /// Bind to an automatically assigned port and return it.
    pub fn bind(&mut self) -> Result<u32> {
        match self.state {
            SocketState::Bound { port } => return Ok(port),
            SocketState::Closed => return Err(Error::TransportClosed),
            SocketState::Open => {}
        }
        let fd = self.fd.as_mut().ok_or(Error::TransportClosed)?;
        let socket = fd.get_mut();

        let mut addr = SocketAddr::new(0, 0);
        socket.bind(&addr).map_err(Error::Bind)?;
        socket.get_address(&mut addr).map_err(Error::Bind)?;
        let port = addr.port_number();

        // Extended ACKs give better kernel diagnostics; ignore if unsupported.
        socket.set_ext_ack(true).ok();

        tracing::trace!(port, "netfilter socket bound");
        self.state = SocketState::Bound { port };
        Ok(port)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Release the socket. A second call fails with [`Error::TransportClosed`].
    pub fn close(&mut self) -> Result<()> {
        match self.fd.take() {
            Some(fd) => {
                drop(fd);
                self.state = SocketState::Closed;
                Ok(())
            }
            None => Err(Error::TransportClosed),
        }
    }

    fn bound_fd(&self) -> Result<&AsyncFd<Socket>> {
        match (self.state, self.fd.as_ref()) {
            (SocketState::Bound { .. }, Some(fd)) => Ok(fd),
            _ => Err(Error::TransportClosed),
        }
    }

    /// Send a datagram.
    pub async fn send(&self, msg: &[u8]) -> Result<()> {
        let fd = self.bound_fd()?;
        loop {
            let mut guard = fd.ready(Interest::WRITABLE).await.map_err(Error::Send)?;

            match guard.try_io(|inner| inner.get_ref().send(msg, 0)) {
                Ok(result) => {
                    result.map_err(Error::Send)?;
                    return Ok(());
                }
                Err(_would_block) => continue,
            }
        }
    }

    /// Receive one datagram into `buf`, returning the number of bytes read.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let fd = self.bound_fd()?;
        loop {
            let mut guard = fd.ready(Interest::READABLE).await.map_err(Error::Recv)?;

            match guard.try_io(|inner| {
                let mut window: &mut [u8] = &mut buf[..];
                inner.get_ref().recv(&mut window, 0)
            }) {
                Ok(result) => return result.map_err(Error::Recv),
                Err(_would_block) => continue,
            }
        }
    }
}

impl Transport for NetlinkSocket {
    fn port(&self) -> u32 {
        match self.state {
            SocketState::Bound { port } => port,
            _ => 0,
        }
    }

    async fn send(&mut self, datagram: &[u8]) -> Result<()> {
        NetlinkSocket::send(self, datagram).await
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        NetlinkSocket::recv(self, buf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_socket_rejects_operations() {
        // Creating a netfilter socket needs no privileges; binding may be
        // restricted in sandboxes, so only exercise close semantics here.
        let Ok(mut socket) = NetlinkSocket::open() else {
            return;
        };
        assert_eq!(socket.state(), SocketState::Open);
        assert_eq!(Transport::port(&socket), 0);
        socket.close().unwrap();
        assert_eq!(socket.state(), SocketState::Closed);
        assert!(matches!(socket.close(), Err(Error::TransportClosed)));
        assert!(matches!(socket.bind(), Err(Error::TransportClosed)));
    }
}
