//! The request/response seam between nf_tables operations and a socket.

use std::future::Future;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::error::Result;

/// Upper bound on the receive buffer (libmnl's `MNL_SOCKET_BUFFER_SIZE`).
pub const MAX_RECV_BUFFER: usize = 8192;

static RECV_BUFFER_SIZE: LazyLock<usize> = LazyLock::new(|| page_size().min(MAX_RECV_BUFFER));

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        MAX_RECV_BUFFER
    }
}

/// Receive buffer size: `min(page size, 8192)`, computed once per process.
pub fn recv_buffer_size() -> usize {
    *RECV_BUFFER_SIZE
}

static SEQ: LazyLock<AtomicU32> = LazyLock::new(|| {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(1);
    AtomicU32::new(seed)
});

/// Hand out a fresh request sequence number.
///
/// Process-wide and monotonic, so concurrent operations never share one.
pub fn next_seq() -> u32 {
    SEQ.fetch_add(1, Ordering::Relaxed)
}

/// A bound netlink endpoint that moves whole datagrams.
///
/// [`NetlinkSocket`](super::NetlinkSocket) is the real implementation;
/// tests script one in memory.
pub trait Transport {
    /// Local port id the kernel addresses replies to.
    fn port(&self) -> u32;

    /// Transmit one fully framed datagram.
    fn send(&mut self, datagram: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Receive one datagram into `buf`.
    ///
    /// Returns the number of bytes read; `0` marks orderly end of stream.
    fn recv(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize>> + Send;
}
