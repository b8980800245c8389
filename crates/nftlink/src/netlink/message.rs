//! Netlink message header and parsing.

use super::error::{Error, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Netlink message header alignment.
pub const NLMSG_ALIGNTO: usize = 4;

/// Align a length to NLMSG_ALIGNTO boundary.
#[inline]
pub const fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

/// Size of the netlink message header.
pub const NLMSG_HDRLEN: usize = nlmsg_align(std::mem::size_of::<NlMsgHdr>());

/// Netlink message header (mirrors struct nlmsghdr).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlMsgHdr {
    /// Length of message including header.
    pub nlmsg_len: u32,
    /// Message type.
    pub nlmsg_type: u16,
    /// Additional flags.
    pub nlmsg_flags: u16,
    /// Sequence number.
    pub nlmsg_seq: u32,
    /// Sending process port ID.
    pub nlmsg_pid: u32,
}

impl NlMsgHdr {
    /// Create a new message header.
    pub fn new(msg_type: u16, flags: u16) -> Self {
        Self {
            nlmsg_len: NLMSG_HDRLEN as u32,
            nlmsg_type: msg_type,
            nlmsg_flags: flags,
            nlmsg_seq: 0,
            nlmsg_pid: 0,
        }
    }

    /// Check if this is an error message.
    pub fn is_error(&self) -> bool {
        self.nlmsg_type == NlMsgType::ERROR
    }

    /// Check if this is a done message.
    pub fn is_done(&self) -> bool {
        self.nlmsg_type == NlMsgType::DONE
    }

    /// Check if this message has the multi flag.
    pub fn is_multi(&self) -> bool {
        self.nlmsg_flags & NLM_F_MULTI != 0
    }

    /// Convert header to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse header from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::read_from_prefix(data)
            .map(|(hdr, _)| hdr)
            .map_err(|_| {
                Error::MalformedEnvelope(format!(
                    "header needs {} bytes, got {}",
                    NLMSG_HDRLEN,
                    data.len()
                ))
            })
    }
}

/// Standard netlink control message types.
pub struct NlMsgType;

impl NlMsgType {
    /// No operation, message must be discarded.
    pub const NOOP: u16 = 1;
    /// Error message or ACK.
    pub const ERROR: u16 = 2;
    /// End of multipart message.
    pub const DONE: u16 = 3;
    /// Data lost, request resend.
    pub const OVERRUN: u16 = 4;
}

/// Netlink message flags.
pub const NLM_F_REQUEST: u16 = 0x01;
pub const NLM_F_MULTI: u16 = 0x02;
pub const NLM_F_ACK: u16 = 0x04;
pub const NLM_F_ECHO: u16 = 0x08;
pub const NLM_F_DUMP_INTR: u16 = 0x10;

// Modifiers to GET request
pub const NLM_F_ROOT: u16 = 0x100;
pub const NLM_F_MATCH: u16 = 0x200;
pub const NLM_F_DUMP: u16 = NLM_F_ROOT | NLM_F_MATCH;

// Modifiers to NEW request
pub const NLM_F_REPLACE: u16 = 0x100;
pub const NLM_F_EXCL: u16 = 0x200;
pub const NLM_F_CREATE: u16 = 0x400;
pub const NLM_F_APPEND: u16 = 0x800;

/// One received message: its header and the bytes after it.
#[derive(Debug, Clone, Copy)]
pub struct Envelope<'a> {
    /// The message header.
    pub header: NlMsgHdr,
    /// Everything after the header, up to `nlmsg_len`.
    pub payload: &'a [u8],
}

impl Envelope<'_> {
    /// Sequence number echoed by the kernel.
    pub fn seq(&self) -> u32 {
        self.header.nlmsg_seq
    }

    /// Port the message was addressed to.
    pub fn port(&self) -> u32 {
        self.header.nlmsg_pid
    }

    /// Raw message type.
    pub fn msg_type(&self) -> u16 {
        self.header.nlmsg_type
    }

    /// Check whether this message answers the request `(seq, port)`.
    ///
    /// A port of zero on either side matches anything; kernel-originated
    /// messages may leave it unset.
    pub fn belongs_to(&self, seq: u32, port: u32) -> bool {
        let port_ok = self.port() == 0 || port == 0 || self.port() == port;
        self.seq() == seq && port_ok
    }
}

/// Validate the envelope at the start of `buf`.
///
/// Returns the envelope and the number of bytes it occupies including
/// trailing alignment, so the caller can step to the next message.
pub fn parse_response_header(buf: &[u8]) -> Result<(Envelope<'_>, usize)> {
    let header = NlMsgHdr::from_bytes(buf)?;

    let msg_len = header.nlmsg_len as usize;
    if msg_len < NLMSG_HDRLEN {
        return Err(Error::MalformedEnvelope(format!(
            "message length {} shorter than header",
            msg_len
        )));
    }
    if msg_len > buf.len() {
        return Err(Error::MalformedEnvelope(format!(
            "message length {} exceeds datagram ({} bytes)",
            msg_len,
            buf.len()
        )));
    }

    let consumed = nlmsg_align(msg_len).min(buf.len());
    Ok((
        Envelope {
            header,
            payload: &buf[NLMSG_HDRLEN..msg_len],
        },
        consumed,
    ))
}

/// Iterator over the netlink messages in one datagram.
///
/// After the first error the iterator is exhausted.
pub struct MessageIter<'a> {
    data: &'a [u8],
}

impl<'a> MessageIter<'a> {
    /// Create a new message iterator.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for MessageIter<'a> {
    type Item = Result<Envelope<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }

        match parse_response_header(self.data) {
            Ok((envelope, consumed)) => {
                self.data = &self.data[consumed..];
                Some(Ok(envelope))
            }
            Err(e) => {
                self.data = &[];
                Some(Err(e))
            }
        }
    }
}

/// Netlink error message payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
pub struct NlMsgError {
    /// Error code (negative errno or 0 for ACK).
    pub error: i32,
    /// Original message header that caused the error.
    pub msg: NlMsgHdr,
}

impl NlMsgError {
    /// Parse error message from payload.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::read_from_prefix(data)
            .map(|(err, _)| err)
            .map_err(|_| {
                Error::MalformedEnvelope(format!(
                    "error message needs {} bytes, got {}",
                    std::mem::size_of::<Self>(),
                    data.len()
                ))
            })
    }

    /// Check if this is an ACK (no error).
    pub fn is_ack(&self) -> bool {
        self.error == 0
    }

    /// Convert into `Ok(())` for an ACK or the kernel error otherwise.
    pub fn into_result(self) -> Result<()> {
        if self.is_ack() {
            Ok(())
        } else {
            Err(Error::from_errno(self.error))
        }
    }
}
