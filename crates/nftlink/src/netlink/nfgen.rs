//! nfnetlink framing: the `nfgenmsg` header and request envelopes.
//!
//! Every nf_tables message is a netlink header whose type packs
//! `(subsystem << 8) | message`, followed by a 4-byte `nfgenmsg` carrying the
//! address family.

use super::builder::MessageBuilder;
use super::error::{Error, Result};
use super::message::{NLM_F_REQUEST, NLMSG_HDRLEN, NlMsgHdr};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// nfnetlink protocol version.
pub const NFNETLINK_V0: u8 = 0;

/// nf_tables subsystem id.
pub const NFNL_SUBSYS_NFTABLES: u8 = 10;

/// Batch delimiters (nfnetlink control messages, no subsystem).
pub const NFNL_MSG_BATCH_BEGIN: u16 = 0x10;
pub const NFNL_MSG_BATCH_END: u16 = 0x11;

/// Size of an nf_tables request envelope (nlmsghdr + nfgenmsg).
pub const NFT_ENVELOPE_LEN: usize = NLMSG_HDRLEN + std::mem::size_of::<NfGenMsg>();

/// nfgenmsg header (mirrors struct nfgenmsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NfGenMsg {
    /// Address family (NFPROTO_*).
    pub family: u8,
    /// nfnetlink version.
    pub version: u8,
    /// Resource id, big endian.
    res_id: [u8; 2],
}

impl NfGenMsg {
    /// Create a header for the given family.
    pub fn new(family: u8, res_id: u16) -> Self {
        Self {
            family,
            version: NFNETLINK_V0,
            res_id: res_id.to_be_bytes(),
        }
    }

    /// Resource id in host order.
    pub fn res_id(&self) -> u16 {
        u16::from_be_bytes(self.res_id)
    }

    /// Convert to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Split a message payload into its nfgenmsg and the attributes after it.
    pub fn split(payload: &[u8]) -> Result<(Self, &[u8])> {
        Self::read_from_prefix(payload).map_err(|_| {
            Error::MalformedEnvelope(format!(
                "nfgenmsg needs {} bytes, got {}",
                std::mem::size_of::<Self>(),
                payload.len()
            ))
        })
    }
}

/// Netlink message type for an nf_tables message.
#[inline]
pub const fn nft_msg_type(msg: u16) -> u16 {
    ((NFNL_SUBSYS_NFTABLES as u16) << 8) | msg
}

/// Split a netlink message type into `(subsystem, message)`.
#[inline]
pub const fn split_msg_type(msg_type: u16) -> (u8, u16) {
    ((msg_type >> 8) as u8, msg_type & 0xff)
}

/// Write an nf_tables request envelope at the start of `buf`.
///
/// The length field covers the envelope only; the caller appends attributes
/// and patches `nlmsg_len`. Returns the number of bytes written.
pub fn build_request_header(
    buf: &mut [u8],
    msg: u16,
    family: u8,
    flags: u16,
    seq: u32,
) -> Result<usize> {
    if buf.len() < NFT_ENVELOPE_LEN {
        return Err(Error::HeaderBuild {
            needed: NFT_ENVELOPE_LEN,
            available: buf.len(),
        });
    }

    let mut header = NlMsgHdr::new(nft_msg_type(msg), NLM_F_REQUEST | flags);
    header.nlmsg_len = NFT_ENVELOPE_LEN as u32;
    header.nlmsg_seq = seq;

    buf[..NLMSG_HDRLEN].copy_from_slice(header.as_bytes());
    buf[NLMSG_HDRLEN..NFT_ENVELOPE_LEN].copy_from_slice(NfGenMsg::new(family, 0).as_bytes());
    Ok(NFT_ENVELOPE_LEN)
}

/// Start a growable nf_tables message.
pub fn request(msg: u16, family: u8, flags: u16, seq: u32) -> MessageBuilder {
    let mut builder = MessageBuilder::new(nft_msg_type(msg), NLM_F_REQUEST | flags);
    builder.set_seq(seq);
    builder.append_bytes(NfGenMsg::new(family, 0).as_bytes());
    builder
}

/// Batch delimiter message addressed to the nf_tables subsystem.
pub fn batch_delimiter(msg_type: u16, seq: u32) -> Vec<u8> {
    let mut builder = MessageBuilder::new(msg_type, NLM_F_REQUEST);
    builder.set_seq(seq);
    builder.append_bytes(
        NfGenMsg::new(libc::AF_UNSPEC as u8, NFNL_SUBSYS_NFTABLES as u16).as_bytes(),
    );
    builder.finish()
}

/// Wrap finished messages in BATCH_BEGIN/BATCH_END so they form one datagram.
///
/// `begin_seq` and `end_seq` are the sequence numbers of the delimiters.
pub fn batch(begin_seq: u32, messages: &[Vec<u8>], end_seq: u32) -> Vec<u8> {
    let mut out = batch_delimiter(NFNL_MSG_BATCH_BEGIN, begin_seq);
    for msg in messages {
        out.extend_from_slice(msg);
    }
    out.extend(batch_delimiter(NFNL_MSG_BATCH_END, end_seq));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::message::{MessageIter, NLM_F_DUMP};

    #[test]
    fn header_layout() {
        let mut buf = [0u8; 64];
        let n = build_request_header(&mut buf, 7, 2, NLM_F_DUMP, 99).unwrap();
        assert_eq!(n, 20);

        let hdr = NlMsgHdr::from_bytes(&buf).unwrap();
        assert_eq!(hdr.nlmsg_len, 20);
        assert_eq!(hdr.nlmsg_type, 0x0a07);
        assert_eq!(hdr.nlmsg_flags, NLM_F_REQUEST | NLM_F_DUMP);
        assert_eq!(hdr.nlmsg_seq, 99);

        let (nfg, rest) = NfGenMsg::split(&buf[NLMSG_HDRLEN..n]).unwrap();
        assert_eq!(nfg.family, 2);
        assert_eq!(nfg.version, NFNETLINK_V0);
        assert_eq!(nfg.res_id(), 0);
        assert!(rest.is_empty());
    }

    #[test]
    fn header_needs_room() {
        let mut buf = [0u8; 19];
        let err = build_request_header(&mut buf, 7, 2, 0, 1).unwrap_err();
        assert!(matches!(
            err,
            Error::HeaderBuild {
                needed: 20,
                available: 19
            }
        ));
    }

    #[test]
    fn msg_type_packing() {
        assert_eq!(nft_msg_type(6), 0x0a06);
        assert_eq!(split_msg_type(0x0a06), (NFNL_SUBSYS_NFTABLES, 6));
    }

    #[test]
    fn batch_wraps_messages() {
        let inner = request(6, 2, 0, 11).finish();
        let datagram = batch(10, &[inner], 12);

        let envs: Vec<_> = MessageIter::new(&datagram)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(envs.len(), 3);
        assert_eq!(envs[0].msg_type(), NFNL_MSG_BATCH_BEGIN);
        assert_eq!(envs[0].seq(), 10);
        assert_eq!(envs[1].msg_type(), 0x0a06);
        assert_eq!(envs[1].seq(), 11);
        assert_eq!(envs[2].msg_type(), NFNL_MSG_BATCH_END);

        let (nfg, _) = NfGenMsg::split(envs[0].payload).unwrap();
        assert_eq!(nfg.res_id(), NFNL_SUBSYS_NFTABLES as u16);
    }
}
