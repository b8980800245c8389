//! Builders for netlink attributes and messages.

use super::attr::{NLA_F_NESTED, NlAttr, nla_align};
use super::message::{NLMSG_HDRLEN, NlMsgHdr, nlmsg_align};

/// Token returned when starting a nested attribute.
/// Used to finalize the nested attribute length.
#[derive(Debug, Clone, Copy)]
pub struct NestToken {
    /// Offset of the nested attribute header in the buffer.
    offset: usize,
}

/// Append-only attribute encoding over a byte buffer.
///
/// Every record is padded to the 4-byte netlink alignment. Integers are
/// written in network byte order, which is what nf_tables expects.
///
/// Writers do not check lengths: a record, nested groups included, must stay
/// within [`NLA_MAX_PAYLOAD`](super::attr::NLA_MAX_PAYLOAD). Callers that
/// take unbounded input check it first with
/// [`check_payload_len`](super::attr::check_payload_len).
pub trait AttrWriter {
    /// The buffer attributes are appended to.
    fn buffer(&mut self) -> &mut Vec<u8>;

    /// Append an attribute with the given type and data.
    fn append_attr(&mut self, attr_type: u16, data: &[u8]) {
        let buf = self.buffer();
        let attr = NlAttr::new(attr_type, data.len());
        buf.extend_from_slice(attr.as_bytes());
        buf.extend_from_slice(data);
        let aligned = nla_align(buf.len());
        buf.resize(aligned, 0);
    }

    /// Append already encoded attribute records.
    fn append_raw(&mut self, records: &[u8]) {
        let buf = self.buffer();
        buf.extend_from_slice(records);
        let aligned = nla_align(buf.len());
        buf.resize(aligned, 0);
    }

    /// Append a u8 attribute.
    fn append_attr_u8(&mut self, attr_type: u16, value: u8) {
        self.append_attr(attr_type, &[value]);
    }

    /// Append a u16 attribute (big endian / network order).
    fn append_attr_u16_be(&mut self, attr_type: u16, value: u16) {
        self.append_attr(attr_type, &value.to_be_bytes());
    }

    /// Append a u32 attribute (big endian / network order).
    fn append_attr_u32_be(&mut self, attr_type: u16, value: u32) {
        self.append_attr(attr_type, &value.to_be_bytes());
    }

    /// Append a u64 attribute (big endian / network order).
    fn append_attr_u64_be(&mut self, attr_type: u16, value: u64) {
        self.append_attr(attr_type, &value.to_be_bytes());
    }

    /// Append a null-terminated string attribute.
    fn append_attr_str(&mut self, attr_type: u16, value: &str) {
        let mut data = Vec::with_capacity(value.len() + 1);
        data.extend_from_slice(value.as_bytes());
        data.push(0);
        self.append_attr(attr_type, &data);
    }

    /// Start a nested attribute. Returns a token to finalize it.
    fn nest_start(&mut self, attr_type: u16) -> NestToken {
        let buf = self.buffer();
        let offset = buf.len();
        let attr = NlAttr::new(attr_type | NLA_F_NESTED, 0);
        buf.extend_from_slice(attr.as_bytes());
        NestToken { offset }
    }

    /// End a nested attribute started with `nest_start`.
    fn nest_end(&mut self, token: NestToken) {
        let buf = self.buffer();
        let len = buf.len() - token.offset;
        debug_assert!(len <= u16::MAX as usize, "nested attribute overflows nla_len");
        let len_bytes = (len as u16).to_ne_bytes();
        buf[token.offset] = len_bytes[0];
        buf[token.offset + 1] = len_bytes[1];
        let aligned = nla_align(buf.len());
        buf.resize(aligned, 0);
    }
}

/// Attribute-only buffer with no message envelope.
///
/// Holds the wire form of a nested group (an expression body, a rule's
/// header attributes) until it is copied into a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrBuilder {
    buf: Vec<u8>,
}

impl AttrBuilder {
    /// Create an empty attribute buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if nothing was appended.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The encoded records.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl AttrWriter for AttrBuilder {
    fn buffer(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

/// Builder for constructing netlink messages.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    buf: Vec<u8>,
}

impl MessageBuilder {
    /// Create a new message builder with the given type and flags.
    pub fn new(msg_type: u16, flags: u16) -> Self {
        Self::with_header(NlMsgHdr::new(msg_type, flags))
    }

    /// Create a builder from an existing header.
    pub fn with_header(header: NlMsgHdr) -> Self {
        let mut buf = vec![0u8; NLMSG_HDRLEN];
        buf[..std::mem::size_of::<NlMsgHdr>()].copy_from_slice(header.as_bytes());
        Self { buf }
    }

    /// Get the current message length.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if the message is empty (header only).
    pub fn is_empty(&self) -> bool {
        self.buf.len() == NLMSG_HDRLEN
    }

    /// Append raw bytes to the message (with alignment padding).
    pub fn append_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        let aligned = nlmsg_align(self.buf.len());
        self.buf.resize(aligned, 0);
    }

    /// Set the sequence number.
    pub fn set_seq(&mut self, seq: u32) {
        self.buf[8..12].copy_from_slice(&seq.to_ne_bytes());
    }

    /// Set the port ID.
    pub fn set_pid(&mut self, pid: u32) {
        self.buf[12..16].copy_from_slice(&pid.to_ne_bytes());
    }

    /// Finalize and return the message bytes.
    pub fn finish(mut self) -> Vec<u8> {
        let len = self.buf.len() as u32;
        self.buf[0..4].copy_from_slice(&len.to_ne_bytes());
        self.buf
    }

    /// Get the current buffer for inspection.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl AttrWriter for MessageBuilder {
    fn buffer(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::{self, NLA_HDRLEN, get};
    use crate::netlink::message::NLM_F_REQUEST;

    #[test]
    fn test_simple_message() {
        let msg = MessageBuilder::new(16, NLM_F_REQUEST).finish();
        assert_eq!(msg.len(), NLMSG_HDRLEN);

        let header = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(header.nlmsg_len as usize, NLMSG_HDRLEN);
        assert_eq!(header.nlmsg_type, 16);
        assert_eq!(header.nlmsg_flags, NLM_F_REQUEST);
    }

    #[test]
    fn test_attribute_is_padded_and_big_endian() {
        let mut attrs = AttrBuilder::new();
        attrs.append_attr_u8(1, 6);
        assert_eq!(attrs.len(), NLA_HDRLEN + 4);

        attrs.append_attr_u32_be(2, 0x0102_0304);
        let decoded = attr::decode(attrs.as_bytes()).unwrap();
        assert_eq!(decoded[1].1, &[1, 2, 3, 4]);
        assert_eq!(get::u32_be(decoded[1].1).unwrap(), 0x0102_0304);
    }

    #[test]
    fn test_nested_attribute() {
        let mut attrs = AttrBuilder::new();
        let nest = attrs.nest_start(4);
        attrs.append_attr_str(1, "cmp");
        attrs.nest_end(nest);

        let outer = attr::decode(attrs.as_bytes()).unwrap();
        assert_eq!(outer.len(), 1);
        assert_eq!(outer[0].0, 4);
        let inner = attr::decode(outer[0].1).unwrap();
        assert_eq!(get::string(inner[0].1).unwrap(), "cmp");
    }

    #[test]
    fn test_seq_and_pid() {
        let mut builder = MessageBuilder::new(16, NLM_F_REQUEST);
        builder.set_seq(77);
        builder.set_pid(1234);
        let msg = builder.finish();
        let header = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(header.nlmsg_seq, 77);
        assert_eq!(header.nlmsg_pid, 1234);
    }
}
