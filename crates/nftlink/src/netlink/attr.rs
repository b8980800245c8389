//! Netlink attribute (nlattr) handling.
//!
//! Decoding is strict: a record whose declared length runs past the buffer,
//! or whose alignment padding is cut short, is reported as
//! [`Error::MalformedAttribute`] instead of silently ending iteration.
//! Nested groups decode one level at a time; feed a payload back into
//! [`AttrIter::new`] to descend.

use super::error::{Error, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Netlink attribute alignment.
pub const NLA_ALIGNTO: usize = 4;

/// Align a length to NLA_ALIGNTO boundary.
#[inline]
pub const fn nla_align(len: usize) -> usize {
    (len + NLA_ALIGNTO - 1) & !(NLA_ALIGNTO - 1)
}

/// Size of the attribute header.
pub const NLA_HDRLEN: usize = nla_align(std::mem::size_of::<NlAttr>());

/// Largest payload a single attribute can carry; `nla_len` is 16 bits.
pub const NLA_MAX_PAYLOAD: usize = u16::MAX as usize - NLA_HDRLEN;

/// Check that a payload of `len` bytes fits in one `attr` record.
pub fn check_payload_len(attr: u16, len: usize) -> Result<()> {
    if len > NLA_MAX_PAYLOAD {
        return Err(Error::AttributeTooLong { attr, len });
    }
    Ok(())
}

/// Netlink attribute header (mirrors struct nlattr).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlAttr {
    /// Length including header.
    pub nla_len: u16,
    /// Attribute type.
    pub nla_type: u16,
}

/// Attribute type flags.
pub const NLA_F_NESTED: u16 = 1 << 15;
pub const NLA_F_NET_BYTEORDER: u16 = 1 << 14;
pub const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

impl NlAttr {
    /// Create a new attribute header.
    ///
    /// `data_len` must not exceed [`NLA_MAX_PAYLOAD`]; see
    /// [`check_payload_len`].
    pub fn new(attr_type: u16, data_len: usize) -> Self {
        Self {
            nla_len: (NLA_HDRLEN + data_len) as u16,
            nla_type: attr_type,
        }
    }

    /// Get the attribute type without flags.
    pub fn kind(&self) -> u16 {
        self.nla_type & NLA_TYPE_MASK
    }

    /// Check if this is a nested attribute.
    pub fn is_nested(&self) -> bool {
        self.nla_type & NLA_F_NESTED != 0
    }

    /// Convert to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::read_from_prefix(data)
            .map(|(attr, _)| attr)
            .map_err(|_| {
                Error::MalformedAttribute(format!(
                    "header needs {} bytes, {} left",
                    NLA_HDRLEN,
                    data.len()
                ))
            })
    }
}

/// Iterator over the top-level attributes in a buffer.
///
/// Yields `(type, payload)` with the nested/byte-order flags stripped from
/// the type. After the first error the iterator is exhausted.
pub struct AttrIter<'a> {
    data: &'a [u8],
}

impl<'a> AttrIter<'a> {
    /// Create a new attribute iterator.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Check if there are no more attributes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn fail(&mut self, msg: String) -> Option<Result<(u16, &'a [u8])>> {
        self.data = &[];
        Some(Err(Error::MalformedAttribute(msg)))
    }
}

impl<'a> Iterator for AttrIter<'a> {
    type Item = Result<(u16, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }

        let attr = match NlAttr::from_bytes(self.data) {
            Ok(a) => a,
            Err(e) => {
                self.data = &[];
                return Some(Err(e));
            }
        };

        let len = attr.nla_len as usize;
        if len < NLA_HDRLEN {
            return self.fail(format!("attribute {} declares length {}", attr.kind(), len));
        }
        if len > self.data.len() {
            return self.fail(format!(
                "attribute {} declares length {} but only {} bytes remain",
                attr.kind(),
                len,
                self.data.len()
            ));
        }

        let payload = &self.data[NLA_HDRLEN..len];
        let aligned_len = nla_align(len);

        if aligned_len <= self.data.len() {
            self.data = &self.data[aligned_len..];
        } else if len == self.data.len() {
            // Last record, padding omitted.
            self.data = &[];
        } else {
            return self.fail(format!(
                "attribute {} padding truncated ({} of {} bytes)",
                attr.kind(),
                self.data.len() - len,
                aligned_len - len
            ));
        }

        Some(Ok((attr.kind(), payload)))
    }
}

/// Decode a buffer into its top-level `(type, payload)` records.
pub fn decode(buf: &[u8]) -> Result<Vec<(u16, &[u8])>> {
    AttrIter::new(buf).collect()
}

/// Helper functions for extracting typed values from attribute payloads.
///
/// nf_tables carries integers in network byte order.
pub mod get {
    use super::*;

    fn exact<const N: usize>(data: &[u8], what: &str) -> Result<[u8; N]> {
        data.try_into().map_err(|_| {
            Error::MalformedAttribute(format!(
                "{} attribute is {} bytes, expected {}",
                what,
                data.len(),
                N
            ))
        })
    }

    /// Extract a u8 value.
    pub fn u8(data: &[u8]) -> Result<u8> {
        Ok(exact::<1>(data, "u8")?[0])
    }

    /// Extract a u16 value (big endian / network order).
    pub fn u16_be(data: &[u8]) -> Result<u16> {
        Ok(u16::from_be_bytes(exact(data, "u16")?))
    }

    /// Extract a u32 value (big endian / network order).
    pub fn u32_be(data: &[u8]) -> Result<u32> {
        Ok(u32::from_be_bytes(exact(data, "u32")?))
    }

    /// Extract an i32 value (big endian / network order).
    pub fn i32_be(data: &[u8]) -> Result<i32> {
        Ok(i32::from_be_bytes(exact(data, "i32")?))
    }

    /// Extract a u64 value (big endian / network order).
    pub fn u64_be(data: &[u8]) -> Result<u64> {
        Ok(u64::from_be_bytes(exact(data, "u64")?))
    }

    /// Extract a null-terminated string.
    pub fn string(data: &[u8]) -> Result<&str> {
        let len = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        std::str::from_utf8(&data[..len])
            .map_err(|e| Error::MalformedAttribute(format!("invalid UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = NlAttr::new(kind, payload.len()).as_bytes().to_vec();
        out.extend_from_slice(payload);
        out.resize(nla_align(out.len()), 0);
        out
    }

    #[test]
    fn decodes_records_in_order() {
        let mut buf = record(1, b"filter\0");
        buf.extend(record(3, &42u64.to_be_bytes()));
        buf.extend(record(2, b"input\0"));

        let attrs = decode(&buf).unwrap();
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs[0].0, 1);
        assert_eq!(get::string(attrs[0].1).unwrap(), "filter");
        assert_eq!(get::u64_be(attrs[1].1).unwrap(), 42);
        assert_eq!(get::string(attrs[2].1).unwrap(), "input");
    }

    #[test]
    fn strips_nested_flag() {
        let buf = record(4 | NLA_F_NESTED, &record(1, &[0; 4]));
        let attrs = decode(&buf).unwrap();
        assert_eq!(attrs[0].0, 4);
        let inner = decode(attrs[0].1).unwrap();
        assert_eq!(inner, vec![(1, &[0u8; 4][..])]);
    }

    #[test]
    fn length_past_end_is_malformed() {
        let mut buf = record(1, &[1, 2, 3, 4]);
        buf[0] = 64; // declared length beyond the buffer
        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, Error::MalformedAttribute(_)));
    }

    #[test]
    fn truncated_padding_is_malformed() {
        // 5-byte record followed by one padding byte instead of three, then garbage.
        let mut buf = NlAttr::new(1, 1).as_bytes().to_vec();
        buf.push(7);
        buf.push(0);
        assert!(decode(&buf).is_err());

        // Omitted padding on the last record is accepted.
        let mut buf = NlAttr::new(1, 1).as_bytes().to_vec();
        buf.push(7);
        assert_eq!(decode(&buf).unwrap(), vec![(1, &[7u8][..])]);
    }

    #[test]
    fn short_header_is_malformed() {
        assert!(decode(&[8, 0]).is_err());
        assert!(decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn payload_limit() {
        assert!(check_payload_len(4, NLA_MAX_PAYLOAD).is_ok());
        assert!(matches!(
            check_payload_len(4, NLA_MAX_PAYLOAD + 1),
            Err(Error::AttributeTooLong { attr: 4, .. })
        ));
    }

    #[test]
    fn typed_getters_check_width() {
        assert_eq!(get::u32_be(&[0, 0, 0, 6]).unwrap(), 6);
        assert_eq!(get::i32_be(&(-3i32).to_be_bytes()).unwrap(), -3);
        assert!(get::u32_be(&[0, 6]).is_err());
        assert!(get::u8(&[]).is_err());
    }
}
