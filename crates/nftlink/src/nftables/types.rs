//! Typed values carried inside nf_tables rules, plus the static name tables.

use std::fmt;

use super::abi::*;
use crate::netlink::{Error, Result};

/// Address family a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "output", derive(serde::Serialize, serde::Deserialize))]
pub enum Family {
    /// `ip` (NFPROTO_IPV4)
    #[cfg_attr(feature = "output", serde(rename = "ip"))]
    Ipv4,
    /// `ip6` (NFPROTO_IPV6)
    #[cfg_attr(feature = "output", serde(rename = "ip6"))]
    Ipv6,
}

impl Family {
    /// All supported families.
    pub const ALL: [Family; 2] = [Family::Ipv4, Family::Ipv6];

    /// Resolve a family tag (`"ip"`, `"ip6"`).
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "ip" => Ok(Self::Ipv4),
            "ip6" => Ok(Self::Ipv6),
            other => Err(Error::UnknownFamily(other.to_string())),
        }
    }

    /// The family tag.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ipv4 => "ip",
            Self::Ipv6 => "ip6",
        }
    }

    /// Kernel NFPROTO_* value.
    pub fn nfproto(self) -> u8 {
        match self {
            Self::Ipv4 => NFPROTO_IPV4,
            Self::Ipv6 => NFPROTO_IPV6,
        }
    }

    /// Map a kernel NFPROTO_* value back to a family.
    pub fn from_nfproto(value: u8) -> Option<Self> {
        match value {
            NFPROTO_IPV4 => Some(Self::Ipv4),
            NFPROTO_IPV6 => Some(Self::Ipv6),
            _ => None,
        }
    }

    /// Network-header field holding the upper-layer protocol number.
    pub fn protocol_field(self) -> HeaderField {
        match self {
            Self::Ipv4 => HeaderField::Ipv4Protocol,
            Self::Ipv6 => HeaderField::Ipv6NextHeader,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const PROTOCOLS: &[(&str, u8)] = &[
    ("icmp", 1),
    ("igmp", 2),
    ("tcp", 6),
    ("udp", 17),
    ("gre", 47),
    ("esp", 50),
    ("ah", 51),
    ("icmpv6", 58),
    ("sctp", 132),
    ("udplite", 136),
];

/// Resolve a protocol name to its IP protocol number.
pub fn protocol_number(name: &str) -> Result<u8> {
    PROTOCOLS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|&(_, number)| number)
        .ok_or_else(|| Error::UnknownProtocol(name.to_string()))
}

/// Reverse lookup for display.
pub fn protocol_name(number: u8) -> Option<&'static str> {
    PROTOCOLS
        .iter()
        .find(|&&(_, n)| n == number)
        .map(|&(name, _)| name)
}

/// A kernel-side scratch register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "output", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "output", serde(transparent))]
pub struct Register(pub u32);

impl Register {
    pub const VERDICT: Self = Self(NFT_REG_VERDICT);
    pub const REG1: Self = Self(NFT_REG_1);
    pub const REG2: Self = Self(NFT_REG_2);
    pub const REG3: Self = Self(NFT_REG_3);
    pub const REG4: Self = Self(NFT_REG_4);
}

/// Which header a payload expression reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "output", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "output", serde(rename_all = "lowercase"))]
pub enum PayloadBase {
    /// Link-layer header.
    Link,
    /// Network header (IPv4/IPv6).
    Network,
    /// Transport header (TCP/UDP/...).
    Transport,
    /// Inner (tunnelled) header.
    Inner,
}

impl PayloadBase {
    pub fn to_raw(self) -> u32 {
        match self {
            Self::Link => NFT_PAYLOAD_LL_HEADER,
            Self::Network => NFT_PAYLOAD_NETWORK_HEADER,
            Self::Transport => NFT_PAYLOAD_TRANSPORT_HEADER,
            Self::Inner => NFT_PAYLOAD_INNER_HEADER,
        }
    }

    pub fn from_raw(value: u32) -> Result<Self> {
        match value {
            NFT_PAYLOAD_LL_HEADER => Ok(Self::Link),
            NFT_PAYLOAD_NETWORK_HEADER => Ok(Self::Network),
            NFT_PAYLOAD_TRANSPORT_HEADER => Ok(Self::Transport),
            NFT_PAYLOAD_INNER_HEADER => Ok(Self::Inner),
            other => Err(Error::MalformedAttribute(format!(
                "unknown payload base {}",
                other
            ))),
        }
    }
}

/// Relational operator of a cmp expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "output", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "output", serde(rename_all = "lowercase"))]
pub enum CmpOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CmpOp {
    pub fn to_raw(self) -> u32 {
        match self {
            Self::Eq => NFT_CMP_EQ,
            Self::Neq => NFT_CMP_NEQ,
            Self::Lt => NFT_CMP_LT,
            Self::Lte => NFT_CMP_LTE,
            Self::Gt => NFT_CMP_GT,
            Self::Gte => NFT_CMP_GTE,
        }
    }

    pub fn from_raw(value: u32) -> Result<Self> {
        match value {
            NFT_CMP_EQ => Ok(Self::Eq),
            NFT_CMP_NEQ => Ok(Self::Neq),
            NFT_CMP_LT => Ok(Self::Lt),
            NFT_CMP_LTE => Ok(Self::Lte),
            NFT_CMP_GT => Ok(Self::Gt),
            NFT_CMP_GTE => Ok(Self::Gte),
            other => Err(Error::MalformedAttribute(format!(
                "unknown cmp operator {}",
                other
            ))),
        }
    }

    /// nft-style symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }
}

/// Verdict carried by an immediate expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "output", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "output", serde(rename_all = "lowercase"))]
pub enum Verdict {
    Accept,
    Drop,
    Continue,
    Break,
    Return,
    Jump(String),
    Goto(String),
}

impl Verdict {
    /// Kernel verdict code.
    pub fn code(&self) -> i32 {
        match self {
            Self::Accept => NF_ACCEPT,
            Self::Drop => NF_DROP,
            Self::Continue => NFT_CONTINUE,
            Self::Break => NFT_BREAK,
            Self::Return => NFT_RETURN,
            Self::Jump(_) => NFT_JUMP,
            Self::Goto(_) => NFT_GOTO,
        }
    }

    /// Target chain for jump/goto.
    pub fn chain(&self) -> Option<&str> {
        match self {
            Self::Jump(chain) | Self::Goto(chain) => Some(chain),
            _ => None,
        }
    }

    /// Rebuild a verdict from its code and optional chain.
    pub fn from_code(code: i32, chain: Option<String>) -> Result<Self> {
        let need_chain = |chain: Option<String>| {
            chain.ok_or_else(|| {
                Error::MalformedAttribute(format!("verdict {} without chain", code))
            })
        };
        match code {
            NF_ACCEPT => Ok(Self::Accept),
            NF_DROP => Ok(Self::Drop),
            NFT_CONTINUE => Ok(Self::Continue),
            NFT_BREAK => Ok(Self::Break),
            NFT_RETURN => Ok(Self::Return),
            NFT_JUMP => Ok(Self::Jump(need_chain(chain)?)),
            NFT_GOTO => Ok(Self::Goto(need_chain(chain)?)),
            other => Err(Error::MalformedAttribute(format!(
                "unknown verdict code {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => f.write_str("accept"),
            Self::Drop => f.write_str("drop"),
            Self::Continue => f.write_str("continue"),
            Self::Break => f.write_str("break"),
            Self::Return => f.write_str("return"),
            Self::Jump(chain) => write!(f, "jump {}", chain),
            Self::Goto(chain) => write!(f, "goto {}", chain),
        }
    }
}

/// Where a header field lives: which header, byte offset, byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLocation {
    pub base: PayloadBase,
    pub offset: u32,
    pub len: u32,
}

/// Packet header fields that rules commonly match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderField {
    /// `iphdr.protocol`
    Ipv4Protocol,
    /// `ipv6hdr.nexthdr`
    Ipv6NextHeader,
    /// `tcphdr.source`
    TcpSourcePort,
    /// `tcphdr.dest`
    TcpDestPort,
    /// `udphdr.source`
    UdpSourcePort,
    /// `udphdr.dest`
    UdpDestPort,
}

impl HeaderField {
    pub const fn location(self) -> FieldLocation {
        let (base, offset, len) = match self {
            Self::Ipv4Protocol => (PayloadBase::Network, 9, 1),
            Self::Ipv6NextHeader => (PayloadBase::Network, 6, 1),
            Self::TcpSourcePort | Self::UdpSourcePort => (PayloadBase::Transport, 0, 2),
            Self::TcpDestPort | Self::UdpDestPort => (PayloadBase::Transport, 2, 2),
        };
        FieldLocation { base, offset, len }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_table() {
        assert_eq!(Family::from_name("ip").unwrap(), Family::Ipv4);
        assert_eq!(Family::from_name("ip6").unwrap().nfproto(), 10);
        assert!(matches!(
            Family::from_name("arp"),
            Err(Error::UnknownFamily(name)) if name == "arp"
        ));
        for family in Family::ALL {
            assert_eq!(Family::from_nfproto(family.nfproto()), Some(family));
            assert_eq!(Family::from_name(family.name()).unwrap(), family);
        }
    }

    #[test]
    fn protocol_table() {
        assert_eq!(protocol_number("tcp").unwrap(), 6);
        assert_eq!(protocol_number("udp").unwrap(), 17);
        assert_eq!(protocol_name(58), Some("icmpv6"));
        assert!(matches!(
            protocol_number("tpc"),
            Err(Error::UnknownProtocol(_))
        ));
    }

    #[test]
    fn header_offsets() {
        let proto = HeaderField::Ipv4Protocol.location();
        assert_eq!((proto.base, proto.offset, proto.len), (PayloadBase::Network, 9, 1));
        let dport = HeaderField::TcpDestPort.location();
        assert_eq!((dport.base, dport.offset, dport.len), (PayloadBase::Transport, 2, 2));
        assert_eq!(Family::Ipv6.protocol_field().location().offset, 6);
    }

    #[test]
    fn verdict_codes() {
        assert_eq!(Verdict::Accept.code(), 1);
        assert_eq!(
            Verdict::from_code(NFT_JUMP, Some("tcp_in".into())).unwrap(),
            Verdict::Jump("tcp_in".into())
        );
        assert!(Verdict::from_code(NFT_GOTO, None).is_err());
        assert!(Verdict::from_code(42, None).is_err());
    }

    #[test]
    fn raw_enums() {
        for op in [CmpOp::Eq, CmpOp::Neq, CmpOp::Lt, CmpOp::Lte, CmpOp::Gt, CmpOp::Gte] {
            assert_eq!(CmpOp::from_raw(op.to_raw()).unwrap(), op);
        }
        assert_eq!(PayloadBase::from_raw(1).unwrap(), PayloadBase::Network);
        assert!(PayloadBase::from_raw(9).is_err());
    }
}
