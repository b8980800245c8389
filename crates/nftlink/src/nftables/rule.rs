//! The rule model and its wire form.

use std::fmt;

use super::abi::*;
use super::expr::{Expr, WireExpr, encode_elem};
use super::types::Family;
use crate::netlink::attr::{AttrIter, NLA_HDRLEN, check_payload_len, get, nla_align};
use crate::netlink::nfgen::{self, NfGenMsg};
use crate::netlink::{AttrBuilder, AttrWriter, Error, Result};

/// An nf_tables rule.
///
/// `handle == 0` means "not yet installed"; the kernel assigns one.
/// Expressions run in order and may read registers written by earlier ones.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "output", derive(serde::Serialize, serde::Deserialize))]
pub struct Rule {
    pub family: Family,
    pub table: String,
    pub chain: String,
    pub handle: u64,
    #[cfg_attr(feature = "output", serde(default, skip_serializing_if = "is_zero_u64"))]
    pub position: u64,
    #[cfg_attr(feature = "output", serde(default, skip_serializing_if = "is_zero_u32"))]
    pub compat_flags: u32,
    #[cfg_attr(feature = "output", serde(default, skip_serializing_if = "is_zero_u32"))]
    pub compat_proto: u32,
    #[cfg_attr(
        feature = "output",
        serde(rename = "expr", default, skip_serializing_if = "Vec::is_empty")
    )]
    pub exprs: Vec<Expr>,
}

#[cfg(feature = "output")]
fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

#[cfg(feature = "output")]
fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

impl Rule {
    /// An empty rule in `family`/`table`/`chain`.
    pub fn new(family: Family, table: impl Into<String>, chain: impl Into<String>) -> Self {
        Self {
            family,
            table: table.into(),
            chain: chain.into(),
            handle: 0,
            position: 0,
            compat_flags: 0,
            compat_proto: 0,
            exprs: Vec::new(),
        }
    }

    /// Append an expression.
    pub fn with_expr(mut self, expr: Expr) -> Self {
        self.exprs.push(expr);
        self
    }

    /// Append several expressions in order.
    pub fn with_exprs(mut self, exprs: impl IntoIterator<Item = Expr>) -> Self {
        self.exprs.extend(exprs);
        self
    }

    /// Decode one NEWRULE message payload (nfgenmsg + attributes).
    pub fn from_message(payload: &[u8]) -> Result<Self> {
        let (nfgen, attrs) = NfGenMsg::split(payload)?;
        let family = Family::from_nfproto(nfgen.family).ok_or_else(|| {
            Error::MalformedAttribute(format!("rule has unsupported family {}", nfgen.family))
        })?;
        let mut rule = Rule::new(family, String::new(), String::new());

        for attr in AttrIter::new(attrs) {
            let (kind, payload) = attr?;
            match kind {
                NFTA_RULE_TABLE => rule.table = get::string(payload)?.to_string(),
                NFTA_RULE_CHAIN => rule.chain = get::string(payload)?.to_string(),
                NFTA_RULE_HANDLE => rule.handle = get::u64_be(payload)?,
                NFTA_RULE_POSITION => rule.position = get::u64_be(payload)?,
                NFTA_RULE_EXPRESSIONS => {
                    for elem in AttrIter::new(payload) {
                        let (kind, elem) = elem?;
                        if kind == NFTA_LIST_ELEM {
                            rule.exprs.push(Expr::decode(elem)?);
                        }
                    }
                }
                NFTA_RULE_COMPAT => {
                    for compat in AttrIter::new(payload) {
                        let (kind, payload) = compat?;
                        match kind {
                            NFTA_RULE_COMPAT_PROTO => rule.compat_proto = get::u32_be(payload)?,
                            NFTA_RULE_COMPAT_FLAGS => rule.compat_flags = get::u32_be(payload)?,
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(rule)
    }

    /// Encode into wire form, expressions included.
    pub fn to_wire(&self) -> Result<WireRule> {
        let mut wire = WireRule::new(self);
        for expr in &self.exprs {
            wire.push(expr)?;
        }
        Ok(wire)
    }
}

#[cfg(feature = "output")]
#[derive(serde::Serialize, serde::Deserialize)]
struct RuleRecord<R> {
    rule: R,
}

#[cfg(feature = "output")]
impl Rule {
    /// JSON object `{"rule": {...}}`.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&RuleRecord { rule: self })?)
    }

    /// Parse the output of [`Rule::to_json`].
    pub fn from_json(json: &str) -> Result<Self> {
        let record: RuleRecord<Rule> = serde_json::from_str(json)?;
        Ok(record.rule)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.family, self.table, self.chain, self.handle, self.position
        )?;
        if f.alternate() {
            for expr in &self.exprs {
                write!(f, "\n  {}", expr)?;
            }
        }
        Ok(())
    }
}

/// A rule being assembled for transmission.
///
/// Expressions are appended in order; each [`WireExpr`] is consumed by
/// [`WireRule::append_expr`]. The rule itself is consumed by
/// [`WireRule::into_message`].
///
/// The encoded expression list travels in one attribute and so is limited
/// to [`NLA_MAX_PAYLOAD`](crate::netlink::attr::NLA_MAX_PAYLOAD) bytes;
/// `into_message` fails with [`Error::AttributeTooLong`] past that.
#[derive(Debug, Clone)]
pub struct WireRule {
    family: Family,
    table: String,
    chain: String,
    handle: u64,
    position: u64,
    compat: Option<(u32, u32)>,
    exprs: AttrBuilder,
    count: usize,
}

impl WireRule {
    /// Start a wire rule from `rule`'s header fields; its expressions are
    /// not copied.
    pub fn new(rule: &Rule) -> Self {
        let compat = (rule.compat_proto != 0 || rule.compat_flags != 0)
            .then_some((rule.compat_proto, rule.compat_flags));
        Self {
            family: rule.family,
            table: rule.table.clone(),
            chain: rule.chain.clone(),
            handle: rule.handle,
            position: rule.position,
            compat,
            exprs: AttrBuilder::new(),
            count: 0,
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// Number of expressions appended so far.
    pub fn expr_count(&self) -> usize {
        self.count
    }

    /// Encoded size of the expression list.
    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Move `expr` into this rule. Returns the bytes it added.
    pub fn append_expr(&mut self, expr: WireExpr) -> usize {
        let before = self.exprs.len();
        expr.encode_into(&mut self.exprs);
        self.count += 1;
        self.exprs.len() - before
    }

    /// Encode and append a typed expression; unmodelled kinds are copied
    /// through verbatim.
    pub fn push(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Unknown { name, data } => {
                let elem = nla_align(NLA_HDRLEN + name.len() + 1) + NLA_HDRLEN + data.len();
                check_payload_len(NFTA_LIST_ELEM, elem)?;
                encode_elem(&mut self.exprs, name, data);
                self.count += 1;
            }
            other => {
                self.append_expr(other.to_wire()?);
            }
        }
        Ok(())
    }

    /// Frame as one nf_tables message of type `msg`.
    pub fn into_message(self, msg: u16, flags: u16, seq: u32) -> Result<Vec<u8>> {
        check_payload_len(NFTA_RULE_TABLE, self.table.len() + 1)?;
        check_payload_len(NFTA_RULE_CHAIN, self.chain.len() + 1)?;
        check_payload_len(NFTA_RULE_EXPRESSIONS, self.exprs.len())?;

        let mut out = nfgen::request(msg, self.family.nfproto(), flags, seq);
        out.append_attr_str(NFTA_RULE_TABLE, &self.table);
        out.append_attr_str(NFTA_RULE_CHAIN, &self.chain);
        if self.handle != 0 {
            out.append_attr_u64_be(NFTA_RULE_HANDLE, self.handle);
        }
        if self.position != 0 {
            out.append_attr_u64_be(NFTA_RULE_POSITION, self.position);
        }
        if self.count > 0 {
            let list = out.nest_start(NFTA_RULE_EXPRESSIONS);
            out.append_raw(self.exprs.as_bytes());
            out.nest_end(list);
        }
        if let Some((proto, flags)) = self.compat {
            let compat = out.nest_start(NFTA_RULE_COMPAT);
            out.append_attr_u32_be(NFTA_RULE_COMPAT_PROTO, proto);
            out.append_attr_u32_be(NFTA_RULE_COMPAT_FLAGS, flags);
            out.nest_end(compat);
        }
        Ok(out.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr;
    use crate::netlink::message::{NLM_F_ACK, NLM_F_CREATE, parse_response_header};
    use crate::nftables::expr::{Counter, Immediate, header_match, protocol_match};
    use crate::nftables::types::{HeaderField, Verdict};

    fn decode(datagram: &[u8]) -> Rule {
        let (envelope, _) = parse_response_header(datagram).unwrap();
        Rule::from_message(envelope.payload).unwrap()
    }

    fn tcp_rule() -> Rule {
        Rule::new(Family::Ipv4, "filter", "input").with_exprs(protocol_match(Family::Ipv4, 6))
    }

    #[test]
    fn payload_and_cmp_roundtrip() {
        let rule = tcp_rule();
        let msg = rule
            .to_wire()
            .unwrap()
            .into_message(NFT_MSG_NEWRULE, NLM_F_CREATE, 1)
            .unwrap();
        assert_eq!(decode(&msg), rule);
    }

    #[test]
    fn all_fields_roundtrip() {
        let mut rule = Rule::new(Family::Ipv6, "filter", "forward")
            .with_exprs(protocol_match(Family::Ipv6, 17))
            .with_exprs(header_match(HeaderField::UdpDestPort, &53u16.to_be_bytes()))
            .with_expr(Expr::Counter(Counter::default()))
            .with_expr(Expr::Immediate(Immediate::verdict(Verdict::Drop)))
            .with_expr(Expr::Unknown {
                name: "meta".into(),
                data: vec![8, 0, 1, 0, 0, 0, 0, 3],
            });
        rule.handle = 12;
        rule.position = 4;
        rule.compat_proto = 17;
        rule.compat_flags = 1;

        let msg = rule.to_wire().unwrap().into_message(NFT_MSG_NEWRULE, 0, 9).unwrap();
        assert_eq!(decode(&msg), rule);
    }

    #[test]
    fn decode_is_repeatable() {
        let msg = tcp_rule()
            .to_wire()
            .unwrap()
            .into_message(NFT_MSG_NEWRULE, 0, 1)
            .unwrap();
        assert_eq!(decode(&msg), decode(&msg));
    }

    #[test]
    fn expression_order_on_the_wire() {
        let mut wire = WireRule::new(&Rule::new(Family::Ipv4, "filter", "input"));
        let [load, cmp] = protocol_match(Family::Ipv4, 6);
        assert!(wire.append_expr(load.to_wire().unwrap()) > 0);
        wire.append_expr(cmp.to_wire().unwrap());
        assert_eq!(wire.expr_count(), 2);

        let msg = wire.into_message(NFT_MSG_NEWRULE, NLM_F_ACK, 1).unwrap();
        let (envelope, _) = parse_response_header(&msg).unwrap();
        let (_, attrs) = NfGenMsg::split(envelope.payload).unwrap();
        let attrs = attr::decode(attrs).unwrap();
        let kinds: Vec<u16> = attrs.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec![NFTA_RULE_TABLE, NFTA_RULE_CHAIN, NFTA_RULE_EXPRESSIONS]);

        let names: Vec<&str> = attr::decode(attrs[2].1)
            .unwrap()
            .into_iter()
            .map(|(_, elem)| get::string(attr::decode(elem).unwrap()[0].1).unwrap())
            .collect();
        assert_eq!(names, vec!["payload", "cmp"]);
    }

    #[test]
    fn unset_handle_is_omitted() {
        let msg = Rule::new(Family::Ipv4, "filter", "input")
            .to_wire()
            .unwrap()
            .into_message(NFT_MSG_NEWRULE, 0, 1)
            .unwrap();
        let (envelope, _) = parse_response_header(&msg).unwrap();
        let (nfgen, attrs) = NfGenMsg::split(envelope.payload).unwrap();
        assert_eq!(nfgen.family, NFPROTO_IPV4);
        assert!(
            attr::decode(attrs)
                .unwrap()
                .iter()
                .all(|(k, _)| *k != NFTA_RULE_HANDLE && *k != NFTA_RULE_EXPRESSIONS)
        );
    }

    #[test]
    fn unsupported_family_is_malformed() {
        let mut msg = tcp_rule()
            .to_wire()
            .unwrap()
            .into_message(NFT_MSG_NEWRULE, 0, 1)
            .unwrap();
        msg[crate::netlink::NLMSG_HDRLEN] = 7; // NFPROTO_BRIDGE
        let (envelope, _) = parse_response_header(&msg).unwrap();
        assert!(matches!(
            Rule::from_message(envelope.payload),
            Err(Error::MalformedAttribute(_))
        ));
    }

    #[test]
    fn oversized_expression_list_is_rejected() {
        let blob = |len| Expr::Unknown {
            name: "meta".into(),
            data: vec![0; len],
        };

        let err = Rule::new(Family::Ipv4, "filter", "input")
            .with_expr(blob(u16::MAX as usize))
            .to_wire()
            .unwrap_err();
        assert!(matches!(err, Error::AttributeTooLong { attr: NFTA_LIST_ELEM, .. }));

        let wire = Rule::new(Family::Ipv4, "filter", "input")
            .with_exprs([blob(30_000), blob(30_000), blob(30_000)])
            .to_wire()
            .unwrap();
        assert_eq!(wire.expr_count(), 3);
        assert!(matches!(
            wire.into_message(NFT_MSG_NEWRULE, 0, 1),
            Err(Error::AttributeTooLong { attr: NFTA_RULE_EXPRESSIONS, len })
                if len > attr::NLA_MAX_PAYLOAD
        ));
    }

    #[test]
    fn display() {
        let rule = tcp_rule();
        assert_eq!(rule.to_string(), "ip filter input 0 0");
        let long = format!("{:#}", rule);
        assert_eq!(long.lines().count(), 3);
    }

    #[cfg(feature = "output")]
    #[test]
    fn json_projection() {
        let rule = tcp_rule();
        let json = rule.to_json().unwrap();
        assert!(json.starts_with(r#"{"rule":{"family":"ip","table":"filter","chain":"input","handle":0,"expr":["#));
        assert!(!json.contains("position"));
        assert!(!json.contains("compat_flags"));
        assert_eq!(Rule::from_json(&json).unwrap(), rule);

        let bare = Rule::new(Family::Ipv6, "t", "c").to_json().unwrap();
        assert_eq!(
            bare,
            r#"{"rule":{"family":"ip6","table":"t","chain":"c","handle":0}}"#
        );
    }
}
