//! Rule expressions: the typed model and the wire-form encoder.
//!
//! [`Expr`] is what a decoded rule carries. [`WireExpr`] is an expression
//! under construction in kernel wire form; it is created by kind name, filled
//! field by field, then moved into a rule with
//! [`WireRule::append_expr`](super::rule::WireRule::append_expr).
//!
//! # Example
//!
//! ```ignore
//! use nftlink::nftables::abi::*;
//! use nftlink::nftables::{WireExpr, WireRule};
//!
//! let mut load = WireExpr::new("payload")?;
//! load.set_u32(NFTA_PAYLOAD_BASE, NFT_PAYLOAD_NETWORK_HEADER)?
//!     .set_u32(NFTA_PAYLOAD_DREG, NFT_REG_1)?
//!     .set_u32(NFTA_PAYLOAD_OFFSET, 9)?
//!     .set_u32(NFTA_PAYLOAD_LEN, 1)?;
//! wire_rule.append_expr(load);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use super::abi::*;
use super::types::{CmpOp, Family, HeaderField, PayloadBase, Register, Verdict};
use crate::netlink::attr::{AttrIter, check_payload_len, get};
use crate::netlink::{AttrBuilder, AttrWriter, Error, Result};

/// Load bytes from a packet header into a register.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "output", derive(serde::Serialize, serde::Deserialize))]
pub struct Payload {
    pub base: PayloadBase,
    pub dreg: Register,
    pub offset: u32,
    pub len: u32,
}

impl Payload {
    /// Load `field` into `dreg`.
    pub fn load(field: HeaderField, dreg: Register) -> Self {
        let loc = field.location();
        Self {
            base: loc.base,
            dreg,
            offset: loc.offset,
            len: loc.len,
        }
    }
}

/// Compare a register against literal data.
///
/// The comparison length is the length of `data`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "output", derive(serde::Serialize, serde::Deserialize))]
pub struct Cmp {
    pub sreg: Register,
    pub op: CmpOp,
    pub data: Vec<u8>,
}

/// What an immediate expression stores.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "output", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "output", serde(rename_all = "lowercase"))]
pub enum ImmediateData {
    Value(Vec<u8>),
    Verdict(Verdict),
}

/// Store a constant (usually a verdict) into a register.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "output", derive(serde::Serialize, serde::Deserialize))]
pub struct Immediate {
    pub dreg: Register,
    pub data: ImmediateData,
}

impl Immediate {
    /// Set the rule verdict.
    pub fn verdict(verdict: Verdict) -> Self {
        Self {
            dreg: Register::VERDICT,
            data: ImmediateData::Verdict(verdict),
        }
    }
}

/// Packet/byte counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "output", derive(serde::Serialize, serde::Deserialize))]
pub struct Counter {
    pub bytes: u64,
    pub packets: u64,
}

/// One step of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "output", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "output", serde(tag = "type", rename_all = "lowercase"))]
pub enum Expr {
    Payload(Payload),
    Cmp(Cmp),
    Immediate(Immediate),
    Counter(Counter),
    /// An expression kind this crate does not model; kept verbatim.
    Unknown { name: String, data: Vec<u8> },
}

impl Expr {
    /// Kernel name of this expression kind.
    pub fn name(&self) -> &str {
        match self {
            Self::Payload(_) => ExprKind::Payload.name(),
            Self::Cmp(_) => ExprKind::Cmp.name(),
            Self::Immediate(_) => ExprKind::Immediate.name(),
            Self::Counter(_) => ExprKind::Counter.name(),
            Self::Unknown { name, .. } => name,
        }
    }

    /// Encode into wire form.
    ///
    /// Fails with [`Error::UnknownExpressionKind`] for [`Expr::Unknown`],
    /// which has no field-level encoder.
    pub fn to_wire(&self) -> Result<WireExpr> {
        let mut wire = WireExpr::new(self.name())?;
        match self {
            Self::Payload(p) => {
                wire.set_u32(NFTA_PAYLOAD_DREG, p.dreg.0)?
                    .set_u32(NFTA_PAYLOAD_BASE, p.base.to_raw())?
                    .set_u32(NFTA_PAYLOAD_OFFSET, p.offset)?
                    .set_u32(NFTA_PAYLOAD_LEN, p.len)?;
            }
            Self::Cmp(c) => {
                wire.set_u32(NFTA_CMP_SREG, c.sreg.0)?
                    .set_u32(NFTA_CMP_OP, c.op.to_raw())?
                    .set_data(NFTA_CMP_DATA, &c.data)?;
            }
            Self::Immediate(i) => {
                wire.set_u32(NFTA_IMMEDIATE_DREG, i.dreg.0)?;
                match &i.data {
                    ImmediateData::Value(v) => wire.set_data(NFTA_IMMEDIATE_DATA, v)?,
                    ImmediateData::Verdict(v) => wire.set_verdict(NFTA_IMMEDIATE_DATA, v)?,
                };
            }
            Self::Counter(c) => {
                wire.set_u64(NFTA_COUNTER_BYTES, c.bytes)?
                    .set_u64(NFTA_COUNTER_PACKETS, c.packets)?;
            }
            // WireExpr::new already rejected it.
            Self::Unknown { .. } => {}
        }
        Ok(wire)
    }

    /// Decode one `NFTA_LIST_ELEM` payload.
    pub fn decode(elem: &[u8]) -> Result<Self> {
        let mut name = None;
        let mut data: &[u8] = &[];
        for attr in AttrIter::new(elem) {
            let (kind, payload) = attr?;
            match kind {
                NFTA_EXPR_NAME => name = Some(get::string(payload)?),
                NFTA_EXPR_DATA => data = payload,
                _ => {}
            }
        }
        let name =
            name.ok_or_else(|| Error::MalformedAttribute("expression without name".into()))?;

        match ExprKind::from_name(name) {
            Some(ExprKind::Payload) => decode_payload(data).map(Self::Payload),
            Some(ExprKind::Cmp) => decode_cmp(data).map(Self::Cmp),
            Some(ExprKind::Immediate) => decode_immediate(data).map(Self::Immediate),
            Some(ExprKind::Counter) => decode_counter(data).map(Self::Counter),
            None => Ok(Self::Unknown {
                name: name.to_string(),
                data: data.to_vec(),
            }),
        }
    }
}

fn decode_payload(data: &[u8]) -> Result<Payload> {
    let mut dreg = None;
    let mut base = None;
    let mut offset = 0;
    let mut len = 0;
    for attr in AttrIter::new(data) {
        let (kind, payload) = attr?;
        match kind {
            NFTA_PAYLOAD_DREG => dreg = Some(Register(get::u32_be(payload)?)),
            NFTA_PAYLOAD_BASE => base = Some(PayloadBase::from_raw(get::u32_be(payload)?)?),
            NFTA_PAYLOAD_OFFSET => offset = get::u32_be(payload)?,
            NFTA_PAYLOAD_LEN => len = get::u32_be(payload)?,
            _ => {}
        }
    }
    Ok(Payload {
        base: base.ok_or_else(|| Error::MalformedAttribute("payload without base".into()))?,
        dreg: dreg.unwrap_or_default(),
        offset,
        len,
    })
}

fn decode_cmp(data: &[u8]) -> Result<Cmp> {
    let mut sreg = Register::default();
    let mut op = None;
    let mut value = Vec::new();
    for attr in AttrIter::new(data) {
        let (kind, payload) = attr?;
        match kind {
            NFTA_CMP_SREG => sreg = Register(get::u32_be(payload)?),
            NFTA_CMP_OP => op = Some(CmpOp::from_raw(get::u32_be(payload)?)?),
            NFTA_CMP_DATA => {
                if let DataAttr::Value(v) = decode_data(payload)? {
                    value = v;
                }
            }
            _ => {}
        }
    }
    Ok(Cmp {
        sreg,
        op: op.ok_or_else(|| Error::MalformedAttribute("cmp without operator".into()))?,
        data: value,
    })
}

fn decode_immediate(data: &[u8]) -> Result<Immediate> {
    let mut dreg = Register::default();
    let mut value = None;
    for attr in AttrIter::new(data) {
        let (kind, payload) = attr?;
        match kind {
            NFTA_IMMEDIATE_DREG => dreg = Register(get::u32_be(payload)?),
            NFTA_IMMEDIATE_DATA => {
                value = Some(match decode_data(payload)? {
                    DataAttr::Value(v) => ImmediateData::Value(v),
                    DataAttr::Verdict(v) => ImmediateData::Verdict(v),
                })
            }
            _ => {}
        }
    }
    Ok(Immediate {
        dreg,
        data: value.ok_or_else(|| Error::MalformedAttribute("immediate without data".into()))?,
    })
}

fn decode_counter(data: &[u8]) -> Result<Counter> {
    let mut counter = Counter::default();
    for attr in AttrIter::new(data) {
        let (kind, payload) = attr?;
        match kind {
            NFTA_COUNTER_BYTES => counter.bytes = get::u64_be(payload)?,
            NFTA_COUNTER_PACKETS => counter.packets = get::u64_be(payload)?,
            _ => {}
        }
    }
    Ok(counter)
}

enum DataAttr {
    Value(Vec<u8>),
    Verdict(Verdict),
}

fn decode_data(data: &[u8]) -> Result<DataAttr> {
    for attr in AttrIter::new(data) {
        let (kind, payload) = attr?;
        match kind {
            NFTA_DATA_VALUE => return Ok(DataAttr::Value(payload.to_vec())),
            NFTA_DATA_VERDICT => {
                let mut code = None;
                let mut chain = None;
                for attr in AttrIter::new(payload) {
                    let (kind, payload) = attr?;
                    match kind {
                        NFTA_VERDICT_CODE => code = Some(get::i32_be(payload)?),
                        NFTA_VERDICT_CHAIN => chain = Some(get::string(payload)?.to_string()),
                        _ => {}
                    }
                }
                let code = code
                    .ok_or_else(|| Error::MalformedAttribute("verdict without code".into()))?;
                return Verdict::from_code(code, chain).map(DataAttr::Verdict);
            }
            _ => {}
        }
    }
    Err(Error::MalformedAttribute("empty data attribute".into()))
}

/// Expression kinds that have a field-level encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprKind {
    Payload,
    Cmp,
    Immediate,
    Counter,
}

/// How a field's value is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Big-endian u32.
    U32,
    /// Big-endian u64.
    U64,
    /// Nested `nft_data` (value or verdict).
    Data,
}

impl ExprKind {
    /// Kernel name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Payload => "payload",
            Self::Cmp => "cmp",
            Self::Immediate => "immediate",
            Self::Counter => "counter",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "payload" => Some(Self::Payload),
            "cmp" => Some(Self::Cmp),
            "immediate" => Some(Self::Immediate),
            "counter" => Some(Self::Counter),
            _ => None,
        }
    }

    /// Fields this kind accepts.
    pub const fn fields(self) -> &'static [(u16, FieldType)] {
        match self {
            Self::Payload => &[
                (NFTA_PAYLOAD_DREG, FieldType::U32),
                (NFTA_PAYLOAD_BASE, FieldType::U32),
                (NFTA_PAYLOAD_OFFSET, FieldType::U32),
                (NFTA_PAYLOAD_LEN, FieldType::U32),
            ],
            Self::Cmp => &[
                (NFTA_CMP_SREG, FieldType::U32),
                (NFTA_CMP_OP, FieldType::U32),
                (NFTA_CMP_DATA, FieldType::Data),
            ],
            Self::Immediate => &[
                (NFTA_IMMEDIATE_DREG, FieldType::U32),
                (NFTA_IMMEDIATE_DATA, FieldType::Data),
            ],
            Self::Counter => &[
                (NFTA_COUNTER_BYTES, FieldType::U64),
                (NFTA_COUNTER_PACKETS, FieldType::U64),
            ],
        }
    }
}

/// An expression in wire form, not yet attached to a rule.
///
/// Setting a field twice replaces the earlier value. Fields are emitted in
/// attribute-id order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireExpr {
    kind: ExprKind,
    fields: BTreeMap<u16, AttrBuilder>,
}

impl WireExpr {
    /// Allocate an empty expression of the named kind.
    pub fn new(name: &str) -> Result<Self> {
        let kind =
            ExprKind::from_name(name).ok_or_else(|| Error::UnknownExpressionKind(name.into()))?;
        Ok(Self {
            kind,
            fields: BTreeMap::new(),
        })
    }

    pub fn kind(&self) -> ExprKind {
        self.kind
    }

    fn check(&self, field: u16, want: FieldType) -> Result<()> {
        let invalid = |reason| Error::InvalidField {
            kind: self.kind.name(),
            field,
            reason,
        };
        match self.kind.fields().iter().find(|(id, _)| *id == field) {
            None => Err(invalid("not a field of this expression")),
            Some(&(_, actual)) if actual != want => Err(invalid("wrong value type")),
            Some(_) => Ok(()),
        }
    }

    fn put(&mut self, field: u16, attr: AttrBuilder) -> &mut Self {
        self.fields.insert(field, attr);
        self
    }

    /// Set a u32 field.
    pub fn set_u32(&mut self, field: u16, value: u32) -> Result<&mut Self> {
        self.check(field, FieldType::U32)?;
        let mut attr = AttrBuilder::new();
        attr.append_attr_u32_be(field, value);
        Ok(self.put(field, attr))
    }

    /// Set a u64 field.
    pub fn set_u64(&mut self, field: u16, value: u64) -> Result<&mut Self> {
        self.check(field, FieldType::U64)?;
        let mut attr = AttrBuilder::new();
        attr.append_attr_u64_be(field, value);
        Ok(self.put(field, attr))
    }

    /// Set a data field to a literal value.
    ///
    /// Values longer than [`NFT_DATA_VALUE_MAXLEN`] bytes are rejected.
    pub fn set_data(&mut self, field: u16, value: &[u8]) -> Result<&mut Self> {
        self.check(field, FieldType::Data)?;
        if value.len() > NFT_DATA_VALUE_MAXLEN {
            return Err(Error::InvalidField {
                kind: self.kind.name(),
                field,
                reason: "value longer than 64 bytes",
            });
        }
        let mut attr = AttrBuilder::new();
        let nest = attr.nest_start(field);
        attr.append_attr(NFTA_DATA_VALUE, value);
        attr.nest_end(nest);
        Ok(self.put(field, attr))
    }

    /// Set a data field to a verdict.
    pub fn set_verdict(&mut self, field: u16, verdict: &Verdict) -> Result<&mut Self> {
        self.check(field, FieldType::Data)?;
        let mut attr = AttrBuilder::new();
        let data = attr.nest_start(field);
        let inner = attr.nest_start(NFTA_DATA_VERDICT);
        attr.append_attr(NFTA_VERDICT_CODE, &verdict.code().to_be_bytes());
        if let Some(chain) = verdict.chain() {
            check_payload_len(NFTA_VERDICT_CHAIN, chain.len() + 1)?;
            attr.append_attr_str(NFTA_VERDICT_CHAIN, chain);
        }
        attr.nest_end(inner);
        attr.nest_end(data);
        Ok(self.put(field, attr))
    }

    /// Write this expression as one `NFTA_LIST_ELEM`, consuming it.
    pub(crate) fn encode_into<W: AttrWriter>(self, out: &mut W) {
        let body: Vec<u8> = self
            .fields
            .values()
            .flat_map(|attr| attr.as_bytes().iter().copied())
            .collect();
        encode_elem(out, self.kind.name(), &body);
    }
}

/// Write `NFTA_LIST_ELEM { NAME, DATA { body } }`.
pub(crate) fn encode_elem<W: AttrWriter>(out: &mut W, name: &str, body: &[u8]) {
    let elem = out.nest_start(NFTA_LIST_ELEM);
    out.append_attr_str(NFTA_EXPR_NAME, name);
    let data = out.nest_start(NFTA_EXPR_DATA);
    out.append_raw(body);
    out.nest_end(data);
    out.nest_end(elem);
}

/// The canonical positional match: load `field` into register 1, compare for
/// equality with `value`.
pub fn header_match(field: HeaderField, value: &[u8]) -> [Expr; 2] {
    [
        Expr::Payload(Payload::load(field, Register::REG1)),
        Expr::Cmp(Cmp {
            sreg: Register::REG1,
            op: CmpOp::Eq,
            data: value.to_vec(),
        }),
    ]
}

/// Match the upper-layer protocol number for `family`.
pub fn protocol_match(family: Family, protocol: u8) -> [Expr; 2] {
    header_match(family.protocol_field(), &[protocol])
}

/// Match a TCP/UDP port (`field` must be a port field).
pub fn port_match(field: HeaderField, port: u16) -> [Expr; 2] {
    header_match(field, &port.to_be_bytes())
}

struct Hex<'a>(&'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("0x")?;
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Payload(p) => write!(
                f,
                "[ payload load {}b @ {:?} header + {} => reg {} ]",
                p.len, p.base, p.offset, p.dreg.0
            ),
            Self::Cmp(c) => write!(
                f,
                "[ cmp {} reg {} {} ]",
                c.op.symbol(),
                c.sreg.0,
                Hex(&c.data)
            ),
            Self::Immediate(i) => match &i.data {
                ImmediateData::Verdict(v) => write!(f, "[ immediate reg {} {} ]", i.dreg.0, v),
                ImmediateData::Value(v) => {
                    write!(f, "[ immediate reg {} {} ]", i.dreg.0, Hex(v))
                }
            },
            Self::Counter(c) => write!(f, "[ counter pkts {} bytes {} ]", c.packets, c.bytes),
            Self::Unknown { name, data } => write!(f, "[ {} ({} bytes) ]", name, data.len()),
        }
    }
}
