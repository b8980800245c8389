//! nf_tables rules: model, codec and operations.
//!
//! [`Connection`] is the entry point. [`Rule`] and [`Expr`] are the decoded
//! model; [`WireRule`] and [`WireExpr`] build the kernel wire form.

pub mod abi;
mod config;
mod connection;
mod dump;
mod expr;
mod rule;
mod types;

pub use config::{Config, DEFAULT_CHANNEL_CAPACITY};
pub use connection::Connection;
pub use dump::{DumpFilter, Fragment, RuleStream, collect_rules, decode_fragment};
pub use expr::{
    Cmp, Counter, Expr, ExprKind, FieldType, Immediate, ImmediateData, Payload, WireExpr,
    header_match, port_match, protocol_match,
};
pub use rule::{Rule, WireRule};
pub use types::{
    CmpOp, Family, FieldLocation, HeaderField, PayloadBase, Register, Verdict, protocol_name,
    protocol_number,
};
