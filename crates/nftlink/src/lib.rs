//! Async nf_tables rule listing and installation over netlink.
//!
//! The crate talks `NETLINK_NETFILTER` directly: it frames requests, walks
//! multi-datagram dump replies and encodes/decodes rule and expression
//! attributes. It does not shell out to `nft` and needs no libnftnl.
//!
//! # Features
//!
//! - `output` - serde/JSON projection of rules (default)
//! - `integration` - tests against the running kernel (require root)
//!
//! # Example
//!
//! ```ignore
//! use nftlink::nftables::{Connection, Family, Rule, port_match, HeaderField};
//!
//! #[tokio::main]
//! async fn main() -> nftlink::Result<()> {
//!     let mut conn = Connection::new()?;
//!
//!     for rule in conn.list_rules("input", "ip").await? {
//!         println!("{:#}", rule);
//!     }
//!
//!     let rule = Rule::new(Family::Ipv4, "filter", "input")
//!         .with_exprs(port_match(HeaderField::TcpDestPort, 22));
//!     conn.add_rule(&rule, "tcp").await?;
//!     Ok(())
//! }
//! ```

pub mod netlink;
pub mod nftables;

pub use netlink::{Error, ErrorKind, Result};
pub use nftables::{Connection, Rule};
