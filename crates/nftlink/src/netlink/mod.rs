//! Netlink plumbing for the netfilter family.
//!
//! This module knows how to frame requests, walk the messages in a reply
//! datagram and encode/decode attribute records. It knows nothing about
//! rules; see [`crate::nftables`] for that.
//!
//! # Building a message
//!
//! ```ignore
//! use nftlink::netlink::{AttrWriter, nfgen};
//! use nftlink::netlink::message::NLM_F_DUMP;
//!
//! let mut msg = nfgen::request(7 /* NFT_MSG_GETRULE */, 2 /* ip */, NLM_F_DUMP, seq);
//! msg.append_attr_str(2 /* NFTA_RULE_CHAIN */, "input");
//! let datagram = msg.finish();
//! ```

pub mod attr;
mod builder;
mod error;
pub mod message;
pub mod nfgen;
mod socket;
pub mod transport;

pub use attr::{AttrIter, NlAttr};
pub use builder::{AttrBuilder, AttrWriter, MessageBuilder, NestToken};
pub use error::{Error, ErrorKind, Result};
pub use message::{Envelope, MessageIter, NLMSG_HDRLEN, NlMsgError, NlMsgHdr, NlMsgType};
pub use socket::{NetlinkSocket, SocketState};
pub use transport::{Transport, next_seq, recv_buffer_size};
