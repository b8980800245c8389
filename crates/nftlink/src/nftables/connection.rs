//! High-level rule operations over one netlink endpoint.

use super::abi::{NFT_MSG_GETRULE, NFT_MSG_NEWRULE, NFTA_RULE_CHAIN};
use super::config::Config;
use super::dump::{DumpFilter, RuleStream, collect_rules};
use super::expr::protocol_match;
use super::rule::{Rule, WireRule};
use super::types::{Family, protocol_number};
use crate::netlink::message::{NLM_F_ACK, NLM_F_APPEND, NLM_F_CREATE, NLM_F_DUMP, NLM_F_REPLACE};
use crate::netlink::{
    AttrWriter, Error, MessageIter, NetlinkSocket, NlMsgError, NlMsgType, Result, Transport, nfgen,
    next_seq,
};

/// An nf_tables connection.
///
/// Owns its transport exclusively; operations take `&mut self` so two of
/// them never interleave on one endpoint.
///
/// # Example
///
/// ```ignore
/// use nftlink::nftables::{Connection, Family, Rule};
///
/// let mut conn = Connection::new()?;
/// for rule in conn.list_rules("input", "ip").await? {
///     println!("{}", rule);
/// }
///
/// let rule = Rule::new(Family::Ipv4, "filter", "input");
/// conn.add_rule(&rule, "tcp").await?;
/// ```
pub struct Connection<T: Transport = NetlinkSocket> {
    transport: T,
    config: Config,
}

impl Connection<NetlinkSocket> {
    /// Open and bind a netfilter socket with default settings.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    /// Open and bind a netfilter socket.
    pub fn with_config(config: Config) -> Result<Self> {
        Ok(Self::from_transport_with_config(NetlinkSocket::connect()?, config))
    }
}

impl<T: Transport> Connection<T> {
    /// Wrap an already bound transport.
    pub fn from_transport(transport: T) -> Self {
        Self::from_transport_with_config(transport, Config::default())
    }

    pub fn from_transport_with_config(transport: T, config: Config) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// List the rules of `chain` in the family named `family` (`"ip"`,
    /// `"ip6"`). An empty chain name lists every chain.
    ///
    /// The family is resolved before any I/O. Fails with [`Error::Dump`] if
    /// the dump breaks off; no partial result is returned.
    pub async fn list_rules(&mut self, chain: &str, family: &str) -> Result<Vec<Rule>> {
        let family = Family::from_name(family)?;
        self.list_rules_for(chain, family).await
    }

    /// [`Connection::list_rules`] with an already resolved family.
    pub async fn list_rules_for(&mut self, chain: &str, family: Family) -> Result<Vec<Rule>> {
        let seq = next_seq();
        let request = dump_request(chain, family, seq);
        let filter = DumpFilter::new(seq, self.transport.port()).chain(chain);
        collect_rules(&mut self.transport, &request, &filter, &self.config).await
    }

    /// Install `rule` preceded by a match on the upper-layer protocol named
    /// `protocol` (`"tcp"`, `"udp"`, ...).
    ///
    /// The protocol is resolved before anything is encoded. The rule's own
    /// expressions follow the protocol match in order.
    pub async fn add_rule(&mut self, rule: &Rule, protocol: &str) -> Result<()> {
        let protocol = protocol_number(protocol)?;

        let mut wire = WireRule::new(rule);
        for expr in protocol_match(rule.family, protocol) {
            wire.push(&expr)?;
        }
        for expr in &rule.exprs {
            wire.push(expr)?;
        }
        self.send_rule(wire, rule).await
    }

    /// Install `rule` exactly as given.
    pub async fn insert_rule(&mut self, rule: &Rule) -> Result<()> {
        let wire = rule.to_wire()?;
        self.send_rule(wire, rule).await
    }

    async fn send_rule(&mut self, wire: WireRule, rule: &Rule) -> Result<()> {
        let mut flags = NLM_F_CREATE | NLM_F_APPEND | NLM_F_ACK;
        if wire.handle() != 0 {
            flags |= NLM_F_REPLACE;
        }

        let begin = next_seq();
        let seq = next_seq();
        let end = next_seq();
        let message = wire.into_message(NFT_MSG_NEWRULE, flags, seq)?;
        let datagram = nfgen::batch(begin, &[message], end);

        self.transport.send(&datagram).await?;
        self.wait_ack(seq, &[begin, seq, end])
            .await
            .map_err(|e| e.with_context(format!("add rule to {}/{}", rule.table, rule.chain)))
    }

    /// Wait for the ACK of `seq`.
    ///
    /// An error answering any message of the batch fails the wait; the
    /// kernel drops the rest of a batch whose delimiter it rejected.
    async fn wait_ack(&mut self, seq: u32, batch: &[u32]) -> Result<()> {
        let port = self.transport.port();
        let mut buf = vec![0u8; self.config.recv_buffer_size()];
        loop {
            let n = self.transport.recv(&mut buf).await?;
            if n == 0 {
                return Err(Error::TransportClosed);
            }
            for envelope in MessageIter::new(&buf[..n]) {
                let envelope = envelope?;
                if envelope.msg_type() != NlMsgType::ERROR
                    || !batch.iter().any(|&s| envelope.belongs_to(s, port))
                {
                    continue;
                }
                let reply = NlMsgError::from_bytes(envelope.payload)?;
                if !reply.is_ack() {
                    let e = Error::from_errno(reply.error);
                    tracing::debug!(seq = envelope.seq(), error = %e, "kernel rejected rule batch");
                    return Err(e);
                }
                if envelope.seq() == seq {
                    return Ok(());
                }
            }
        }
    }
}

impl<T: Transport + Send + 'static> Connection<T> {
    /// Start a dump that is consumed lazily as a [`RuleStream`].
    ///
    /// The stream owns the transport; recover it with
    /// [`RuleStream::into_transport`].
    pub fn into_rule_stream(self, chain: &str, family: &str) -> Result<RuleStream<T>> {
        let family = Family::from_name(family)?;
        let seq = next_seq();
        let request = dump_request(chain, family, seq);
        let filter = DumpFilter::new(seq, self.transport.port()).chain(chain);
        Ok(RuleStream::spawn(self.transport, request, filter, &self.config))
    }
}

fn dump_request(chain: &str, family: Family, seq: u32) -> Vec<u8> {
    let mut msg = nfgen::request(NFT_MSG_GETRULE, family.nfproto(), NLM_F_DUMP, seq);
    if !chain.is_empty() {
        msg.append_attr_str(NFTA_RULE_CHAIN, chain);
    }
    msg.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::{self, get};
    use crate::netlink::message::{NLM_F_REQUEST, parse_response_header};
    use crate::netlink::nfgen::{NfGenMsg, nft_msg_type};

    #[test]
    fn dump_request_layout() {
        let msg = dump_request("input", Family::Ipv6, 42);
        let (envelope, consumed) = parse_response_header(&msg).unwrap();
        assert_eq!(consumed, msg.len());
        assert_eq!(envelope.seq(), 42);
        assert_eq!(envelope.msg_type(), nft_msg_type(NFT_MSG_GETRULE));
        assert_eq!(envelope.header.nlmsg_flags, NLM_F_REQUEST | NLM_F_DUMP);

        let (nfgen, attrs) = NfGenMsg::split(envelope.payload).unwrap();
        assert_eq!(nfgen.family, Family::Ipv6.nfproto());
        let attrs = attr::decode(attrs).unwrap();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].0, NFTA_RULE_CHAIN);
        assert_eq!(get::string(attrs[0].1).unwrap(), "input");
    }

    #[test]
    fn dump_request_without_chain() {
        let msg = dump_request("", Family::Ipv4, 1);
        let (envelope, _) = parse_response_header(&msg).unwrap();
        let (_, attrs) = NfGenMsg::split(envelope.payload).unwrap();
        assert!(attrs.is_empty());
    }
}
