//! Multi-datagram rule dumps.
//!
//! A dump reply arrives as any number of datagrams, each holding zero or more
//! NEWRULE messages, terminated by `NLMSG_DONE` or an orderly zero-length
//! read. [`decode_fragment`] turns one datagram into rules; [`collect_rules`]
//! and [`RuleStream`] drive the receive loop around it.
//!
//! Either way the receive loop never waits on the consumer beyond the
//! channel's capacity, and a failure anywhere aborts the whole dump with
//! [`Error::Dump`]. Rules decoded before the failure are discarded.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::Stream;

use super::abi::NFT_MSG_NEWRULE;
use super::config::Config;
use super::rule::Rule;
use crate::netlink::message::NLM_F_DUMP_INTR;
use crate::netlink::nfgen::nft_msg_type;
use crate::netlink::{Error, MessageIter, NlMsgError, NlMsgType, Result, Transport};

/// Rules decoded from one datagram.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub rules: Vec<Rule>,
    /// The datagram carried `NLMSG_DONE` for this request.
    pub done: bool,
}

/// Which dump a datagram must belong to, and which rules to keep.
#[derive(Debug, Clone, Default)]
pub struct DumpFilter {
    pub seq: u32,
    pub port: u32,
    /// Keep only rules in this chain; `None` keeps all.
    pub chain: Option<String>,
}

impl DumpFilter {
    pub fn new(seq: u32, port: u32) -> Self {
        Self {
            seq,
            port,
            chain: None,
        }
    }

    /// Restrict to `chain`; an empty name keeps every chain.
    pub fn chain(mut self, chain: &str) -> Self {
        self.chain = (!chain.is_empty()).then(|| chain.to_string());
        self
    }

    fn keeps(&self, rule: &Rule) -> bool {
        self.chain.as_deref().is_none_or(|chain| rule.chain == chain)
    }
}

/// Decode every rule in one reply datagram.
///
/// Messages for another request are skipped. A kernel error message, or a
/// DONE carrying a negative errno, aborts with the kernel's errno.
pub fn decode_fragment(datagram: &[u8], filter: &DumpFilter) -> Result<Fragment> {
    let mut fragment = Fragment::default();

    for envelope in MessageIter::new(datagram) {
        let envelope = envelope?;
        if !envelope.belongs_to(filter.seq, filter.port) {
            tracing::trace!(
                seq = envelope.seq(),
                port = envelope.port(),
                "skipping foreign message"
            );
            continue;
        }
        if envelope.header.nlmsg_flags & NLM_F_DUMP_INTR != 0 {
            tracing::warn!(seq = filter.seq, "rule dump interrupted, ruleset changed mid-dump");
        }

        match envelope.msg_type() {
            NlMsgType::DONE => {
                if let Some(status) = envelope.payload.first_chunk::<4>() {
                    let status = i32::from_ne_bytes(*status);
                    if status < 0 {
                        return Err(Error::from_errno(status).with_context("list rules"));
                    }
                }
                fragment.done = true;
                break;
            }
            NlMsgType::ERROR => {
                NlMsgError::from_bytes(envelope.payload)?
                    .into_result()
                    .map_err(|e| e.with_context("list rules"))?;
            }
            t if t == nft_msg_type(NFT_MSG_NEWRULE) => {
                let rule = Rule::from_message(envelope.payload)?;
                if filter.keeps(&rule) {
                    fragment.rules.push(rule);
                }
            }
            other => tracing::trace!(msg_type = other, "ignoring message in rule dump"),
        }
    }

    Ok(fragment)
}

/// Receive until the dump ends, sending each rule to `tx`.
///
/// Returns early without error if the receiving side went away.
async fn pump<T: Transport>(
    transport: &mut T,
    buf: &mut [u8],
    filter: &DumpFilter,
    tx: &mpsc::Sender<Result<Rule>>,
) -> Result<usize> {
    let mut total = 0;
    loop {
        let n = transport.recv(buf).await?;
        if n == 0 {
            tracing::debug!(seq = filter.seq, "transport closed, dump complete");
            return Ok(total);
        }
        tracing::trace!(bytes = n, "received dump datagram");

        let fragment = decode_fragment(&buf[..n], filter)?;
        for rule in fragment.rules {
            if tx.send(Ok(rule)).await.is_err() {
                return Ok(total);
            }
            total += 1;
        }
        if fragment.done {
            return Ok(total);
        }
    }
}

/// Send `request` and collect the whole dump.
///
/// A spawned consumer drains decoded rules while this task keeps receiving.
/// On any error the collected rules are dropped and `Error::Dump` returned.
pub async fn collect_rules<T: Transport>(
    transport: &mut T,
    request: &[u8],
    filter: &DumpFilter,
    config: &Config,
) -> Result<Vec<Rule>> {
    let (tx, mut rx) = mpsc::channel::<Result<Rule>>(config.channel_capacity());
    let (ready_tx, ready_rx) = oneshot::channel();

    let consumer = tokio::spawn(async move {
        let _ = ready_tx.send(());
        let mut rules = Vec::new();
        while let Some(item) = rx.recv().await {
            if let Ok(rule) = item {
                rules.push(rule);
            }
        }
        rules
    });
    ready_rx
        .await
        .map_err(|_| Error::Io(std::io::Error::other("rule consumer exited before start")))?;

    tracing::debug!(seq = filter.seq, chain = ?filter.chain, "starting rule dump");
    let mut buf = vec![0u8; config.recv_buffer_size()];
    let produced = match transport.send(request).await {
        Ok(()) => pump(transport, &mut buf, filter, &tx).await,
        Err(e) => Err(e),
    };
    drop(tx);

    let rules = consumer
        .await
        .map_err(|e| Error::Dump(Box::new(Error::Io(std::io::Error::other(e)))))?;

    match produced {
        Ok(count) => {
            tracing::debug!(seq = filter.seq, count, "rule dump finished");
            Ok(rules)
        }
        Err(e) => {
            tracing::debug!(seq = filter.seq, error = %e, "rule dump failed");
            Err(Error::Dump(Box::new(e)))
        }
    }
}

/// Lazily delivered rule dump.
///
/// A background task owns the transport and pushes rules through a bounded
/// channel. The stream ends after the last rule, or after a single
/// `Err(Error::Dump(..))` item if the dump failed.
///
/// # Example
///
/// ```ignore
/// use tokio_stream::StreamExt;
///
/// let mut rules = conn.into_rule_stream("input", "ip")?;
/// while let Some(rule) = rules.next().await {
///     println!("{}", rule?);
/// }
/// let socket = rules.into_transport().await?;
/// ```
pub struct RuleStream<T> {
    rx: mpsc::Receiver<Result<Rule>>,
    producer: JoinHandle<T>,
}

impl<T: Transport + Send + 'static> RuleStream<T> {
    pub(crate) fn spawn(
        mut transport: T,
        request: Vec<u8>,
        filter: DumpFilter,
        config: &Config,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity());
        let buf_size = config.recv_buffer_size();

        let producer = tokio::spawn(async move {
            let mut buf = vec![0u8; buf_size];
            let result = match transport.send(&request).await {
                Ok(()) => pump(&mut transport, &mut buf, &filter, &tx).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::debug!(seq = filter.seq, error = %e, "rule stream failed");
                let _ = tx.send(Err(Error::Dump(Box::new(e)))).await;
            }
            transport
        });

        Self { rx, producer }
    }
}

impl<T> RuleStream<T> {
    /// Stop consuming and recover the transport once the producer finishes.
    pub async fn into_transport(self) -> Result<T> {
        drop(self.rx);
        self.producer
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))
    }
}

impl<T> Stream for RuleStream<T> {
    type Item = Result<Rule>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<T> Unpin for RuleStream<T> {}
