//! nft-rules add.

use anyhow::bail;
use clap::Args;
use nftlink::nftables::{
    Connection, Counter, Expr, Family, HeaderField, Immediate, Rule, Verdict, port_match,
};

#[derive(Args)]
pub struct AddCmd {
    /// Address family (ip, ip6).
    #[arg(long, short, default_value = "ip")]
    family: String,

    /// Table name.
    #[arg(long, short)]
    table: String,

    /// Chain name.
    #[arg(long, short)]
    chain: String,

    /// Upper-layer protocol to match (tcp, udp, icmp, ...).
    #[arg(long, short)]
    proto: String,

    /// Match a destination port (tcp and udp only).
    #[arg(long)]
    dport: Option<u16>,

    /// Count matching packets.
    #[arg(long)]
    counter: bool,

    /// Verdict for matching packets (accept, drop).
    #[arg(long)]
    verdict: Option<String>,

    /// Replace the rule with this handle.
    #[arg(long)]
    handle: Option<u64>,
}

impl AddCmd {
    fn build(&self) -> anyhow::Result<Rule> {
        let family = Family::from_name(&self.family)?;
        let mut rule = Rule::new(family, &self.table, &self.chain);
        rule.handle = self.handle.unwrap_or(0);

        if let Some(port) = self.dport {
            let field = match self.proto.as_str() {
                "tcp" => HeaderField::TcpDestPort,
                "udp" => HeaderField::UdpDestPort,
                other => bail!("--dport needs tcp or udp, not {}", other),
            };
            rule = rule.with_exprs(port_match(field, port));
        }
        if self.counter {
            rule = rule.with_expr(Expr::Counter(Counter::default()));
        }
        if let Some(verdict) = &self.verdict {
            let verdict = match verdict.as_str() {
                "accept" => Verdict::Accept,
                "drop" => Verdict::Drop,
                other => bail!("unsupported verdict {}", other),
            };
            rule = rule.with_expr(Expr::Immediate(Immediate::verdict(verdict)));
        }
        Ok(rule)
    }

    pub async fn run(self, conn: &mut Connection) -> anyhow::Result<()> {
        let rule = self.build()?;
        conn.add_rule(&rule, &self.proto).await?;
        tracing::debug!(table = %rule.table, chain = %rule.chain, "rule added");
        Ok(())
    }
}
