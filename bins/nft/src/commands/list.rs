//! nft-rules list.

use std::io::{self, Write};

use clap::Args;
use nftlink::nftables::Connection;

#[derive(Args)]
pub struct ListCmd {
    /// Address family (ip, ip6).
    #[arg(long, short, default_value = "ip")]
    family: String,

    /// Output JSON, one rule object per line.
    #[arg(short = 'j', long)]
    json: bool,

    /// Chain to list; empty lists every chain.
    #[arg(default_value = "")]
    chain: String,
}

impl ListCmd {
    pub async fn run(self, conn: &mut Connection) -> anyhow::Result<()> {
        let rules = conn.list_rules(&self.chain, &self.family).await?;

        let mut out = io::stdout().lock();
        for rule in &rules {
            if self.json {
                writeln!(out, "{}", rule.to_json()?)?;
            } else {
                writeln!(out, "{:#}", rule)?;
            }
        }
        Ok(())
    }
}
