use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::{env, fs, path::Path};

/// On-disk network description, e.g. `networks/base-sepolia.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRaw {
    pub chain_id: u64,
    pub rpc: String,
    /// Env var that, when set, replaces `rpc` (keeps keyed URLs out of the file).
    #[serde(default)]
    pub rpc_env_var: Option<String>,
    pub entry_point: String,
    pub factory: String,
    #[serde(default)]
    pub bundler: Option<String>,
    #[serde(default)]
    pub paymaster: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Network {
    pub chain_id: u64,
    pub rpc_url: String,
    pub entry_point: Address,
    pub factory: Address,
    pub bundler_url: Option<String>,
    pub paymaster_url: Option<String>,
}

impl Network {
    /// Fails if the node behind `rpc_url` reports a different chain.
    pub fn ensure_chain_id(&self, node_chain_id: u64) -> Result<()> {
        if node_chain_id != self.chain_id {
            return Err(anyhow!(
                "RPC chainId {} != network chainId {} (wrong --rpc or network file?)",
                node_chain_id,
                self.chain_id
            ));
        }
        Ok(())
    }
}

pub fn load_network(path: &Path, rpc_override: Option<String>) -> Result<Network> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read network json at {}", path.display()))?;
    let raw: NetworkRaw = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse network json at {}", path.display()))?;
    resolve(raw, rpc_override)
}

fn resolve(raw: NetworkRaw, rpc_override: Option<String>) -> Result<Network> {
    let rpc_url = match (rpc_override, raw.rpc_env_var.as_deref()) {
        (Some(rpc), _) => rpc,
        (None, Some(var)) => env::var(var).unwrap_or_else(|_| raw.rpc.clone()),
        (None, None) => raw.rpc.clone(),
    };

    Ok(Network {
        chain_id: raw.chain_id,
        rpc_url,
        entry_point: parse_addr(&raw.entry_point).context("invalid entryPoint address")?,
        factory: parse_addr(&raw.factory).context("invalid factory address")?,
        bundler_url: raw.bundler,
        paymaster_url: raw.paymaster,
    })
}

fn parse_addr(s: &str) -> Result<Address> {
    s.parse::<Address>().map_err(|e| anyhow!("{e}"))
}
