use anyhow::{Context, Result, bail};
use std::net::SocketAddr;
use vg_connect_core::{DEFAULT_NETWORK, NetworkConfig};
use vg_provider_rpc::DEFAULT_RPC_URL;

pub(crate) const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8090";
pub(crate) const DEFAULT_STORE_PATH: &str = "./data/session";
pub(crate) const DEFAULT_RPC_WALLET: &str = "Local Node";

/// Runtime settings for connect-service, read from the environment.
///
/// - `VG_BIND_ADDR` (default `0.0.0.0:8090`)
/// - `VG_STORE_PATH` RocksDB directory for the session (default `./data/session`)
/// - `VG_NETWORKS_PATH` JSON network file; builtin networks when unset
/// - `VG_DEFAULT_NETWORK` (default `ethereum`)
/// - `VG_RPC_WALLETS` comma-separated `Name=url` pairs
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub bind_addr: SocketAddr,
    pub store_path: String,
    pub networks_path: Option<String>,
    pub default_network: String,
    pub rpc_wallets: Vec<RpcWallet>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RpcWallet {
    pub name: String,
    pub endpoint: String,
}

impl Settings {
    pub(crate) fn from_env() -> Result<Self> {
        let bind_addr = env_or("VG_BIND_ADDR", DEFAULT_BIND_ADDR)
            .parse()
            .context("VG_BIND_ADDR must be a socket address")?;

        let rpc_wallets = match non_empty_env("VG_RPC_WALLETS") {
            Some(raw) => parse_rpc_wallets(&raw)?,
            None => vec![RpcWallet {
                name: DEFAULT_RPC_WALLET.to_owned(),
                endpoint: DEFAULT_RPC_URL.to_owned(),
            }],
        };

        Ok(Self {
            bind_addr,
            store_path: env_or("VG_STORE_PATH", DEFAULT_STORE_PATH),
            networks_path: non_empty_env("VG_NETWORKS_PATH"),
            default_network: env_or("VG_DEFAULT_NETWORK", DEFAULT_NETWORK),
            rpc_wallets,
        })
    }

    pub(crate) fn load_networks(&self) -> Result<NetworkConfig> {
        let networks = match &self.networks_path {
            Some(path) => NetworkConfig::from_path(path, &self.default_network)?,
            None => NetworkConfig::builtin().with_default(self.default_network.clone())?,
        };
        Ok(networks)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    non_empty_env(name).unwrap_or_else(|| default.to_owned())
}

pub(crate) fn parse_rpc_wallets(raw: &str) -> Result<Vec<RpcWallet>> {
    let mut wallets: Vec<RpcWallet> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let Some((name, endpoint)) = entry.split_once('=') else {
            bail!("VG_RPC_WALLETS entry `{entry}` must look like Name=url");
        };
        let (name, endpoint) = (name.trim(), endpoint.trim());
        if name.is_empty() || endpoint.is_empty() {
            bail!("VG_RPC_WALLETS entry `{entry}` has an empty name or url");
        }
        if wallets.iter().any(|wallet| wallet.name == name) {
            bail!("VG_RPC_WALLETS lists `{name}` twice");
        }
        wallets.push(RpcWallet {
            name: name.to_owned(),
            endpoint: endpoint.to_owned(),
        });
    }
    Ok(wallets)
}
