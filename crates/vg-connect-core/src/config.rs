use std::collections::BTreeMap;
use std::path::Path;
use vg_api_types::{ChainId, NetworkDescriptor};

pub const DEFAULT_NETWORK: &str = "ethereum";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("network configuration is empty")]
    Empty,
    #[error("network {key}: chainIdHex {hex} does not match chainId {chain_id}")]
    HexMismatch {
        key: String,
        hex: String,
        chain_id: ChainId,
    },
    #[error("default network {0} is not configured")]
    UnknownDefault(String),
    #[error("invalid network configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read network configuration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Networks keyed by network key, plus the key of the network the UI falls
/// back to after a disconnect.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    networks: BTreeMap<String, NetworkDescriptor>,
    default_network: String,
}

impl NetworkConfig {
    pub fn new(
        networks: BTreeMap<String, NetworkDescriptor>,
        default_network: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let default_network = default_network.into();

        if networks.is_empty() {
            return Err(ConfigError::Empty);
        }

        for (key, network) in &networks {
            let matches = network
                .chain_id_hex
                .parse::<ChainId>()
                .is_ok_and(|parsed| parsed == network.chain_id);
            if !matches {
                return Err(ConfigError::HexMismatch {
                    key: key.clone(),
                    hex: network.chain_id_hex.clone(),
                    chain_id: network.chain_id,
                });
            }
        }

        if !networks.contains_key(&default_network) {
            return Err(ConfigError::UnknownDefault(default_network));
        }

        Ok(Self {
            networks,
            default_network,
        })
    }

    /// Parse a JSON object of network key → descriptor.
    pub fn from_json(raw: &str, default_network: &str) -> Result<Self, ConfigError> {
        let networks: BTreeMap<String, NetworkDescriptor> = serde_json::from_str(raw)?;
        Self::new(networks, default_network)
    }

    pub fn from_path(path: impl AsRef<Path>, default_network: &str) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw, default_network)
    }

    pub fn builtin() -> Self {
        let networks = [
            ("ethereum", 1, "Ethereum", "https://ethereum-rpc.publicnode.com", "https://etherscan.io", true),
            ("optimism", 10, "Optimism", "https://mainnet.optimism.io", "https://optimistic.etherscan.io", true),
            ("base", 8453, "Base", "https://mainnet.base.org", "https://basescan.org", true),
            ("arbitrum", 42161, "Arbitrum One", "https://arb1.arbitrum.io/rpc", "https://arbiscan.io", true),
            (
                "sepolia",
                11155111,
                "Sepolia",
                "https://ethereum-sepolia-rpc.publicnode.com",
                "https://sepolia.etherscan.io",
                false,
            ),
        ]
        .into_iter()
        .map(|(key, chain_id, name, rpc_url, explorer_url, show_in_ui)| {
            let chain_id = ChainId(chain_id);
            (
                key.to_owned(),
                NetworkDescriptor {
                    chain_id,
                    chain_id_hex: chain_id.to_hex(),
                    name: name.to_owned(),
                    icon: format!("icons/{key}.svg"),
                    rpc_url: rpc_url.to_owned(),
                    explorer_url: explorer_url.to_owned(),
                    show_in_ui,
                },
            )
        })
        .collect();

        Self {
            networks,
            default_network: DEFAULT_NETWORK.to_owned(),
        }
    }

    /// Replace the fallback network; it must be one of the configured keys.
    pub fn with_default(mut self, default_network: impl Into<String>) -> Result<Self, ConfigError> {
        let default_network = default_network.into();
        if !self.networks.contains_key(&default_network) {
            return Err(ConfigError::UnknownDefault(default_network));
        }
        self.default_network = default_network;
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&NetworkDescriptor> {
        self.networks.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NetworkDescriptor)> {
        self.networks.iter().map(|(key, network)| (key.as_str(), network))
    }

    pub fn visible(&self) -> impl Iterator<Item = (&str, &NetworkDescriptor)> {
        self.iter().filter(|(_, network)| network.show_in_ui)
    }

    pub fn default_key(&self) -> &str {
        &self.default_network
    }

    pub fn default_network(&self) -> Option<&NetworkDescriptor> {
        self.networks.get(&self.default_network)
    }

    pub fn by_chain_id(&self, chain_id: ChainId) -> Option<(&str, &NetworkDescriptor)> {
        self.iter().find(|(_, network)| network.chain_id == chain_id)
    }

    /// Whether the chain belongs to a network shown in the UI.
    pub fn is_allowed(&self, chain_id: ChainId) -> bool {
        self.visible().any(|(_, network)| network.chain_id == chain_id)
    }

    /// Configured name for a raw chain id, or `Unknown (<raw>)`.
    pub fn display_name(&self, raw_chain_id: &str) -> String {
        let by_id = raw_chain_id
            .parse::<ChainId>()
            .ok()
            .and_then(|chain_id| self.by_chain_id(chain_id));
        let by_hex = || {
            self.iter()
                .find(|(_, network)| network.chain_id_hex == raw_chain_id)
        };

        match by_id.or_else(by_hex) {
            Some((_, network)) => network.name.clone(),
            None => format!("Unknown ({raw_chain_id})"),
        }
    }

    /// Returns false when the key is not configured.
    pub fn set_visible(&mut self, key: &str, visible: bool) -> bool {
        match self.networks.get_mut(key) {
            Some(network) => {
                network.show_in_ui = visible;
                true
            }
            None => false,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::builtin()
    }
}
