use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Numeric chain identifier.
///
/// Wallets report chain ids as `0x`-prefixed hex strings while configuration
/// carries plain integers; both normalize into this type before comparison
/// or storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainIdError {
    #[error("chain id is empty")]
    Empty,
    #[error("invalid chain id: {0}")]
    Invalid(String),
}

impl ChainId {
    /// Accepts a JSON number, a decimal string or a `0x` hex string.
    /// Returns `None` for anything else, including negative or fractional numbers.
    pub fn normalize(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(number) => number.as_u64().map(Self),
            serde_json::Value::String(raw) => raw.parse().ok(),
            _ => None,
        }
    }

    pub fn to_hex(self) -> String {
        format!("{:#x}", self.0)
    }
}

impl From<u64> for ChainId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for ChainId {
    type Err = ChainIdError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ChainIdError::Empty);
        }

        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(digits) => u64::from_str_radix(digits, 16),
            None => trimmed.parse::<u64>(),
        };

        parsed
            .map(Self)
            .map_err(|_| ChainIdError::Invalid(raw.to_owned()))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static network entry, keyed by network key (`ethereum`, `optimism`, ...)
/// in the network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDescriptor {
    pub chain_id: ChainId,
    pub chain_id_hex: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    pub rpc_url: String,
    #[serde(default)]
    pub explorer_url: String,
    #[serde(rename = "showInUI", default)]
    pub show_in_ui: bool,
}

/// EIP-6963 provider info as announced by a wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub rdns: String,
}

/// Persisted record of the last successful connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub connected: bool,
    pub chain_id: Option<ChainId>,
    pub wallet_name: Option<String>,
}

impl SessionState {
    pub fn is_connected_to(&self, wallet_name: &str) -> bool {
        self.connected && self.wallet_name.as_deref() == Some(wallet_name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Reconnecting,
    Connected,
}

/// Lifecycle events emitted by the connection controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ConnectionEvent {
    Connected {
        accounts: Vec<String>,
        chain_id: ChainId,
        provider_name: String,
    },
    Disconnected,
    ChainChanged {
        chain_id: Option<ChainId>,
        raw_chain_id: String,
        name: String,
        allowed: bool,
    },
    AccountChanged {
        account: String,
    },
    ProviderAnnounced {
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderView {
    pub name: String,
    pub icon: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkView {
    pub key: String,
    pub name: String,
    pub icon: String,
    pub chain_id: ChainId,
    pub active: bool,
}

/// Snapshot handed to renderers after every state change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewState {
    pub status: ConnectionStatus,
    pub account: Option<String>,
    pub providers: Vec<ProviderView>,
    pub networks: Vec<NetworkView>,
    pub show_get_wallet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hex_and_decimal_normalize_to_same_id() {
        assert_eq!(ChainId::normalize(&json!("0xa")), Some(ChainId(10)));
        assert_eq!(ChainId::normalize(&json!(10)), Some(ChainId(10)));
        assert_eq!(ChainId::normalize(&json!("10")), Some(ChainId(10)));
        assert_eq!(ChainId::normalize(&json!("0XA")), Some(ChainId(10)));
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = ChainId::normalize(&json!("0x2105")).expect("valid hex");
        let twice = ChainId::normalize(&json!(once)).expect("already normalized");
        assert_eq!(once, twice);
        assert_eq!(once, ChainId(8453));
    }

    #[test]
    fn malformed_values_do_not_normalize() {
        assert_eq!(ChainId::normalize(&json!("0xzz")), None);
        assert_eq!(ChainId::normalize(&json!("")), None);
        assert_eq!(ChainId::normalize(&json!(-1)), None);
        assert_eq!(ChainId::normalize(&json!(1.5)), None);
        assert_eq!(ChainId::normalize(&json!(null)), None);
        assert_eq!("  ".parse::<ChainId>(), Err(ChainIdError::Empty));
    }

    #[test]
    fn hex_rendering_is_unpadded_lowercase() {
        assert_eq!(ChainId(1).to_hex(), "0x1");
        assert_eq!(ChainId(42161).to_hex(), "0xa4b1");
    }

    #[test]
    fn descriptor_reads_camel_case_config() {
        let descriptor: NetworkDescriptor = serde_json::from_value(json!({
            "chainId": 10,
            "chainIdHex": "0xa",
            "name": "Optimism",
            "rpcUrl": "https://mainnet.optimism.io",
            "showInUI": true
        }))
        .expect("descriptor should parse");

        assert_eq!(descriptor.chain_id, ChainId(10));
        assert!(descriptor.show_in_ui);
        assert!(descriptor.explorer_url.is_empty());
    }

    #[test]
    fn chain_changed_event_serializes_camel_case_fields() {
        let event = ConnectionEvent::ChainChanged {
            chain_id: Some(ChainId(5)),
            raw_chain_id: "0x5".to_owned(),
            name: "Unknown (0x5)".to_owned(),
            allowed: false,
        };

        let value = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(value["type"], "chain_changed");
        assert_eq!(value["rawChainId"], "0x5");
        assert_eq!(value["chainId"], 5);
    }
}
