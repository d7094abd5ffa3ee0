use async_trait::async_trait;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use serde_json::Value;
use std::fmt;
use std::rc::Rc;
use tracing::debug;
use vg_api_types::ProviderInfo;

pub mod methods {
    pub const REQUEST_ACCOUNTS: &str = "eth_requestAccounts";
    pub const ACCOUNTS: &str = "eth_accounts";
    pub const CHAIN_ID: &str = "eth_chainId";
    pub const SWITCH_CHAIN: &str = "wallet_switchEthereumChain";
    pub const REVOKE_PERMISSIONS: &str = "wallet_revokePermissions";
}

/// Failure reported by (or while talking to) a wallet provider.
///
/// `Rejected` carries the provider's EIP-1193 error payload untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("{method} rejected by provider ({code}): {message}")]
    Rejected {
        method: String,
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("{method} is not supported by this provider")]
    Unsupported { method: String },
    #[error("transport failure calling {method}: {message}")]
    Transport { method: String, message: String },
    #[error("unexpected response to {method}: {detail}")]
    InvalidResponse { method: String, detail: String },
}

impl ProviderError {
    pub fn rejected(method: &str, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self::Rejected {
            method: method.to_owned(),
            code,
            message: message.into(),
            data,
        }
    }

    pub fn unsupported(method: &str) -> Self {
        Self::Unsupported {
            method: method.to_owned(),
        }
    }

    pub fn invalid_response(method: &str, detail: impl Into<String>) -> Self {
        Self::InvalidResponse {
            method: method.to_owned(),
            detail: detail.into(),
        }
    }

    /// EIP-1193 error code, when the provider supplied one.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Events a provider pushes to its subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<String>),
    ChainChanged(String),
    Disconnect,
}

/// What a provider can do beyond plain `request`, detected once at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub events: bool,
    pub revoke_permissions: bool,
    pub switch_chain: bool,
}

impl ProviderCapabilities {
    pub const fn full() -> Self {
        Self {
            events: true,
            revoke_permissions: true,
            switch_chain: true,
        }
    }

    pub const fn request_only() -> Self {
        Self {
            events: false,
            revoke_permissions: false,
            switch_chain: false,
        }
    }
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self::full()
    }
}

/// Messages flowing into the controller: discovery announcements and
/// events from the subscribed provider.
pub enum Inbound {
    Announce(ProviderRecord),
    Event {
        wallet: String,
        generation: u64,
        event: ProviderEvent,
    },
}

pub type InboundSender = UnboundedSender<Inbound>;
pub type InboundReceiver = UnboundedReceiver<Inbound>;

pub fn inbound_channel() -> (InboundSender, InboundReceiver) {
    unbounded()
}

/// Handed to a provider on subscribe; tags every event with the
/// subscription it belongs to so stale subscriptions can be ignored.
#[derive(Clone)]
pub struct EventSink {
    wallet: String,
    generation: u64,
    tx: InboundSender,
}

impl EventSink {
    pub fn new(wallet: impl Into<String>, generation: u64, tx: InboundSender) -> Self {
        Self {
            wallet: wallet.into(),
            generation,
            tx,
        }
    }

    pub fn wallet(&self) -> &str {
        &self.wallet
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the controller side has gone away.
    pub fn emit(&self, event: ProviderEvent) -> bool {
        self.tx
            .unbounded_send(Inbound::Event {
                wallet: self.wallet.clone(),
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

#[derive(Clone)]
pub struct AnnounceSink {
    tx: InboundSender,
}

impl AnnounceSink {
    pub fn new(tx: InboundSender) -> Self {
        Self { tx }
    }

    pub fn announce(&self, record: ProviderRecord) -> bool {
        self.tx.unbounded_send(Inbound::Announce(record)).is_ok()
    }
}

/// Active event subscription. Dropping it removes the provider listeners.
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(teardown: impl FnOnce() + 'static) -> Self {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    pub fn noop() -> Self {
        Self { teardown: None }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.teardown.is_some())
            .finish()
    }
}

/// EIP-1193 style wallet capability.
#[async_trait(?Send)]
pub trait WalletProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError>;

    /// Attach account, chain and disconnect listeners that forward into `sink`.
    fn subscribe(&self, sink: EventSink) -> Subscription;

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::full()
    }
}

/// A registered provider: announced info plus its handle.
#[derive(Clone)]
pub struct ProviderRecord {
    pub info: ProviderInfo,
    pub handle: Rc<dyn WalletProvider>,
    pub capabilities: ProviderCapabilities,
}

impl ProviderRecord {
    pub fn new(info: ProviderInfo, handle: Rc<dyn WalletProvider>) -> Self {
        let capabilities = handle.capabilities();
        Self {
            info,
            handle,
            capabilities,
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }
}

impl fmt::Debug for ProviderRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRecord")
            .field("info", &self.info)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Announced providers, unique by name, in announcement order.
#[derive(Default)]
pub struct ProviderRegistry {
    records: Vec<ProviderRecord>,
}

impl ProviderRegistry {
    /// First registration for a name wins; later duplicates return false.
    pub fn register(&mut self, record: ProviderRecord) -> bool {
        if self.contains(record.name()) {
            debug!("ignoring duplicate provider announcement for {}", record.name());
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn get(&self, name: &str) -> Option<&ProviderRecord> {
        self.records.iter().find(|record| record.info.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn records(&self) -> &[ProviderRecord] {
        &self.records
    }

    pub fn names(&self) -> Vec<String> {
        self.records.iter().map(|record| record.info.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Broadcasts a discovery request; providers answer through the sink.
pub trait ProviderDiscovery {
    fn request_providers(&self, sink: &AnnounceSink);
}

#[derive(Default)]
pub struct NoopDiscovery;

impl ProviderDiscovery for NoopDiscovery {
    fn request_providers(&self, _sink: &AnnounceSink) {}
}

/// Announces a fixed set of providers on every request.
#[derive(Default, Clone)]
pub struct StaticDiscovery {
    records: Vec<ProviderRecord>,
}

impl StaticDiscovery {
    pub fn new(records: Vec<ProviderRecord>) -> Self {
        Self { records }
    }
}

impl ProviderDiscovery for StaticDiscovery {
    fn request_providers(&self, sink: &AnnounceSink) {
        for record in &self.records {
            sink.announce(record.clone());
        }
    }
}

/// Decode an `eth_accounts`/`eth_requestAccounts` result.
pub fn accounts_from(method: &str, value: Value) -> Result<Vec<String>, ProviderError> {
    let Value::Array(entries) = value else {
        return Err(ProviderError::invalid_response(method, "expected an array of accounts"));
    };

    entries
        .into_iter()
        .map(|entry| match entry {
            Value::String(account) => Ok(account),
            other => Err(ProviderError::invalid_response(
                method,
                format!("account entry is not a string: {other}"),
            )),
        })
        .collect()
}

/// Decode an `eth_chainId` result into its raw textual form.
pub fn raw_chain_id_from(method: &str, value: Value) -> Result<String, ProviderError> {
    match value {
        Value::String(raw) => Ok(raw),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(ProviderError::invalid_response(
            method,
            format!("chain id is neither string nor number: {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use std::cell::Cell;

    struct SilentProvider {
        capabilities: ProviderCapabilities,
    }

    #[async_trait(?Send)]
    impl WalletProvider for SilentProvider {
        async fn request(&self, method: &str, _params: Value) -> Result<Value, ProviderError> {
            Err(ProviderError::unsupported(method))
        }

        fn subscribe(&self, _sink: EventSink) -> Subscription {
            Subscription::noop()
        }

        fn capabilities(&self) -> ProviderCapabilities {
            self.capabilities
        }
    }

    fn record(name: &str, icon: &str) -> ProviderRecord {
        ProviderRecord::new(
            ProviderInfo {
                name: name.to_owned(),
                icon: icon.to_owned(),
                ..ProviderInfo::default()
            },
            Rc::new(SilentProvider {
                capabilities: ProviderCapabilities::full(),
            }),
        )
    }

    #[test]
    fn registry_keeps_first_registration_per_name() {
        let mut registry = ProviderRegistry::default();
        assert!(registry.register(record("MetaMask", "first.svg")));
        assert!(!registry.register(record("MetaMask", "second.svg")));
        assert!(registry.register(record("Rabby", "rabby.svg")));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("MetaMask").map(|r| r.info.icon.as_str()), Some("first.svg"));
        assert_eq!(registry.names(), vec!["MetaMask".to_owned(), "Rabby".to_owned()]);
    }

    #[test]
    fn capabilities_are_captured_at_registration() {
        let record = ProviderRecord::new(
            ProviderInfo {
                name: "Node".to_owned(),
                ..ProviderInfo::default()
            },
            Rc::new(SilentProvider {
                capabilities: ProviderCapabilities::request_only(),
            }),
        );
        assert!(!record.capabilities.events);
        assert!(!record.capabilities.switch_chain);
    }

    #[test]
    fn dropping_subscription_runs_teardown_once() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let subscription = Subscription::new(move || counter.set(counter.get() + 1));
        drop(subscription);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn event_sink_tags_events_with_generation() {
        let (tx, mut rx) = inbound_channel();
        let sink = EventSink::new("MetaMask", 3, tx);
        assert!(sink.emit(ProviderEvent::ChainChanged("0x1".to_owned())));
        drop(sink);

        match rx.next().await {
            Some(Inbound::Event {
                wallet,
                generation,
                event,
            }) => {
                assert_eq!(wallet, "MetaMask");
                assert_eq!(generation, 3);
                assert_eq!(event, ProviderEvent::ChainChanged("0x1".to_owned()));
            }
            _ => panic!("expected a provider event"),
        }
        assert!(rx.next().await.is_none());
    }

    #[test]
    fn static_discovery_announces_every_record() {
        let (tx, mut rx) = inbound_channel();
        let discovery = StaticDiscovery::new(vec![record("A", ""), record("B", "")]);
        discovery.request_providers(&AnnounceSink::new(tx));

        let mut names = Vec::new();
        while let Ok(Some(Inbound::Announce(record))) = rx.try_next() {
            names.push(record.info.name);
        }
        assert_eq!(names, vec!["A".to_owned(), "B".to_owned()]);
    }

    #[test]
    fn account_and_chain_results_are_decoded() {
        let accounts = accounts_from(methods::ACCOUNTS, json!(["0xabc", "0xdef"])).expect("accounts");
        assert_eq!(accounts, vec!["0xabc".to_owned(), "0xdef".to_owned()]);

        let err = accounts_from(methods::ACCOUNTS, json!({"0": "0xabc"})).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse { .. }));

        assert_eq!(raw_chain_id_from(methods::CHAIN_ID, json!("0x1")).expect("chain"), "0x1");
        assert_eq!(raw_chain_id_from(methods::CHAIN_ID, json!(10)).expect("chain"), "10");
        assert!(raw_chain_id_from(methods::CHAIN_ID, json!(null)).is_err());
    }

    #[test]
    fn rejected_error_exposes_code() {
        let err = ProviderError::rejected(methods::REQUEST_ACCOUNTS, 4001, "User rejected the request.", None);
        assert_eq!(err.code(), Some(4001));
        assert_eq!(
            err.to_string(),
            "eth_requestAccounts rejected by provider (4001): User rejected the request."
        );
    }
}
