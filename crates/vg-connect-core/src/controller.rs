use futures::future::{FutureExt, LocalBoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{Value, json};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, error, info, warn};
use vg_api_types::{
    ChainId, ConnectionEvent, ConnectionStatus, NetworkDescriptor, NetworkView, ProviderInfo,
    ProviderView, SessionState, ViewState,
};
use vg_provider::{
    AnnounceSink, EventSink, Inbound, InboundReceiver, InboundSender, ProviderDiscovery,
    ProviderError, ProviderEvent, ProviderRecord, ProviderRegistry, Subscription, accounts_from,
    inbound_channel, methods, raw_chain_id_from,
};
use vg_storage::{KeyValueStore, SessionStore};

use crate::config::NetworkConfig;
use crate::observer::ConnectionObserver;

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("provider returned no accounts")]
    NoAccounts,
    #[error("unknown network: {0}")]
    UnknownNetwork(String),
    #[error("session storage failure: {0:#}")]
    Storage(#[source] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOutcome {
    pub accounts: Vec<String>,
    pub chain_id: ChainId,
    pub raw_chain_id: String,
    pub provider_name: String,
}

enum Registration {
    Duplicate,
    Added,
    Reconnect(String),
}

struct ActiveProvider {
    wallet: String,
    generation: u64,
    _subscription: Option<Subscription>,
}

struct State {
    registry: ProviderRegistry,
    networks: NetworkConfig,
    status: ConnectionStatus,
    account: Option<String>,
    active: Option<ActiveProvider>,
    generation: u64,
}

/// Wallet connection state machine.
///
/// Single-threaded: every method takes `&self`, state lives behind a
/// `RefCell`, and no borrow is held across an await. Concurrent `connect`
/// calls are not serialized; whichever finishes last owns the session.
pub struct ConnectionController<S> {
    state: RefCell<State>,
    session: SessionStore<S>,
    discovery: Box<dyn ProviderDiscovery>,
    observers: RefCell<Vec<Rc<dyn ConnectionObserver>>>,
    inbound_tx: InboundSender,
    inbound_rx: RefCell<Option<InboundReceiver>>,
}

impl<S: KeyValueStore> ConnectionController<S> {
    pub fn new(networks: NetworkConfig, store: S, discovery: impl ProviderDiscovery + 'static) -> Self {
        let (inbound_tx, inbound_rx) = inbound_channel();
        let controller = Self {
            state: RefCell::new(State {
                registry: ProviderRegistry::default(),
                networks,
                status: ConnectionStatus::Disconnected,
                account: None,
                active: None,
                generation: 0,
            }),
            session: SessionStore::new(store),
            discovery: Box::new(discovery),
            observers: RefCell::new(Vec::new()),
            inbound_tx,
            inbound_rx: RefCell::new(Some(inbound_rx)),
        };
        controller.restore_network_status();
        controller
    }

    pub fn subscribe(&self, observer: Rc<dyn ConnectionObserver>) {
        self.observers.borrow_mut().push(observer);
    }

    /// Sink for hosts that receive announcements outside `request_providers`.
    pub fn announce_sink(&self) -> AnnounceSink {
        AnnounceSink::new(self.inbound_tx.clone())
    }

    pub fn request_providers(&self) {
        debug!("requesting provider announcements");
        self.discovery.request_providers(&self.announce_sink());
    }

    /// Handle every queued announcement and provider event, then await the
    /// work they started (reconnects, disconnects). Messages queued while
    /// that work runs are handled too. Returns how many messages were handled.
    pub async fn process_pending(&self) -> usize {
        let mut handled = 0;
        let mut in_flight = FuturesUnordered::new();
        loop {
            while let Some(message) = self.try_next_inbound() {
                in_flight.extend(self.dispatch(message));
                handled += 1;
            }
            if in_flight.next().await.is_none() {
                break;
            }
        }
        handled
    }

    /// Drive announcements and provider events for the lifetime of the host.
    ///
    /// Registration and state updates happen as each message arrives; provider
    /// round trips they trigger run alongside, so a wallet waiting on its user
    /// never holds up other announcements or events.
    pub async fn run(&self) {
        let Some(mut rx) = self.inbound_rx.borrow_mut().take() else {
            warn!("connection event loop is already running");
            return;
        };
        let mut in_flight = FuturesUnordered::new();
        loop {
            futures::select_biased! {
                message = rx.next() => match message {
                    Some(message) => in_flight.extend(self.dispatch(message)),
                    None => break,
                },
                () = in_flight.select_next_some() => {}
            }
        }
        while in_flight.next().await.is_some() {}
    }

    fn try_next_inbound(&self) -> Option<Inbound> {
        self.inbound_rx
            .borrow_mut()
            .as_mut()
            .and_then(|rx| rx.try_recv().ok())
    }

    /// Apply a message synchronously; returns the provider work it starts.
    fn dispatch(&self, message: Inbound) -> Option<LocalBoxFuture<'_, ()>> {
        match message {
            Inbound::Announce(record) => match self.register(record) {
                Registration::Reconnect(name) => {
                    Some(async move { self.reconnect(&name).await }.boxed_local())
                }
                Registration::Added | Registration::Duplicate => None,
            },
            Inbound::Event {
                wallet,
                generation,
                event,
            } => {
                let current = self
                    .state
                    .borrow()
                    .active
                    .as_ref()
                    .is_some_and(|active| active.wallet == wallet && active.generation == generation);
                if !current {
                    debug!("dropping {:?} from stale subscription on {}", event, wallet);
                    return None;
                }
                self.apply_provider_event(event)
            }
        }
    }

    /// Register an announced provider. A new provider matching the persisted
    /// connected wallet triggers one reconnect attempt.
    pub async fn announce(&self, record: ProviderRecord) -> bool {
        match self.register(record) {
            Registration::Duplicate => false,
            Registration::Added => true,
            Registration::Reconnect(name) => {
                self.reconnect(&name).await;
                true
            }
        }
    }

    fn register(&self, record: ProviderRecord) -> Registration {
        let name = record.info.name.clone();
        if !self.state.borrow_mut().registry.register(record) {
            return Registration::Duplicate;
        }

        info!("provider announced: {}", name);
        self.emit(ConnectionEvent::ProviderAnnounced { name: name.clone() });
        self.render();

        if self.session().is_connected_to(&name) {
            Registration::Reconnect(name)
        } else {
            Registration::Added
        }
    }

    async fn reconnect(&self, name: &str) {
        self.set_status(ConnectionStatus::Reconnecting);
        self.render();

        match self.connect(name).await {
            Ok(Some(_)) => info!("restored session with {}", name),
            Ok(None) => {
                self.set_status(ConnectionStatus::Disconnected);
                self.render();
            }
            Err(err) => {
                warn!("reconnect to {} failed: {}", name, err);
                let mut state = self.state.borrow_mut();
                if state.status == ConnectionStatus::Reconnecting {
                    state.status = ConnectionStatus::Disconnected;
                }
                drop(state);
                self.render();
            }
        }
    }

    /// Connect to a registered provider by name. `Ok(None)` when no provider
    /// has that name.
    pub async fn connect(&self, name: &str) -> Result<Option<ConnectOutcome>, ConnectError> {
        let Some(record) = self.state.borrow().registry.get(name).cloned() else {
            debug!("connect ignored: no provider named {}", name);
            return Ok(None);
        };

        match self.establish(&record).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(err) => {
                error!("connection to {} failed: {}", name, err);
                Err(err)
            }
        }
    }

    async fn establish(&self, record: &ProviderRecord) -> Result<ConnectOutcome, ConnectError> {
        let name = record.name().to_owned();
        let handle = record.handle.clone();

        let (accounts, chain) = futures::future::try_join(
            handle.request(methods::REQUEST_ACCOUNTS, json!([])),
            handle.request(methods::CHAIN_ID, json!([])),
        )
        .await?;

        let accounts = accounts_from(methods::REQUEST_ACCOUNTS, accounts)?;
        let raw_chain_id = raw_chain_id_from(methods::CHAIN_ID, chain)?;
        let chain_id = raw_chain_id.parse::<ChainId>().map_err(|err| {
            ProviderError::invalid_response(methods::CHAIN_ID, err.to_string())
        })?;
        let account = accounts.first().cloned().ok_or(ConnectError::NoAccounts)?;

        self.session
            .save_connection(&name, chain_id)
            .map_err(ConnectError::Storage)?;

        self.install_subscription(record);
        {
            let mut state = self.state.borrow_mut();
            state.account = Some(account);
            state.status = ConnectionStatus::Connected;
        }
        self.update_network_status(chain_id);

        info!("connected to {} on chain {}", name, chain_id);
        self.emit(ConnectionEvent::Connected {
            accounts: accounts.clone(),
            chain_id,
            provider_name: name.clone(),
        });
        self.render();

        Ok(ConnectOutcome {
            accounts,
            chain_id,
            raw_chain_id,
            provider_name: name,
        })
    }

    /// At most one provider is subscribed; reconnecting to the same provider
    /// keeps its subscription.
    fn install_subscription(&self, record: &ProviderRecord) {
        let name = record.name();
        let previous = {
            let mut state = self.state.borrow_mut();
            if state.active.as_ref().is_some_and(|active| active.wallet == name) {
                return;
            }
            state.generation += 1;
            state.active.take()
        };
        drop(previous);

        let generation = self.state.borrow().generation;
        let subscription = if record.capabilities.events {
            let sink = EventSink::new(name, generation, self.inbound_tx.clone());
            Some(record.handle.subscribe(sink))
        } else {
            debug!("{} does not emit events; skipping subscription", name);
            None
        };

        self.state.borrow_mut().active = Some(ActiveProvider {
            wallet: name.to_owned(),
            generation,
            _subscription: subscription,
        });
    }

    /// Revoke permissions (best effort), drop the subscription and clear the
    /// persisted session. Never fails.
    pub async fn disconnect(&self) {
        if let Some(record) = self.connected_provider() {
            if record.capabilities.revoke_permissions {
                let params = json!([{ "eth_accounts": {} }]);
                if let Err(err) = record
                    .handle
                    .request(methods::REVOKE_PERMISSIONS, params)
                    .await
                {
                    warn!("revoking permissions on {} failed: {}", record.name(), err);
                }
            } else {
                debug!("{} cannot revoke permissions", record.name());
            }
        }

        let previous = {
            let mut state = self.state.borrow_mut();
            state.status = ConnectionStatus::Disconnected;
            state.account = None;
            state.active.take()
        };
        drop(previous);

        if let Err(err) = self.session.clear() {
            warn!("failed to clear persisted session: {:#}", err);
        }

        info!("wallet disconnected");
        self.emit(ConnectionEvent::Disconnected);
        self.reset_network_status();
        self.render();
    }

    /// Ask the connected provider to switch chains. `Ok(false)` when no
    /// provider is connected.
    pub async fn switch_network(&self, network: &NetworkDescriptor) -> Result<bool, ConnectError> {
        let Some(record) = self.connected_provider() else {
            debug!("switch to {} ignored: no connected provider", network.name);
            return Ok(false);
        };

        if !record.capabilities.switch_chain {
            let err = ProviderError::unsupported(methods::SWITCH_CHAIN);
            error!("network switch to {} failed: {}", network.name, err);
            return Err(err.into());
        }

        let params = json!([{ "chainId": network.chain_id_hex }]);
        if let Err(err) = record.handle.request(methods::SWITCH_CHAIN, params).await {
            error!("network switch to {} failed: {}", network.name, err);
            return Err(err.into());
        }

        self.session
            .save_chain_id(network.chain_id)
            .map_err(ConnectError::Storage)?;
        self.update_network_status(network.chain_id);

        info!("switched {} to {}", record.name(), network.name);
        self.render();
        Ok(true)
    }

    pub async fn switch_network_by_key(&self, key: &str) -> Result<bool, ConnectError> {
        let network = self
            .network(key)
            .ok_or_else(|| ConnectError::UnknownNetwork(key.to_owned()))?;
        self.switch_network(&network).await
    }

    pub async fn handle_provider_event(&self, event: ProviderEvent) {
        if let Some(work) = self.apply_provider_event(event) {
            work.await;
        }
    }

    fn apply_provider_event(&self, event: ProviderEvent) -> Option<LocalBoxFuture<'_, ()>> {
        match event {
            ProviderEvent::AccountsChanged(accounts) => match accounts.into_iter().next() {
                Some(account) => {
                    debug!("active account changed to {}", account);
                    self.state.borrow_mut().account = Some(account.clone());
                    self.emit(ConnectionEvent::AccountChanged { account });
                    self.render();
                    None
                }
                None => {
                    info!("provider reported no accounts; disconnecting");
                    Some(self.disconnect().boxed_local())
                }
            },
            ProviderEvent::ChainChanged(raw) => {
                self.handle_chain_changed(raw);
                None
            }
            ProviderEvent::Disconnect => {
                info!("provider disconnected");
                Some(self.disconnect().boxed_local())
            }
        }
    }

    fn handle_chain_changed(&self, raw_chain_id: String) {
        let chain_id = raw_chain_id.parse::<ChainId>().ok();
        let (name, allowed) = {
            let state = self.state.borrow();
            let allowed = chain_id.is_some_and(|id| state.networks.is_allowed(id));
            (state.networks.display_name(&raw_chain_id), allowed)
        };

        match chain_id {
            Some(id) => {
                if let Err(err) = self.session.save_chain_id(id) {
                    warn!("failed to persist chain id {}: {:#}", id, err);
                }
                self.update_network_status(id);
            }
            None => {
                warn!("provider reported malformed chain id {}", raw_chain_id);
                if let Err(err) = self.session.clear_network_status() {
                    warn!("failed to clear network status: {:#}", err);
                }
            }
        }

        self.emit(ConnectionEvent::ChainChanged {
            chain_id,
            raw_chain_id,
            name,
            allowed,
        });
        self.render();
    }

    pub fn normalize_chain_id(&self, value: &Value) -> Option<ChainId> {
        ChainId::normalize(value)
    }

    pub fn is_allowed(&self, chain_id: ChainId) -> bool {
        self.state.borrow().networks.is_allowed(chain_id)
    }

    /// `is_allowed` for a raw hex string or number; malformed values are never allowed.
    pub fn is_allowed_value(&self, value: &Value) -> bool {
        ChainId::normalize(value).is_some_and(|chain_id| self.is_allowed(chain_id))
    }

    /// Show or hide a network. Returns false for unknown keys.
    pub fn set_network_visible(&self, key: &str, visible: bool) -> bool {
        let changed = self.state.borrow_mut().networks.set_visible(key, visible);
        if changed {
            self.render();
        }
        changed
    }

    pub fn network(&self, key: &str) -> Option<NetworkDescriptor> {
        self.state.borrow().networks.get(key).cloned()
    }

    pub fn networks(&self) -> NetworkConfig {
        self.state.borrow().networks.clone()
    }

    /// Stored RPC override for the network, else its configured URL.
    pub fn rpc_url(&self, key: &str) -> Option<String> {
        let configured = self.network(key)?.rpc_url;
        match self.session.rpc_override(key) {
            Ok(Some(url)) => Some(url),
            Ok(None) => Some(configured),
            Err(err) => {
                warn!("failed to read rpc override for {}: {:#}", key, err);
                Some(configured)
            }
        }
    }

    pub fn set_rpc_override(&self, key: &str, url: Option<&str>) -> Result<(), ConnectError> {
        if self.network(key).is_none() {
            return Err(ConnectError::UnknownNetwork(key.to_owned()));
        }
        self.session
            .set_rpc_override(key, url)
            .map_err(ConnectError::Storage)
    }

    /// First account reported by the connected provider.
    pub async fn current_account(&self) -> Option<String> {
        let record = self.connected_provider()?;
        let accounts = record
            .handle
            .request(methods::ACCOUNTS, json!([]))
            .await
            .and_then(|value| accounts_from(methods::ACCOUNTS, value));
        match accounts {
            Ok(accounts) => accounts.into_iter().next(),
            Err(err) => {
                error!("failed to get account: {}", err);
                None
            }
        }
    }

    pub async fn current_chain_id(&self) -> Option<ChainId> {
        let record = self.connected_provider()?;
        let raw = record
            .handle
            .request(methods::CHAIN_ID, json!([]))
            .await
            .and_then(|value| raw_chain_id_from(methods::CHAIN_ID, value));
        match raw {
            Ok(raw) => raw.parse().ok(),
            Err(err) => {
                error!("failed to get chain id: {}", err);
                None
            }
        }
    }

    pub fn session(&self) -> SessionState {
        self.session.load().unwrap_or_else(|err| {
            warn!("failed to load persisted session: {:#}", err);
            SessionState::default()
        })
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.borrow().status
    }

    pub fn account(&self) -> Option<String> {
        self.state.borrow().account.clone()
    }

    pub fn providers(&self) -> Vec<ProviderInfo> {
        self.state
            .borrow()
            .registry
            .records()
            .iter()
            .map(|record| record.info.clone())
            .collect()
    }

    /// Chain id the UI currently shows, if it is a visible network.
    pub fn network_status(&self) -> Option<ChainId> {
        match self.session.network_status() {
            Ok(raw) => raw.and_then(|raw| raw.parse().ok()),
            Err(err) => {
                warn!("failed to read network status: {:#}", err);
                None
            }
        }
    }

    pub fn view(&self) -> ViewState {
        let session = self.session();
        let state = self.state.borrow();

        let providers = state
            .registry
            .records()
            .iter()
            .map(|record| ProviderView {
                name: record.info.name.clone(),
                icon: record.info.icon.clone(),
                active: session.wallet_name.as_deref() == Some(record.info.name.as_str()),
            })
            .collect();

        let networks = state
            .networks
            .visible()
            .map(|(key, network)| NetworkView {
                key: key.to_owned(),
                name: network.name.clone(),
                icon: network.icon.clone(),
                chain_id: network.chain_id,
                active: session.connected && session.chain_id == Some(network.chain_id),
            })
            .collect();

        ViewState {
            status: state.status,
            account: state.account.clone(),
            providers,
            networks,
            show_get_wallet: state.registry.is_empty(),
        }
    }

    fn connected_provider(&self) -> Option<ProviderRecord> {
        let wallet = match self.session.last_wallet() {
            Ok(wallet) => wallet?,
            Err(err) => {
                warn!("failed to read last wallet: {:#}", err);
                return None;
            }
        };
        self.state.borrow().registry.get(&wallet).cloned()
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.state.borrow_mut().status = status;
    }

    fn update_network_status(&self, chain_id: ChainId) {
        let result = if self.is_allowed(chain_id) {
            self.session.set_network_status(chain_id)
        } else {
            self.session.clear_network_status()
        };
        if let Err(err) = result {
            warn!("failed to persist network status: {:#}", err);
        }
    }

    fn reset_network_status(&self) {
        let default = self.state.borrow().networks.default_network().map(|n| n.chain_id);
        match default {
            Some(chain_id) => self.update_network_status(chain_id),
            None => warn!("default network is not configured"),
        }
    }

    fn restore_network_status(&self) {
        match self.network_status() {
            Some(chain_id) => self.update_network_status(chain_id),
            None => self.reset_network_status(),
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        let observers = self.observers.borrow().clone();
        for observer in observers {
            observer.on_event(&event);
        }
    }

    fn render(&self) {
        let observers = self.observers.borrow().clone();
        if observers.is_empty() {
            return;
        }
        let view = self.view();
        for observer in observers {
            observer.render(&view);
        }
    }
}
