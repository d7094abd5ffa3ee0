//! Dedicated thread that owns the connection controller.
//!
//! The controller and its providers are single-threaded, so they live on a
//! current-thread runtime inside a `LocalSet`. HTTP handlers talk to it
//! through [`ControllerHandle`], one command plus a oneshot reply at a time.

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::Value;
use std::rc::Rc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;
use tracing::{debug, info};
use vg_api_types::{
    ChainId, ConnectionEvent, ConnectionStatus, NetworkDescriptor, ProviderInfo, SessionState,
    ViewState,
};
use vg_connect_core::{ConnectError, ConnectOutcome, ConnectionController, EventLog, NetworkConfig};
use vg_provider::StaticDiscovery;
use vg_provider_rpc::JsonRpcProvider;
use vg_storage::KeyValueStore;

use crate::settings::RpcWallet;

const COMMAND_BUFFER: usize = 64;
const UNAVAILABLE: &str = "connection controller is not running";

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Providers(Reply<Vec<ProviderInfo>>),
    RequestProviders(Reply<()>),
    Networks(Reply<Vec<NetworkEntry>>),
    Session(Reply<SessionSnapshot>),
    View(Reply<ViewState>),
    Events(Reply<Vec<ConnectionEvent>>),
    Allowed {
        chain_id: String,
        reply: Reply<AllowedNetwork>,
    },
    Connect {
        name: String,
        reply: Reply<Result<Option<ConnectOutcome>, ConnectError>>,
    },
    Disconnect(Reply<()>),
    SwitchNetwork {
        key: String,
        reply: Reply<Result<bool, ConnectError>>,
    },
    SetVisibility {
        key: String,
        visible: bool,
        reply: Reply<bool>,
    },
    SetRpcOverride {
        key: String,
        url: Option<String>,
        reply: Reply<Result<Option<String>, ConnectError>>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NetworkEntry {
    pub key: String,
    #[serde(flatten)]
    pub network: NetworkDescriptor,
    /// Stored override when present, else the configured URL.
    pub effective_rpc_url: String,
    pub default: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionSnapshot {
    pub session: SessionState,
    pub status: ConnectionStatus,
    pub account: Option<String>,
    pub current_account: Option<String>,
    pub current_chain_id: Option<ChainId>,
    pub network_status: Option<ChainId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AllowedNetwork {
    pub chain_id: Option<ChainId>,
    pub name: String,
    pub allowed: bool,
}

#[derive(Clone)]
pub(crate) struct ControllerHandle {
    tx: mpsc::Sender<Command>,
}

impl ControllerHandle {
    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| anyhow!(UNAVAILABLE))?;
        response.await.map_err(|_| anyhow!(UNAVAILABLE))
    }

    pub(crate) async fn providers(&self) -> Result<Vec<ProviderInfo>> {
        self.call(Command::Providers).await
    }

    pub(crate) async fn request_providers(&self) -> Result<()> {
        self.call(Command::RequestProviders).await
    }

    pub(crate) async fn networks(&self) -> Result<Vec<NetworkEntry>> {
        self.call(Command::Networks).await
    }

    pub(crate) async fn session(&self) -> Result<SessionSnapshot> {
        self.call(Command::Session).await
    }

    pub(crate) async fn view(&self) -> Result<ViewState> {
        self.call(Command::View).await
    }

    pub(crate) async fn events(&self) -> Result<Vec<ConnectionEvent>> {
        self.call(Command::Events).await
    }

    pub(crate) async fn allowed(&self, chain_id: String) -> Result<AllowedNetwork> {
        self.call(|reply| Command::Allowed { chain_id, reply }).await
    }

    pub(crate) async fn connect(
        &self,
        name: String,
    ) -> Result<Result<Option<ConnectOutcome>, ConnectError>> {
        self.call(|reply| Command::Connect { name, reply }).await
    }

    pub(crate) async fn disconnect(&self) -> Result<()> {
        self.call(Command::Disconnect).await
    }

    pub(crate) async fn switch_network(&self, key: String) -> Result<Result<bool, ConnectError>> {
        self.call(|reply| Command::SwitchNetwork { key, reply }).await
    }

    pub(crate) async fn set_visibility(&self, key: String, visible: bool) -> Result<bool> {
        self.call(|reply| Command::SetVisibility { key, visible, reply })
            .await
    }

    pub(crate) async fn set_rpc_override(
        &self,
        key: String,
        url: Option<String>,
    ) -> Result<Result<Option<String>, ConnectError>> {
        self.call(|reply| Command::SetRpcOverride { key, url, reply })
            .await
    }
}

/// Start the controller thread. Each configured RPC wallet is offered to the
/// controller as an announced provider.
pub(crate) fn spawn<S>(
    networks: NetworkConfig,
    store: S,
    wallets: Vec<RpcWallet>,
) -> Result<ControllerHandle>
where
    S: KeyValueStore + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build controller runtime")?;
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);

    std::thread::Builder::new()
        .name("connect-controller".to_owned())
        .spawn(move || {
            let local = LocalSet::new();
            local.block_on(&runtime, drive(networks, store, wallets, rx));
        })
        .context("failed to start controller thread")?;

    Ok(ControllerHandle { tx })
}

async fn drive<S: KeyValueStore + 'static>(
    networks: NetworkConfig,
    store: S,
    wallets: Vec<RpcWallet>,
    mut commands: mpsc::Receiver<Command>,
) {
    let records = wallets
        .into_iter()
        .map(|wallet| JsonRpcProvider::new(wallet.name, Some(wallet.endpoint)).into_record())
        .collect();

    let controller = Rc::new(ConnectionController::new(
        networks,
        store,
        StaticDiscovery::new(records),
    ));
    let log = Rc::new(EventLog::default());
    controller.subscribe(log.clone());

    // The event loop is spawned first, so queued announcements are
    // registered before any command is handled.
    controller.request_providers();
    let events = Rc::clone(&controller);
    tokio::task::spawn_local(async move { events.run().await });
    info!("controller ready");

    while let Some(command) = commands.recv().await {
        tokio::task::spawn_local(handle(Rc::clone(&controller), Rc::clone(&log), command));
    }
    debug!("controller command channel closed");
}

async fn handle<S: KeyValueStore>(
    controller: Rc<ConnectionController<S>>,
    log: Rc<EventLog>,
    command: Command,
) {
    // A dropped receiver means the HTTP request went away; nothing to do.
    match command {
        Command::Providers(reply) => {
            let _ = reply.send(controller.providers());
        }
        Command::RequestProviders(reply) => {
            controller.request_providers();
            let _ = reply.send(());
        }
        Command::Networks(reply) => {
            let networks = controller.networks();
            let entries = networks
                .iter()
                .map(|(key, network)| NetworkEntry {
                    key: key.to_owned(),
                    effective_rpc_url: controller
                        .rpc_url(key)
                        .unwrap_or_else(|| network.rpc_url.clone()),
                    network: network.clone(),
                    default: key == networks.default_key(),
                })
                .collect();
            let _ = reply.send(entries);
        }
        Command::Session(reply) => {
            let snapshot = SessionSnapshot {
                session: controller.session(),
                status: controller.status(),
                account: controller.account(),
                current_account: controller.current_account().await,
                current_chain_id: controller.current_chain_id().await,
                network_status: controller.network_status(),
            };
            let _ = reply.send(snapshot);
        }
        Command::View(reply) => {
            let _ = reply.send(controller.view());
        }
        Command::Events(reply) => {
            let _ = reply.send(log.events());
        }
        Command::Allowed { chain_id, reply } => {
            let raw = chain_id.trim().to_owned();
            let value = Value::String(raw.clone());
            let allowed = AllowedNetwork {
                chain_id: controller.normalize_chain_id(&value),
                name: controller.networks().display_name(&raw),
                allowed: controller.is_allowed_value(&value),
            };
            let _ = reply.send(allowed);
        }
        Command::Connect { name, reply } => {
            let _ = reply.send(controller.connect(&name).await);
        }
        Command::Disconnect(reply) => {
            controller.disconnect().await;
            let _ = reply.send(());
        }
        Command::SwitchNetwork { key, reply } => {
            let _ = reply.send(controller.switch_network_by_key(&key).await);
        }
        Command::SetVisibility { key, visible, reply } => {
            let _ = reply.send(controller.set_network_visible(&key, visible));
        }
        Command::SetRpcOverride { key, url, reply } => {
            let result = controller
                .set_rpc_override(&key, url.as_deref())
                .map(|()| controller.rpc_url(&key));
            let _ = reply.send(result);
        }
    }
}
