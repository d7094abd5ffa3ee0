//! Vaultgate Connect browser bindings.
//!
//! Exposes [`ConnectWallet`] to JavaScript: EIP-6963 discovery, EIP-1193
//! providers, `localStorage` sessions, and callbacks for every state change.

pub mod callbacks;
pub mod discovery;
pub mod eip1193;
pub mod storage;

use serde::Serialize;
use std::rc::Rc;
use vg_connect_core::{
    ConfigError, ConnectError, ConnectOutcome, ConnectionController, DEFAULT_NETWORK,
    NetworkConfig,
};
use vg_provider::ProviderError;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

use crate::callbacks::JsCallbacks;
use crate::discovery::{AnnounceListener, Eip6963Discovery};
use crate::eip1193::js_to_json;
use crate::storage::BrowserStore;

type Controller = ConnectionController<BrowserStore>;

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    // Controller logs go to the browser console.
    wasm_tracing::set_as_global_default();
}

pub(crate) fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(Into::into)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectedWallet {
    accounts: Vec<String>,
    chain_id: u64,
    raw_chain_id: String,
    provider_name: String,
}

impl From<ConnectOutcome> for ConnectedWallet {
    fn from(outcome: ConnectOutcome) -> Self {
        Self {
            accounts: outcome.accounts,
            chain_id: outcome.chain_id.0,
            raw_chain_id: outcome.raw_chain_id,
            provider_name: outcome.provider_name,
        }
    }
}

/// Rejected promise payload; wallet rejections keep their code and data.
#[derive(Serialize)]
struct ErrorPayload {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

fn connect_error(err: ConnectError) -> JsValue {
    let message = err.to_string();
    let (code, data) = match err {
        ConnectError::Provider(ProviderError::Rejected { code, data, .. }) => (Some(code), data),
        _ => (None, None),
    };
    to_js(&ErrorPayload {
        message: message.clone(),
        code,
        data,
    })
    .unwrap_or_else(|_| JsValue::from_str(&message))
}

fn js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn load_networks(
    networks_json: Option<&str>,
    default_network: Option<&str>,
) -> Result<NetworkConfig, ConfigError> {
    let default_network = default_network.unwrap_or(DEFAULT_NETWORK);
    match networks_json {
        Some(raw) => NetworkConfig::from_json(raw, default_network),
        None => NetworkConfig::builtin().with_default(default_network),
    }
}

/// Wallet connection widget backend.
///
/// ```js
/// const wallet = new ConnectWallet();
/// wallet.onRender((view) => draw(view));
/// await wallet.connect("MetaMask");
/// ```
#[wasm_bindgen]
pub struct ConnectWallet {
    controller: Rc<Controller>,
    callbacks: Rc<JsCallbacks>,
    _announcements: AnnounceListener,
}

#[wasm_bindgen]
impl ConnectWallet {
    /// `networksJson` is an object of network key to descriptor; builtin
    /// networks are used when omitted. `defaultNetwork` names the network
    /// shown after a disconnect and defaults to `ethereum`.
    #[wasm_bindgen(constructor)]
    pub fn new(
        networks_json: Option<String>,
        default_network: Option<String>,
    ) -> Result<ConnectWallet, JsValue> {
        let networks = load_networks(networks_json.as_deref(), default_network.as_deref())
            .map_err(js_error)?;

        let controller = Rc::new(Controller::new(networks, BrowserStore, Eip6963Discovery));
        let callbacks = Rc::new(JsCallbacks::default());
        controller.subscribe(callbacks.clone());

        let announcements = AnnounceListener::install(controller.announce_sink())?;

        let events = Rc::clone(&controller);
        wasm_bindgen_futures::spawn_local(async move { events.run().await });

        controller.request_providers();
        tracing::info!("vaultgate connect ready on {}", controller.networks().default_key());

        Ok(Self {
            controller,
            callbacks,
            _announcements: announcements,
        })
    }

    #[wasm_bindgen(js_name = requestProviders)]
    pub fn request_providers(&self) {
        self.controller.request_providers();
    }

    /// Resolves with the connected wallet, or `null` when no provider has that name.
    pub fn connect(&self, name: String) -> js_sys::Promise {
        let controller = Rc::clone(&self.controller);
        future_to_promise(async move {
            match controller.connect(&name).await.map_err(connect_error)? {
                Some(outcome) => to_js(&ConnectedWallet::from(outcome)),
                None => Ok(JsValue::NULL),
            }
        })
    }

    pub fn disconnect(&self) -> js_sys::Promise {
        let controller = Rc::clone(&self.controller);
        future_to_promise(async move {
            controller.disconnect().await;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Resolves `false` when no wallet is connected.
    #[wasm_bindgen(js_name = switchNetwork)]
    pub fn switch_network(&self, key: String) -> js_sys::Promise {
        let controller = Rc::clone(&self.controller);
        future_to_promise(async move {
            let switched = controller
                .switch_network_by_key(&key)
                .await
                .map_err(connect_error)?;
            Ok(JsValue::from_bool(switched))
        })
    }

    #[wasm_bindgen(js_name = isAllowed)]
    pub fn is_allowed(&self, chain_id: JsValue) -> bool {
        self.controller.is_allowed_value(&js_to_json(&chain_id))
    }

    /// Number for a valid hex string or number, otherwise `null`.
    #[wasm_bindgen(js_name = normalizeChainId)]
    pub fn normalize_chain_id(&self, chain_id: JsValue) -> Option<f64> {
        self.controller
            .normalize_chain_id(&js_to_json(&chain_id))
            .map(|chain_id| chain_id.0 as f64)
    }

    #[wasm_bindgen(js_name = getAccount)]
    pub fn get_account(&self) -> js_sys::Promise {
        let controller = Rc::clone(&self.controller);
        future_to_promise(async move {
            Ok(controller
                .current_account()
                .await
                .map(|account| JsValue::from_str(&account))
                .unwrap_or(JsValue::NULL))
        })
    }

    #[wasm_bindgen(js_name = getChainId)]
    pub fn get_chain_id(&self) -> js_sys::Promise {
        let controller = Rc::clone(&self.controller);
        future_to_promise(async move {
            Ok(controller
                .current_chain_id()
                .await
                .map(|chain_id| JsValue::from_f64(chain_id.0 as f64))
                .unwrap_or(JsValue::NULL))
        })
    }

    pub fn session(&self) -> Result<JsValue, JsValue> {
        to_js(&self.controller.session())
    }

    pub fn view(&self) -> Result<JsValue, JsValue> {
        to_js(&self.controller.view())
    }

    pub fn providers(&self) -> Result<JsValue, JsValue> {
        to_js(&self.controller.providers())
    }

    pub fn networks(&self) -> Result<JsValue, JsValue> {
        let networks = self.controller.networks();
        let entries: serde_json::Map<String, serde_json::Value> = networks
            .iter()
            .filter_map(|(key, network)| {
                serde_json::to_value(network)
                    .ok()
                    .map(|value| (key.to_owned(), value))
            })
            .collect();
        to_js(&entries)
    }

    #[wasm_bindgen(js_name = getRpcUrl)]
    pub fn get_rpc_url(&self, key: String) -> Option<String> {
        self.controller.rpc_url(&key)
    }

    /// Store an RPC override; an empty or missing url restores the configured one.
    #[wasm_bindgen(js_name = setRpcUrl)]
    pub fn set_rpc_url(&self, key: String, url: Option<String>) -> Result<(), JsValue> {
        self.controller
            .set_rpc_override(&key, url.as_deref())
            .map_err(connect_error)
    }

    #[wasm_bindgen(js_name = setNetworkVisible)]
    pub fn set_network_visible(&self, key: String, visible: bool) -> bool {
        self.controller.set_network_visible(&key, visible)
    }

    #[wasm_bindgen(js_name = onConnect)]
    pub fn on_connect(&self, callback: js_sys::Function) {
        self.callbacks.set_on_connect(callback);
    }

    #[wasm_bindgen(js_name = onDisconnect)]
    pub fn on_disconnect(&self, callback: js_sys::Function) {
        self.callbacks.set_on_disconnect(callback);
    }

    #[wasm_bindgen(js_name = onChainChange)]
    pub fn on_chain_change(&self, callback: js_sys::Function) {
        self.callbacks.set_on_chain_change(callback);
    }

    #[wasm_bindgen(js_name = onAccountChange)]
    pub fn on_account_change(&self, callback: js_sys::Function) {
        self.callbacks.set_on_account_change(callback);
    }

    #[wasm_bindgen(js_name = onProviderAnnounced)]
    pub fn on_provider_announced(&self, callback: js_sys::Function) {
        self.callbacks.set_on_announce(callback);
    }

    /// Called with the current view right away and after every state change.
    #[wasm_bindgen(js_name = onRender)]
    pub fn on_render(&self, callback: js_sys::Function) {
        self.callbacks.set_on_render(callback.clone());
        match to_js(&self.controller.view()) {
            Ok(view) => {
                if let Err(err) = callback.call1(&JsValue::NULL, &view) {
                    gloo_console::error!(format!("render callback failed: {err:?}"));
                }
            }
            Err(err) => gloo_console::error!(format!("failed to serialize view: {err:?}")),
        }
    }
}
