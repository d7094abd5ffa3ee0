//! EIP-1193 provider objects injected by browser wallets.

use async_trait::async_trait;
use js_sys::{Function, Promise, Reflect};
use serde_json::{Value, json};
use std::rc::Rc;
use wasm_bindgen::{JsCast, JsValue, closure::Closure};
use wasm_bindgen_futures::JsFuture;
use vg_provider::{
    EventSink, ProviderCapabilities, ProviderError, ProviderEvent, Subscription, WalletProvider,
};

use crate::to_js;

type Listener = Closure<dyn FnMut(JsValue)>;

/// Wraps the `provider` object from an EIP-6963 announcement.
///
/// `request`, `on` and `removeListener` are looked up once at construction.
/// Event support requires both listener functions. Chain switching and
/// permission revocation go through `request` and are assumed available.
pub struct InjectedProvider {
    object: JsValue,
    request: Option<Function>,
    listeners: Option<(Function, Function)>,
    capabilities: ProviderCapabilities,
}

impl InjectedProvider {
    pub fn new(object: JsValue) -> Self {
        let request = function(&object, "request");
        let listeners = function(&object, "on").zip(function(&object, "removeListener"));
        let capabilities = event_capabilities(listeners.is_some());
        Self {
            object,
            request,
            listeners,
            capabilities,
        }
    }
}

fn event_capabilities(events: bool) -> ProviderCapabilities {
    ProviderCapabilities {
        events,
        ..ProviderCapabilities::full()
    }
}

#[async_trait(?Send)]
impl WalletProvider for InjectedProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let request = self
            .request
            .as_ref()
            .ok_or_else(|| ProviderError::unsupported(method))?;

        let args = to_js(&json!({ "method": method, "params": params })).map_err(|err| {
            ProviderError::Transport {
                method: method.to_owned(),
                message: format!("{err:?}"),
            }
        })?;

        let pending = request
            .call1(&self.object, &args)
            .map_err(|err| rejection(method, &err))?;
        let result = JsFuture::from(Promise::resolve(&pending))
            .await
            .map_err(|err| rejection(method, &err))?;

        Ok(js_to_json(&result))
    }

    fn subscribe(&self, sink: EventSink) -> Subscription {
        let Some((on, remove)) = self.listeners.clone() else {
            return Subscription::noop();
        };
        let sink = Rc::new(sink);

        let accounts_sink = Rc::clone(&sink);
        let chain_sink = Rc::clone(&sink);
        let disconnect_sink = Rc::clone(&sink);
        let listeners: Vec<(&'static str, Listener)> = vec![
            (
                "accountsChanged",
                Closure::wrap(Box::new(move |value: JsValue| {
                    let accounts = accounts_payload(&js_to_json(&value));
                    accounts_sink.emit(ProviderEvent::AccountsChanged(accounts));
                }) as Box<dyn FnMut(JsValue)>),
            ),
            (
                "chainChanged",
                Closure::wrap(Box::new(move |value: JsValue| {
                    match chain_payload(&js_to_json(&value)) {
                        Some(raw) => {
                            chain_sink.emit(ProviderEvent::ChainChanged(raw));
                        }
                        None => gloo_console::warn!("ignoring chainChanged without a chain id"),
                    }
                }) as Box<dyn FnMut(JsValue)>),
            ),
            (
                "disconnect",
                Closure::wrap(Box::new(move |_: JsValue| {
                    disconnect_sink.emit(ProviderEvent::Disconnect);
                }) as Box<dyn FnMut(JsValue)>),
            ),
        ];

        for (event, listener) in &listeners {
            if let Err(err) = on.call2(
                &self.object,
                &JsValue::from_str(event),
                listener.as_ref(),
            ) {
                gloo_console::warn!(format!("failed to listen for {event}: {err:?}"));
            }
        }

        let object = self.object.clone();
        Subscription::new(move || {
            for (event, listener) in listeners {
                let _ = remove.call2(
                    &object,
                    &JsValue::from_str(event),
                    listener.as_ref(),
                );
            }
        })
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }
}

pub(crate) fn property(object: &JsValue, name: &str) -> Option<JsValue> {
    if !object.is_object() {
        return None;
    }
    Reflect::get(object, &JsValue::from_str(name))
        .ok()
        .filter(|value| !value.is_undefined() && !value.is_null())
}

fn function(object: &JsValue, name: &str) -> Option<Function> {
    property(object, name)?.dyn_into::<Function>().ok()
}

pub(crate) fn js_to_json(value: &JsValue) -> Value {
    serde_wasm_bindgen::from_value(value.clone()).unwrap_or(Value::Null)
}

/// EIP-1193 errors carry `code`, `message` and optional `data`; anything
/// without a code is treated as a transport failure.
fn rejection(method: &str, err: &JsValue) -> ProviderError {
    let message = property(err, "message")
        .and_then(|message| message.as_string())
        .or_else(|| err.as_string())
        .unwrap_or_else(|| format!("{err:?}"));

    match property(err, "code").and_then(|code| code.as_f64()) {
        Some(code) => ProviderError::rejected(
            method,
            code as i64,
            message,
            property(err, "data").map(|data| js_to_json(&data)),
        ),
        None => ProviderError::Transport {
            method: method.to_owned(),
            message,
        },
    }
}

fn accounts_payload(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}

/// Wallets emit `chainChanged` as a hex string; a few send a number.
fn chain_payload(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) if !raw.trim().is_empty() => Some(raw.clone()),
        Value::Number(number) => number.as_u64().map(|id| format!("{id:#x}")),
        _ => None,
    }
}
