//! EIP-6963 multi-wallet discovery over window events.

use std::rc::Rc;
use vg_api_types::ProviderInfo;
use vg_provider::{AnnounceSink, ProviderDiscovery, ProviderRecord};
use wasm_bindgen::{JsCast, JsValue, closure::Closure};
use web_sys::{CustomEvent, Event, Window};

use crate::eip1193::{InjectedProvider, property};

pub const ANNOUNCE_EVENT: &str = "eip6963:announceProvider";
pub const REQUEST_EVENT: &str = "eip6963:requestProvider";

/// Dispatches `eip6963:requestProvider`; wallets answer with announce
/// events picked up by [`AnnounceListener`].
#[derive(Default)]
pub struct Eip6963Discovery;

impl ProviderDiscovery for Eip6963Discovery {
    fn request_providers(&self, _sink: &AnnounceSink) {
        let Some(window) = web_sys::window() else {
            gloo_console::warn!("no window; skipping provider discovery");
            return;
        };
        let dispatched = Event::new(REQUEST_EVENT).and_then(|event| window.dispatch_event(&event));
        if let Err(err) = dispatched {
            gloo_console::error!(format!("failed to request providers: {err:?}"));
        }
    }
}

/// Forwards every `eip6963:announceProvider` event to the controller until dropped.
pub struct AnnounceListener {
    window: Window,
    callback: Closure<dyn FnMut(Event)>,
}

impl AnnounceListener {
    pub fn install(sink: AnnounceSink) -> Result<Self, JsValue> {
        let window = web_sys::window().ok_or_else(|| JsValue::from_str("no global window"))?;

        let callback = Closure::wrap(Box::new(move |event: Event| {
            let Some(event) = event.dyn_ref::<CustomEvent>() else {
                return;
            };
            match announced_record(&event.detail()) {
                Ok(record) => {
                    if !sink.announce(record) {
                        gloo_console::warn!("connection controller is gone; dropping announcement");
                    }
                }
                Err(reason) => gloo_console::warn!(format!("ignoring provider announcement: {reason}")),
            }
        }) as Box<dyn FnMut(Event)>);

        window.add_event_listener_with_callback(ANNOUNCE_EVENT, callback.as_ref().unchecked_ref())?;
        Ok(Self { window, callback })
    }
}

impl Drop for AnnounceListener {
    fn drop(&mut self) {
        let _ = self
            .window
            .remove_event_listener_with_callback(ANNOUNCE_EVENT, self.callback.as_ref().unchecked_ref());
    }
}

fn announced_record(detail: &JsValue) -> Result<ProviderRecord, String> {
    let info = property(detail, "info").ok_or("missing info")?;
    let info: ProviderInfo = serde_wasm_bindgen::from_value(info).map_err(|err| err.to_string())?;
    if info.name.trim().is_empty() {
        return Err("provider name is empty".to_owned());
    }

    let provider = property(detail, "provider").ok_or("missing provider")?;
    Ok(ProviderRecord::new(info, Rc::new(InjectedProvider::new(provider))))
}
