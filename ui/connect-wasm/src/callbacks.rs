use js_sys::Function;
use std::cell::RefCell;
use vg_api_types::{ConnectionEvent, ViewState};
use vg_connect_core::ConnectionObserver;
use wasm_bindgen::JsValue;

use crate::to_js;

/// JavaScript callbacks registered through `ConnectWallet.on*`.
#[derive(Default)]
pub struct JsCallbacks {
    on_connect: RefCell<Option<Function>>,
    on_disconnect: RefCell<Option<Function>>,
    on_chain_change: RefCell<Option<Function>>,
    on_account_change: RefCell<Option<Function>>,
    on_announce: RefCell<Option<Function>>,
    on_render: RefCell<Option<Function>>,
}

impl JsCallbacks {
    pub fn set_on_connect(&self, callback: Function) {
        self.on_connect.replace(Some(callback));
    }

    pub fn set_on_disconnect(&self, callback: Function) {
        self.on_disconnect.replace(Some(callback));
    }

    pub fn set_on_chain_change(&self, callback: Function) {
        self.on_chain_change.replace(Some(callback));
    }

    pub fn set_on_account_change(&self, callback: Function) {
        self.on_account_change.replace(Some(callback));
    }

    pub fn set_on_announce(&self, callback: Function) {
        self.on_announce.replace(Some(callback));
    }

    pub fn set_on_render(&self, callback: Function) {
        self.on_render.replace(Some(callback));
    }
}

// Clone out of the cell first so a callback may re-register itself.
fn invoke(slot: &RefCell<Option<Function>>, payload: Result<JsValue, JsValue>) {
    let Some(callback) = slot.borrow().clone() else {
        return;
    };
    let result = payload.and_then(|payload| callback.call1(&JsValue::NULL, &payload));
    if let Err(err) = result {
        gloo_console::error!(format!("connect callback failed: {err:?}"));
    }
}

impl ConnectionObserver for JsCallbacks {
    fn on_event(&self, event: &ConnectionEvent) {
        let slot = match event {
            ConnectionEvent::Connected { .. } => &self.on_connect,
            ConnectionEvent::Disconnected => &self.on_disconnect,
            ConnectionEvent::ChainChanged { .. } => &self.on_chain_change,
            ConnectionEvent::AccountChanged { .. } => &self.on_account_change,
            ConnectionEvent::ProviderAnnounced { .. } => &self.on_announce,
        };
        invoke(slot, to_js(event));
    }

    fn render(&self, view: &ViewState) {
        invoke(&self.on_render, to_js(view));
    }
}
