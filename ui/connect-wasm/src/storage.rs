use anyhow::{Result, anyhow};
use gloo_storage::{LocalStorage, Storage as _};
use vg_storage::KeyValueStore;

/// Session persistence in `window.localStorage`, keys stored verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserStore;

impl KeyValueStore for BrowserStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        LocalStorage::raw()
            .get_item(key)
            .map_err(|err| anyhow!("localStorage read of {key} failed: {err:?}"))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        LocalStorage::raw()
            .set_item(key, value)
            .map_err(|err| anyhow!("localStorage write of {key} failed: {err:?}"))
    }

    fn remove(&self, key: &str) -> Result<()> {
        LocalStorage::raw()
            .remove_item(key)
            .map_err(|err| anyhow!("localStorage remove of {key} failed: {err:?}"))
    }
}
