use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, RwLock};
use tracing::warn;
use vg_api_types::{ChainId, SessionState};

pub const CONNECTED_KEY: &str = "connectConnected";
pub const CHAIN_ID_KEY: &str = "connectCurrentChainId";
pub const LAST_WALLET_KEY: &str = "connectLastWallet";
pub const NETWORK_STATUS_KEY: &str = "connectNetworkStatus";

/// Keys cleared together on disconnect.
pub const SESSION_KEYS: [&str; 3] = [CHAIN_ID_KEY, LAST_WALLET_KEY, CONNECTED_KEY];

/// String key-value persistence with single-key atomic writes
/// (browser `localStorage`, RocksDB, memory).
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Rc<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn len(&self) -> usize {
        self.values.read().map(|guard| guard.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let guard = self
            .values
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self
            .values
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        guard.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut guard = self
            .values
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        guard.remove(key);
        Ok(())
    }
}

#[cfg(feature = "rocksdb")]
pub use rocks::RocksDbStore;

#[cfg(feature = "rocksdb")]
mod rocks {
    use super::KeyValueStore;
    use anyhow::{Context, Result};
    use rocksdb::{DB, Options};
    use std::sync::Arc;

    pub struct RocksDbStore {
        db: Arc<DB>,
    }

    impl RocksDbStore {
        pub fn open_default(path: &str) -> Result<Self> {
            let mut options = Options::default();
            options.create_if_missing(true);
            let db = DB::open(&options, path)
                .with_context(|| format!("failed to open session store at {path}"))?;
            Ok(Self { db: Arc::new(db) })
        }

        fn key_for(key: &str) -> String {
            format!("kv:{key}")
        }
    }

    impl KeyValueStore for RocksDbStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            let value = self.db.get(Self::key_for(key).as_bytes())?;
            match value {
                Some(raw) => Ok(Some(
                    String::from_utf8(raw).with_context(|| format!("non-utf8 value under {key}"))?,
                )),
                None => Ok(None),
            }
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.db.put(Self::key_for(key).as_bytes(), value.as_bytes())?;
            Ok(())
        }

        fn remove(&self, key: &str) -> Result<()> {
            self.db.delete(Self::key_for(key).as_bytes())?;
            Ok(())
        }
    }
}

/// Typed view over the persisted connection keys.
pub struct SessionStore<S> {
    store: S,
}

impl<S: KeyValueStore> SessionStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    /// Missing keys load as a disconnected session; an unparsable chain id
    /// loads as `None`.
    pub fn load(&self) -> Result<SessionState> {
        let connected = self.store.get(CONNECTED_KEY)?.as_deref() == Some("true");
        let chain_id = self
            .store
            .get(CHAIN_ID_KEY)?
            .and_then(|raw| raw.parse::<ChainId>().ok());
        let wallet_name = self.store.get(LAST_WALLET_KEY)?;

        Ok(SessionState {
            connected,
            chain_id,
            wallet_name,
        })
    }

    pub fn is_connected(&self) -> Result<bool> {
        Ok(self.store.get(CONNECTED_KEY)?.as_deref() == Some("true"))
    }

    pub fn last_wallet(&self) -> Result<Option<String>> {
        self.store.get(LAST_WALLET_KEY)
    }

    /// The connection flag is written last so it is never set without the
    /// chain id and wallet name beside it.
    pub fn save_connection(&self, wallet_name: &str, chain_id: ChainId) -> Result<()> {
        self.store.set(CHAIN_ID_KEY, &chain_id.to_hex())?;
        self.store.set(LAST_WALLET_KEY, wallet_name)?;
        self.store.set(CONNECTED_KEY, "true")?;
        Ok(())
    }

    pub fn save_chain_id(&self, chain_id: ChainId) -> Result<()> {
        self.store.set(CHAIN_ID_KEY, &chain_id.to_hex())
    }

    /// Removes every session key, attempting all of them even if one fails.
    pub fn clear(&self) -> Result<()> {
        let mut first_error = None;
        for key in SESSION_KEYS {
            if let Err(err) = self.store.remove(key) {
                warn!("failed to remove session key {}: {}", key, err);
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn network_status(&self) -> Result<Option<String>> {
        self.store.get(NETWORK_STATUS_KEY)
    }

    pub fn set_network_status(&self, chain_id: ChainId) -> Result<()> {
        self.store.set(NETWORK_STATUS_KEY, &chain_id.to_hex())
    }

    pub fn clear_network_status(&self) -> Result<()> {
        self.store.remove(NETWORK_STATUS_KEY)
    }

    fn rpc_key(network: &str) -> String {
        format!("{network}-rpc")
    }

    pub fn rpc_override(&self, network: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .get(&Self::rpc_key(network))?
            .filter(|url| !url.trim().is_empty()))
    }

    /// `None` or a blank URL clears the override.
    pub fn set_rpc_override(&self, network: &str, url: Option<&str>) -> Result<()> {
        match url.map(str::trim).filter(|url| !url.is_empty()) {
            Some(url) => self.store.set(&Self::rpc_key(network), url),
            None => self.store.remove(&Self::rpc_key(network)),
        }
    }
}
