//! Wallet connection core.
//!
//! `ConnectionController` owns the provider registry and persisted session,
//! mediates connect/disconnect/network switching, and reports every change
//! to its observers.

pub mod config;
pub mod controller;
pub mod observer;


pub use config::{ConfigError, DEFAULT_NETWORK, NetworkConfig};
pub use controller::{ConnectError, ConnectOutcome, ConnectionController};
pub use observer::{ConnectionObserver, EventLog};
