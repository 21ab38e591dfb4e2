//! Hop Bonder
//!
//! Watches a home chain and its secondary chains, commits pending transfer
//! batches, bonds the resulting transfer roots and runs the challenge and
//! resolution lifecycle. Chain-mutating calls of each signing identity are
//! serialized through a per-account queue.

pub mod client;
pub mod config;
pub mod error;
pub mod fleet;
pub mod gateway;
pub mod health;
pub mod queue;
pub mod settlement;
pub mod store;
pub mod types;
pub mod watcher;


pub use config::{BonderConfig, BridgedToken, ChainConfig, ChainContracts};
pub use error::{BonderError, BonderResult};
pub use fleet::{FleetOptions, WatcherFleet};
pub use gateway::{BridgeGateway, SendRequest};
pub use health::{HealthServer, HealthState};
pub use queue::AccountQueue;
pub use settlement::{bond_amount, Settlement};
pub use store::{InMemoryStore, SledStore, StateStore};
pub use types::*;
pub use watcher::{Poller, PollingWatcher};
