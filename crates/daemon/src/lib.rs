//! wgsync daemon library
//!
//! Keeps a WireGuard interface document consistent with the registry of
//! subnets and clients: one parsed document model, editors over it, a
//! single-writer store, and the management service that drives them.

pub mod config;
pub mod document;
pub mod keys;
pub mod network;
pub mod routes;
pub mod store;
pub mod sync;

pub use config::DaemonConfig;
pub use document::{ConfigDocument, HookDefaults, InterfaceSection, IsolationRule, PeerBlock};
pub use keys::{BuiltinKeyProvisioner, KeyProvisioner, WgKeyPair, WgToolKeyProvisioner};
pub use network::{ClientSettings, NetworkManager};
pub use store::{Committed, ConfigStore, InterfaceSeed};
pub use sync::Synchronizer;
