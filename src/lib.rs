pub mod address;
pub mod chain;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod multichain;
pub mod persist;
pub mod pool;
pub mod registry;

pub use address::ProxyAddress;
pub use chain::Chain;
pub use client::ClientFacade;
pub use error::{ProxyError, Result};
pub use multichain::MultiChain;
pub use pool::{Pool, PoolConfig};
pub use registry::{PerProxyStats, Registry, RegistryOptions, Source};
