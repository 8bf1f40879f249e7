//! Flare Naming Library
//!
//! Client-side service registration and discovery: pluggable registry drivers
//! (etcd, Consul, in-memory), pluggable load balancers, a watch-driven instance cache
//! and a small façade tying them together.

pub mod app;
pub mod balancer;
pub mod config;
pub mod container;
pub mod error;
pub mod logging;
pub mod naming;
pub mod plugin;
pub mod registry;
pub mod retry;
pub mod watcher;

// Re-exports
pub use app::AppRecord;
pub use balancer::{Balancer, BalancerRegistry, RandomBalancer, RoundRobinBalancer};
pub use config::{Config, NamingOptions};
pub use container::Container;
pub use error::{ErrorCategory, ErrorCode, NamingError, Result};
pub use logging::{LogFormat, init_logging};
pub use naming::Naming;
pub use plugin::{PluginRegistry, Plugins};
pub use registry::{
    Listing, MemoryRegistry, NotifyMessage, NotifyReceiver, Registry, RegistryFactory, StopReason,
    WatchEvent, WatchStream,
};
pub use retry::{Backoff, ExponentialBackoffPolicy, RetryPolicy};

#[cfg(feature = "consul")]
pub use registry::ConsulRegistry;
#[cfg(feature = "etcd")]
pub use registry::EtcdRegistry;
