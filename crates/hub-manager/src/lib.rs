//! Event manager for the hub
//!
//! [`EventManager`] is the central bus. Bridges emit observed events into
//! it, every event is matched against the configured rules, and the
//! matching rules' action sequences run with a fresh correlation id. The
//! `trigger` action comes back into the manager as a `bridge://` URI and is
//! routed to the named bridge.
//!
//! ```no_run
//! use hub_actions::ActionFactory;
//! use hub_bridges::BridgeRegistry;
//! use hub_manager::EventManager;
//!
//! # async fn run() -> hub_manager::ManagerResult<()> {
//! EventManager::start(
//!     "config.yaml",
//!     &BridgeRegistry::default(),
//!     &ActionFactory::new(),
//!     async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     },
//! )
//! .await
//! # }
//! ```

mod error;
mod manager;
mod stats;

pub use error::{ManagerError, ManagerResult};
pub use manager::EventManager;
pub use stats::ManagerStats;
