//! Content-addressed distribution of task resources.
//!
//! - **ResourceManager**: publishes files, caches the latest bundle per task
//! - **ContentClient / HyperdriveClient**: the content-store seam and its RPC client
//! - **RetryPolicy**: bounded retries of transient client failures
//! - **WireResourceRef**: the `[hash, [[segment, ...], ...]]` wire form
//!
//! # Example
//!
//! ```rust,ignore
//! use peer_core::config::CoreConfig;
//! use peer_core::resource::{AddOutcome, ResourceManager};
//!
//! let manager = ResourceManager::new(&CoreConfig::from_env()?, vec![]);
//! if let AddOutcome::Added(bundle) = manager.add_files(&files, "t1", None, None).await? {
//!     let wire = ResourceManager::to_wire(&[Some(bundle)]);
//! }
//! ```

pub mod bundle;
pub mod client;
pub mod manager;
pub mod retry;

pub use bundle::{ResourceBundle, ResourceStorage, WireResourceRef};
pub use client::{ClientOptions, ContentClient, HyperdriveClient, PeerAddress};
pub use manager::{AddOutcome, ClientFactory, ResourceManager};
pub use retry::{Retried, RetryPolicy};
